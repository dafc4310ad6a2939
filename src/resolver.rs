//! Hostname -> tenant resolution against the core tenant directory.
//!
//! Every "not a tenant" outcome (foreign domain, bare root domain, reserved or
//! malformed label, directory miss, inactive tenant) is the same `None`, so a
//! caller cannot tell a disabled library from one that never existed.

use crate::config::TenancyConfig;
use crate::error::TenancyError;
use crate::registry::PoolRegistry;
use crate::schema::{is_valid_slug, schema_name_for};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Resolved tenant identity. A lookup key, not a handle: it owns no connections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TenantContext {
    pub slug: String,
    pub id: String,
    pub schema_name: String,
}

/// A directory row for an active tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: String,
    pub slug: String,
}

/// Looks up active tenants by slug. Inactive and absent tenants both return `None`.
#[async_trait]
pub trait TenantDirectory: Send + Sync + 'static {
    async fn find_active(&self, slug: &str) -> Result<Option<DirectoryEntry>, TenancyError>;
}

/// Directory backed by the `libraries` table on the core pool.
pub struct PgTenantDirectory {
    registry: Arc<PoolRegistry>,
    sql: String,
}

impl PgTenantDirectory {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        let sql = format!(
            "SELECT id::text, slug FROM {}.libraries WHERE slug = $1 AND is_active = true LIMIT 1",
            registry.config().core_schema
        );
        PgTenantDirectory { registry, sql }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_active(&self, slug: &str) -> Result<Option<DirectoryEntry>, TenancyError> {
        let pool = self.registry.get_core_pool()?;
        let row: Option<(String, String)> = sqlx::query_as(&self.sql)
            .bind(slug)
            .fetch_optional(&pool)
            .await?;
        Ok(row.map(|(id, slug)| DirectoryEntry { id, slug }))
    }
}

/// Upper bound on remembered misses; the oldest half is dropped when exceeded.
const NEGATIVE_CACHE_CAPACITY: usize = 4096;

/// Remembers directory misses for a short time so probe traffic on random
/// subdomains does not hit the core database on every request.
struct NegativeCache {
    ttl: Option<Duration>,
    state: Mutex<Misses>,
}

struct Misses {
    entries: HashMap<String, Instant>,
    /// Bumped by every `remove`; a lookup started under an older value may not record its miss.
    generation: u64,
}

impl NegativeCache {
    fn new(ttl: Option<Duration>) -> Self {
        NegativeCache {
            ttl,
            state: Mutex::new(Misses {
                entries: HashMap::new(),
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Misses> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn contains(&self, slug: &str) -> bool {
        let Some(ttl) = self.ttl else { return false };
        let mut state = self.lock();
        match state.entries.get(slug) {
            Some(at) if at.elapsed() < ttl => true,
            Some(_) => {
                state.entries.remove(slug);
                false
            }
            None => false,
        }
    }

    /// Record a miss seen by a lookup that started at generation `seen`.
    fn insert(&self, slug: &str, seen: u64) {
        let Some(ttl) = self.ttl else { return };
        let mut state = self.lock();
        if state.generation != seen {
            return;
        }
        let entries = &mut state.entries;
        if entries.len() >= NEGATIVE_CACHE_CAPACITY {
            entries.retain(|_, at| at.elapsed() < ttl);
        }
        if entries.len() >= NEGATIVE_CACHE_CAPACITY {
            let mut by_age: Vec<(String, Instant)> = entries.drain().collect();
            by_age.sort_by_key(|(_, at)| *at);
            entries.extend(by_age.into_iter().skip(NEGATIVE_CACHE_CAPACITY / 2));
        }
        entries.insert(slug.to_string(), Instant::now());
    }

    fn remove(&self, slug: &str) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        state.entries.remove(slug);
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

/// What a hostname looks like before any directory lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostShape {
    /// `localhost`, loopback addresses: tenant comes from an explicit parameter.
    Loopback,
    /// Root domain itself: main site.
    Root,
    /// One label below the root domain.
    Subdomain(String),
    /// Not ours: other domains, deeper subdomains, garbage.
    Foreign,
}

/// Lowercase, drop port and trailing dot. `None` for empty input.
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().to_ascii_lowercase();
    let host = if let Some(rest) = host.strip_prefix('[') {
        // Bracketed IPv6, possibly with a port: [::1]:8080
        rest.split(']').next().unwrap_or("").to_string()
    } else if host.matches(':').count() == 1 {
        host.split(':').next().unwrap_or("").to_string()
    } else {
        host
    };
    let host = host.trim_end_matches('.').to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "::1") || host.ends_with(".localhost")
}

/// Classify a hostname against `root_domain` (already lowercase, no trailing dot).
pub fn classify_host(host: &str, root_domain: &str) -> HostShape {
    let Some(host) = normalize_host(host) else {
        return HostShape::Foreign;
    };
    if is_loopback(&host) {
        return HostShape::Loopback;
    }
    if host == root_domain {
        return HostShape::Root;
    }
    let Some(prefix) = host.strip_suffix(root_domain).and_then(|p| p.strip_suffix('.')) else {
        return HostShape::Foreign;
    };
    let labels: Vec<&str> = prefix.split('.').collect();
    match labels.as_slice() {
        [label] if !label.is_empty() => HostShape::Subdomain(label.to_string()),
        _ => HostShape::Foreign,
    }
}

pub struct TenantResolver {
    config: Arc<TenancyConfig>,
    directory: Arc<dyn TenantDirectory>,
    misses: NegativeCache,
}

impl TenantResolver {
    pub fn new(config: Arc<TenancyConfig>, directory: Arc<dyn TenantDirectory>) -> Self {
        let misses = NegativeCache::new(config.negative_cache_ttl);
        TenantResolver {
            config,
            directory,
            misses,
        }
    }

    /// Resolver reading the directory through the registry's core pool.
    pub fn for_registry(registry: Arc<PoolRegistry>) -> Self {
        let config = registry.config().clone();
        Self::new(config, Arc::new(PgTenantDirectory::new(registry)))
    }

    /// Map an inbound hostname to a tenant. At most one directory query, never a tenant pool.
    pub async fn resolve(&self, hostname: &str) -> Result<Option<TenantContext>, TenancyError> {
        match classify_host(hostname, &self.config.root_domain) {
            HostShape::Subdomain(label) => self.resolve_slug(&label).await,
            HostShape::Loopback | HostShape::Root | HostShape::Foreign => Ok(None),
        }
    }

    /// Resolve an explicit slug, as used on loopback hosts during development.
    pub async fn resolve_slug(&self, slug: &str) -> Result<Option<TenantContext>, TenancyError> {
        let slug = slug.trim().to_ascii_lowercase();
        if !is_valid_slug(&slug) || self.config.is_reserved(&slug) {
            return Ok(None);
        }
        if self.misses.contains(&slug) {
            return Ok(None);
        }
        let seen = self.misses.generation();
        let Some(entry) = self.directory.find_active(&slug).await? else {
            self.misses.insert(&slug, seen);
            tracing::debug!(slug = %slug, "no active tenant");
            return Ok(None);
        };
        let schema_name = match schema_name_for(&self.config.schema_prefix, &entry.slug) {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!(slug = %entry.slug, "directory slug cannot name a schema");
                return Ok(None);
            }
        };
        Ok(Some(TenantContext {
            slug: entry.slug,
            id: entry.id,
            schema_name,
        }))
    }

    /// Drop a remembered miss, e.g. right after the tenant is provisioned or re-enabled.
    pub fn forget(&self, slug: &str) {
        self.misses.remove(slug);
    }

    pub fn cached_misses(&self) -> usize {
        self.misses.len()
    }
}
