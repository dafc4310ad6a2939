//! Pool registry: one core pool plus one lazily built pool per tenant slug.
//!
//! Tenant pools are created at most once per slug. Concurrent first callers for
//! the same slug share a [`tokio::sync::OnceCell`], so exactly one of them runs
//! the connector while the rest wait for its result. A failed construction is
//! not cached; the next caller tries again.

use crate::config::{TenancyConfig, TenantIsolation};
use crate::error::{sqlstate_of, TenancyError, INVALID_CATALOG_NAME};
use crate::schema::schema_name_for;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;

/// Pool for the shared database holding the tenant directory.
pub type CorePool = PgPool;
/// Pool scoped to a single tenant's schema or database.
pub type TenantPool = PgPool;

/// Builds and probes pools. Production uses [`PgConnector`]; tests substitute their own.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    /// Build the core pool and run the liveness probe.
    async fn connect_core(&self) -> Result<CorePool, TenancyError>;

    /// Build a pool for `slug` scoped to `schema` and check that it really exists.
    async fn connect_tenant(&self, slug: &str, schema: &str) -> Result<TenantPool, TenancyError>;
}

/// Connects to PostgreSQL using [`TenancyConfig`] caps and timeouts.
pub struct PgConnector {
    config: Arc<TenancyConfig>,
}

impl PgConnector {
    pub fn new(config: Arc<TenancyConfig>) -> Self {
        PgConnector { config }
    }

    fn base_options(&self) -> Result<PgConnectOptions, TenancyError> {
        let opts = PgConnectOptions::from_str(&self.config.database_url)
            .map_err(|e| TenancyError::Configuration(format!("invalid DATABASE_URL: {}", e)))?;
        Ok(opts.application_name(env!("CARGO_PKG_NAME")))
    }

    fn statement_timeout_ms(&self) -> String {
        self.config.statement_timeout.as_millis().to_string()
    }
}

#[async_trait]
impl PoolConnector for PgConnector {
    async fn connect_core(&self) -> Result<CorePool, TenancyError> {
        let opts = self
            .base_options()?
            .options([("statement_timeout", self.statement_timeout_ms())]);
        let pool = PgPoolOptions::new()
            .max_connections(self.config.core_max_connections)
            .acquire_timeout(self.config.acquire_timeout)
            .connect_with(opts)
            .await
            .map_err(|e| match TenancyError::from(e) {
                TenancyError::Timeout(what) => TenancyError::Timeout(what),
                other => TenancyError::Connectivity(format!("core database: {}", other)),
            })?;
        if let Err(e) = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&pool).await {
            pool.close().await;
            return Err(TenancyError::Connectivity(format!("core liveness probe failed: {}", e)));
        }
        Ok(pool)
    }

    async fn connect_tenant(&self, slug: &str, schema: &str) -> Result<TenantPool, TenancyError> {
        let base = self.base_options()?;
        let opts = match self.config.isolation {
            TenantIsolation::Schema => base.options([
                ("statement_timeout", self.statement_timeout_ms()),
                ("search_path", schema.to_string()),
            ]),
            TenantIsolation::Database => base
                .database(schema)
                .options([("statement_timeout", self.statement_timeout_ms())]),
        };
        let pool = PgPoolOptions::new()
            .max_connections(self.config.tenant_max_connections)
            .acquire_timeout(self.config.acquire_timeout)
            .connect_with(opts)
            .await
            .map_err(|e| tenant_connect_error(slug, e))?;

        if self.config.isolation == TenantIsolation::Schema {
            let probe = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
            )
            .bind(schema)
            .fetch_one(&pool)
            .await;
            match probe {
                Ok(true) => {}
                Ok(false) => {
                    pool.close().await;
                    tracing::info!(slug, schema, "tenant schema does not exist");
                    return Err(TenancyError::tenant_not_found(slug));
                }
                Err(e) => {
                    pool.close().await;
                    return Err(tenant_connect_error(slug, e));
                }
            }
        } else if let Err(e) = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&pool).await {
            pool.close().await;
            return Err(tenant_connect_error(slug, e));
        }
        Ok(pool)
    }
}

/// Acquire timeouts stay timeouts; anything else means the tenant is not reachable.
fn tenant_connect_error(slug: &str, e: sqlx::Error) -> TenancyError {
    if sqlstate_of(&e).as_deref() == Some(INVALID_CATALOG_NAME) {
        tracing::info!(slug, "tenant database does not exist");
        return TenancyError::tenant_not_found(slug);
    }
    match TenancyError::from(e) {
        TenancyError::Timeout(what) => TenancyError::Timeout(what),
        other => {
            tracing::warn!(slug, error = %other, "tenant pool probe failed");
            TenancyError::tenant_not_found(slug)
        }
    }
}

/// Connection counts for one pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub in_use: u32,
}

impl PoolStats {
    pub fn of(pool: &PgPool) -> Self {
        let size = pool.size();
        let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX).min(size);
        PoolStats {
            size,
            idle,
            in_use: size - idle,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RegistryStats {
    pub core: Option<PoolStats>,
    pub tenants: HashMap<String, PoolStats>,
}

/// Registry-wide counts with no tenant names in them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolTotals {
    pub core: Option<PoolStats>,
    pub tenant_pools: usize,
    pub tenant_connections: PoolStats,
}

/// Attempts at replacing a pool that was evicted while being handed out.
const STALE_POOL_RETRIES: usize = 3;

struct TenantSlot {
    pool: OnceCell<TenantPool>,
    last_used: Mutex<Instant>,
}

impl TenantSlot {
    fn new() -> Self {
        TenantSlot {
            pool: OnceCell::new(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().unwrap_or_else(|e| e.into_inner()).elapsed()
    }
}

/// Owns every pool in the process. Construct once at startup and share by `Arc`.
pub struct PoolRegistry {
    config: Arc<TenancyConfig>,
    connector: Arc<dyn PoolConnector>,
    core: RwLock<Option<CorePool>>,
    core_init: tokio::sync::Mutex<()>,
    tenants: RwLock<HashMap<String, Arc<TenantSlot>>>,
    closed: AtomicBool,
}

impl PoolRegistry {
    pub fn new(config: Arc<TenancyConfig>) -> Self {
        let connector = Arc::new(PgConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: Arc<TenancyConfig>, connector: Arc<dyn PoolConnector>) -> Self {
        PoolRegistry {
            config,
            connector,
            core: RwLock::new(None),
            core_init: tokio::sync::Mutex::new(()),
            tenants: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Arc<TenancyConfig> {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn core_read(&self) -> RwLockReadGuard<'_, Option<CorePool>> {
        self.core.read().unwrap_or_else(|e| e.into_inner())
    }

    fn core_write(&self) -> RwLockWriteGuard<'_, Option<CorePool>> {
        self.core.write().unwrap_or_else(|e| e.into_inner())
    }

    fn tenants_read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TenantSlot>>> {
        self.tenants.read().unwrap_or_else(|e| e.into_inner())
    }

    fn tenants_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TenantSlot>>> {
        self.tenants.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the core pool, building and probing it on first call.
    pub async fn get_or_create_core_pool(&self) -> Result<CorePool, TenancyError> {
        if self.is_closed() {
            return Err(TenancyError::Closed);
        }
        if let Some(pool) = self.core_read().clone() {
            return Ok(pool);
        }
        let _init = self.core_init.lock().await;
        if let Some(pool) = self.core_read().clone() {
            return Ok(pool);
        }
        let started = Instant::now();
        let pool = self.connector.connect_core().await?;
        {
            let mut core = self.core_write();
            if !self.is_closed() {
                *core = Some(pool.clone());
                tracing::info!(
                    max_connections = self.config.core_max_connections,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "core pool ready"
                );
                return Ok(pool);
            }
        }
        pool.close().await;
        Err(TenancyError::Closed)
    }

    /// The core pool, or `NotInitialized` before bootstrap.
    pub fn get_core_pool(&self) -> Result<CorePool, TenancyError> {
        if let Some(pool) = self.core_read().clone() {
            return Ok(pool);
        }
        if self.is_closed() {
            Err(TenancyError::Closed)
        } else {
            Err(TenancyError::NotInitialized)
        }
    }

    /// Return the pool for `slug`, building it on first use.
    pub async fn get_or_create_tenant_pool(&self, slug: &str) -> Result<TenantPool, TenancyError> {
        if self.is_closed() {
            return Err(TenancyError::Closed);
        }
        let schema = schema_name_for(&self.config.schema_prefix, slug)?;
        for _ in 0..STALE_POOL_RETRIES {
            let slot = self.slot_for(slug)?;
            let result = slot
                .pool
                .get_or_try_init(|| async {
                    let started = Instant::now();
                    let pool = self.connector.connect_tenant(slug, &schema).await?;
                    tracing::info!(
                        slug,
                        schema = %schema,
                        max_connections = self.config.tenant_max_connections,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "tenant pool created"
                    );
                    Ok::<_, TenancyError>(pool)
                })
                .await
                .cloned();

            let pool = match result {
                Ok(pool) => pool,
                Err(e) => {
                    self.discard_failed_slot(slug, slot);
                    return Err(e);
                }
            };
            if self.is_closed() {
                pool.close().await;
                return Err(TenancyError::Closed);
            }
            if pool.is_closed() {
                // Evicted between lookup and use; forget the dead slot and build again.
                self.discard_closed_slot(slug, &slot);
                continue;
            }
            slot.touch();
            return Ok(pool);
        }
        Err(TenancyError::Closed)
    }

    /// Look up or insert the slot for `slug`, marking it used while the map lock is held
    /// so the idle sweeper cannot pick it between lookup and use.
    fn slot_for(&self, slug: &str) -> Result<Arc<TenantSlot>, TenancyError> {
        {
            let tenants = self.tenants_read();
            if let Some(slot) = tenants.get(slug) {
                slot.touch();
                return Ok(slot.clone());
            }
        }
        let mut tenants = self.tenants_write();
        // Checked under the map lock so a slot can never appear after shutdown drained the map.
        if self.is_closed() {
            return Err(TenancyError::Closed);
        }
        let slot = tenants
            .entry(slug.to_string())
            .or_insert_with(|| Arc::new(TenantSlot::new()))
            .clone();
        slot.touch();
        Ok(slot)
    }

    fn discard_closed_slot(&self, slug: &str, slot: &Arc<TenantSlot>) {
        let mut tenants = self.tenants_write();
        if tenants.get(slug).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            tenants.remove(slug);
        }
    }

    /// Drop an empty slot after a failed build, unless another caller is still waiting on it.
    fn discard_failed_slot(&self, slug: &str, slot: Arc<TenantSlot>) {
        let mut tenants = self.tenants_write();
        let removable = match tenants.get(slug) {
            Some(current) => {
                Arc::ptr_eq(current, &slot)
                    && current.pool.get().is_none()
                    && Arc::strong_count(&slot) == 2
            }
            None => false,
        };
        if removable {
            tenants.remove(slug);
        }
    }

    /// True when a pool for `slug` is already built.
    pub fn is_warm(&self, slug: &str) -> bool {
        self.tenants_read()
            .get(slug)
            .map(|slot| slot.pool.initialized())
            .unwrap_or(false)
    }

    /// Slugs with a built pool.
    pub fn warm_tenants(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self
            .tenants_read()
            .iter()
            .filter(|(_, slot)| slot.pool.initialized())
            .map(|(slug, _)| slug.clone())
            .collect();
        slugs.sort();
        slugs
    }

    /// Close and forget the pool for `slug`. Returns false if none was built.
    /// A build still in flight is left alone.
    pub async fn evict(&self, slug: &str) -> bool {
        let pool = {
            let mut tenants = self.tenants_write();
            match tenants.get(slug).and_then(|slot| slot.pool.get().cloned()) {
                Some(pool) => {
                    tenants.remove(slug);
                    pool
                }
                None => return false,
            }
        };
        pool.close().await;
        tracing::info!(slug, "tenant pool evicted");
        true
    }

    /// Close tenant pools unused for at least `idle_for` with no connection checked out.
    pub async fn evict_idle(&self, idle_for: Duration) -> Vec<String> {
        let evicted: Vec<(String, TenantPool)> = {
            let mut tenants = self.tenants_write();
            let stale: Vec<String> = tenants
                .iter()
                .filter(|(_, slot)| match slot.pool.get() {
                    Some(pool) => slot.idle_for() >= idle_for && PoolStats::of(pool).in_use == 0,
                    None => false,
                })
                .map(|(slug, _)| slug.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|slug| {
                    let slot = tenants.remove(&slug)?;
                    let pool = slot.pool.get()?.clone();
                    Some((slug, pool))
                })
                .collect()
        };
        let mut slugs = Vec::with_capacity(evicted.len());
        for (slug, pool) in evicted {
            pool.close().await;
            tracing::info!(slug = %slug, idle_secs = idle_for.as_secs(), "idle tenant pool evicted");
            slugs.push(slug);
        }
        slugs.sort();
        slugs
    }

    pub fn tenant_stats(&self, slug: &str) -> Option<PoolStats> {
        self.tenants_read()
            .get(slug)
            .and_then(|slot| slot.pool.get().map(PoolStats::of))
    }

    pub fn stats(&self) -> RegistryStats {
        let core = self.core_read().as_ref().map(PoolStats::of);
        let tenants = self
            .tenants_read()
            .iter()
            .filter_map(|(slug, slot)| slot.pool.get().map(|p| (slug.clone(), PoolStats::of(p))))
            .collect();
        RegistryStats { core, tenants }
    }

    /// Summed tenant pool counts; safe to expose where slugs must stay private.
    pub fn totals(&self) -> PoolTotals {
        let core = self.core_read().as_ref().map(PoolStats::of);
        let mut tenant_pools = 0;
        let mut sum = PoolStats {
            size: 0,
            idle: 0,
            in_use: 0,
        };
        for slot in self.tenants_read().values() {
            if let Some(pool) = slot.pool.get() {
                let s = PoolStats::of(pool);
                tenant_pools += 1;
                sum.size += s.size;
                sum.idle += s.idle;
                sum.in_use += s.in_use;
            }
        }
        PoolTotals {
            core,
            tenant_pools,
            tenant_connections: sum,
        }
    }

    /// Number of slugs tracked, including builds in flight.
    pub fn len(&self) -> usize {
        self.tenants_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.core_read().is_none()
    }

    /// Close every tenant pool and the core pool in parallel. Close failures are
    /// collected into one `Shutdown` error rather than stopping the others.
    /// Calling it again is a no-op.
    pub async fn shutdown_all(&self) -> Result<(), TenancyError> {
        let tenants: Vec<(String, TenantPool)> = {
            let mut map = self.tenants_write();
            self.closed.store(true, Ordering::SeqCst);
            map.drain()
                .filter_map(|(slug, slot)| slot.pool.get().cloned().map(|pool| (slug, pool)))
                .collect()
        };
        let core = self.core_write().take();
        if tenants.is_empty() && core.is_none() {
            return Ok(());
        }

        let timeout = self.config.close_timeout;
        let count = tenants.len();
        let mut closing = JoinSet::new();
        for (slug, pool) in tenants {
            closing.spawn(close_pool(format!("tenant {}", slug), pool, timeout));
        }
        if let Some(pool) = core {
            closing.spawn(close_pool("core".to_string(), pool, timeout));
        }

        let mut failures = Vec::new();
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(msg)) => failures.push(msg),
                Err(e) => failures.push(format!("close task failed: {}", e)),
            }
        }
        if failures.is_empty() {
            tracing::info!(tenant_pools = count, "all pools closed");
            Ok(())
        } else {
            tracing::warn!(failures = failures.len(), "pool shutdown incomplete");
            Err(TenancyError::Shutdown { failures })
        }
    }
}

async fn close_pool(label: String, pool: PgPool, timeout: Duration) -> Result<(), String> {
    match tokio::time::timeout(timeout, pool.close()).await {
        Ok(()) => Ok(()),
        Err(_) => Err(format!("{}: close timed out after {}ms", label, timeout.as_millis())),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn core_pool_before_bootstrap_is_not_initialized() {
        let registry = registry_with(Arc::new(CountingConnector::default()));
        assert!(matches!(registry.get_core_pool(), Err(TenancyError::NotInitialized)));
        registry.get_or_create_core_pool().await.unwrap();
        assert!(registry.get_core_pool().is_ok());
    }

    #[tokio::test]
    async fn core_pool_is_built_once() {
        let connector = Arc::new(CountingConnector {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let registry = registry_with(connector.clone());
        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.spawn(async move { registry.get_or_create_core_pool().await.map(|_| ()) });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }
        assert_eq!(connector.core_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_core_probe_is_not_cached() {
        let connector = Arc::new(CountingConnector {
            core_down: true,
            ..Default::default()
        });
        let registry = registry_with(connector.clone());
        assert!(matches!(
            registry.get_or_create_core_pool().await,
            Err(TenancyError::Connectivity(_))
        ));
        assert!(matches!(registry.get_core_pool(), Err(TenancyError::NotInitialized)));
        let _ = registry.get_or_create_core_pool().await;
        assert_eq!(connector.core_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_first_access_builds_one_tenant_pool() {
        let connector = Arc::new(CountingConnector {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let registry = registry_with(connector.clone());
        let mut tasks = JoinSet::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.spawn(async move { registry.get_or_create_tenant_pool("tzolak").await.map(|_| ()) });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }
        assert_eq!(connector.tenant_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.warm_tenants(), vec!["tzolak".to_string()]);

        registry.get_or_create_tenant_pool("tzolak").await.unwrap();
        assert_eq!(connector.tenant_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_slugs_get_distinct_pools() {
        let connector = Arc::new(CountingConnector::default());
        let registry = registry_with(connector.clone());
        registry.get_or_create_tenant_pool("alpha").await.unwrap();
        registry.get_or_create_tenant_pool("beta").await.unwrap();
        assert_eq!(connector.tenant_calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn missing_tenant_is_not_cached() {
        let connector = Arc::new(CountingConnector {
            missing: ["ghost".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let registry = registry_with(connector.clone());
        for _ in 0..2 {
            let err = registry.get_or_create_tenant_pool("ghost").await.unwrap_err();
            assert!(err.is_tenant_not_found());
        }
        assert_eq!(connector.tenant_calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 0);
        assert!(!registry.is_warm("ghost"));
    }

    #[tokio::test]
    async fn unsafe_slug_never_reaches_the_connector() {
        let connector = Arc::new(CountingConnector::default());
        let registry = registry_with(connector.clone());
        let err = registry
            .get_or_create_tenant_pool("x; DROP SCHEMA public")
            .await
            .unwrap_err();
        assert!(err.is_tenant_not_found());
        assert_eq!(connector.tenant_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_empties_the_registry() {
        let registry = registry_with(Arc::new(CountingConnector::default()));
        registry.get_or_create_core_pool().await.unwrap();
        let pool = registry.get_or_create_tenant_pool("tzolak").await.unwrap();
        registry.get_or_create_tenant_pool("other").await.unwrap();

        registry.shutdown_all().await.unwrap();
        assert!(registry.is_empty());
        assert!(pool.is_closed());

        registry.shutdown_all().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn closed_registry_refuses_new_pools() {
        let registry = registry_with(Arc::new(CountingConnector::default()));
        registry.shutdown_all().await.unwrap();
        assert!(matches!(
            registry.get_or_create_tenant_pool("tzolak").await,
            Err(TenancyError::Closed)
        ));
        assert!(matches!(
            registry.get_or_create_core_pool().await,
            Err(TenancyError::Closed)
        ));
        assert!(matches!(registry.get_core_pool(), Err(TenancyError::Closed)));
    }

    #[tokio::test]
    async fn evict_closes_only_the_named_pool() {
        let connector = Arc::new(CountingConnector::default());
        let registry = registry_with(connector.clone());
        let a = registry.get_or_create_tenant_pool("alpha").await.unwrap();
        let b = registry.get_or_create_tenant_pool("beta").await.unwrap();

        assert!(registry.evict("alpha").await);
        assert!(!registry.evict("alpha").await);
        assert!(a.is_closed());
        assert!(!b.is_closed());

        registry.get_or_create_tenant_pool("alpha").await.unwrap();
        assert_eq!(connector.tenant_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn evict_idle_respects_threshold() {
        let registry = registry_with(Arc::new(CountingConnector::default()));
        registry.get_or_create_tenant_pool("sleepy").await.unwrap();
        assert!(registry.evict_idle(Duration::from_secs(3600)).await.is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.get_or_create_tenant_pool("busy").await.unwrap();
        let evicted = registry.evict_idle(Duration::from_millis(20)).await;
        assert_eq!(evicted, vec!["sleepy".to_string()]);
        assert_eq!(registry.warm_tenants(), vec!["busy".to_string()]);
    }

    #[tokio::test]
    async fn slot_lookup_counts_as_use_for_idle_eviction() {
        let registry = registry_with(Arc::new(CountingConnector::default()));
        registry.get_or_create_tenant_pool("tzolak").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // A caller that has just looked the slot up keeps it alive.
        let _slot = registry.slot_for("tzolak").unwrap();
        assert!(registry.evict_idle(Duration::from_millis(20)).await.is_empty());
        assert!(registry.is_warm("tzolak"));
    }

    #[tokio::test]
    async fn closed_pool_left_in_a_slot_is_replaced() {
        let connector = Arc::new(CountingConnector::default());
        let registry = registry_with(connector.clone());
        let stale = registry.get_or_create_tenant_pool("tzolak").await.unwrap();
        stale.close().await;

        let fresh = registry.get_or_create_tenant_pool("tzolak").await.unwrap();
        assert!(!fresh.is_closed());
        assert_eq!(connector.tenant_calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.warm_tenants(), vec!["tzolak".to_string()]);
    }

    #[tokio::test]
    async fn totals_hide_slugs() {
        let registry = registry_with(Arc::new(CountingConnector::default()));
        registry.get_or_create_tenant_pool("alpha").await.unwrap();
        registry.get_or_create_tenant_pool("beta").await.unwrap();
        let totals = registry.totals();
        assert_eq!(totals.tenant_pools, 2);
        assert_eq!(totals.tenant_connections.in_use, 0);
        assert!(totals.core.is_none());
    }

    #[tokio::test]
    async fn stats_cover_core_and_tenants() {
        let registry = registry_with(Arc::new(CountingConnector::default()));
        assert!(registry.stats().core.is_none());
        registry.get_or_create_core_pool().await.unwrap();
        registry.get_or_create_tenant_pool("tzolak").await.unwrap();
        let stats = registry.stats();
        assert_eq!(stats.core.map(|s| s.in_use), Some(0));
        assert_eq!(stats.tenants.get("tzolak").map(|s| s.in_use), Some(0));
        assert!(registry.tenant_stats("nobody").is_none());
    }
}
