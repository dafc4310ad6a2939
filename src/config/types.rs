//! Tenancy settings, read once at startup.

use crate::error::TenancyError;
use std::collections::BTreeSet;
use std::time::Duration;

/// Subdomains that are never tenant slugs, whatever the directory says.
pub const BUILTIN_RESERVED_SUBDOMAINS: &[&str] = &[
    "www", "api", "mail", "admin", "app", "dashboard", "static", "cdn", "smtp", "ftp",
];

/// How a tenant's data is isolated on the database server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TenantIsolation {
    /// Tenant has its own schema on the core server; pools pin `search_path` to it.
    Schema,
    /// Tenant has its own database on the core server, named like the schema would be.
    Database,
}

impl std::str::FromStr for TenantIsolation {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "schema" => Ok(TenantIsolation::Schema),
            "database" => Ok(TenantIsolation::Database),
            _ => Err(TenancyError::Configuration(format!(
                "invalid tenant isolation: {} (expected schema or database)",
                s
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TenancyConfig {
    /// Core database connection string.
    pub database_url: String,
    pub core_max_connections: u32,
    /// Per-tenant cap; bounds aggregate connections when many tenants are warm.
    pub tenant_max_connections: u32,
    pub acquire_timeout: Duration,
    /// Sent to the server as `statement_timeout` and used as the client-side query bound.
    pub statement_timeout: Duration,
    /// Bound on closing one pool during shutdown.
    pub close_timeout: Duration,
    /// `None` disables idle eviction of tenant pools.
    pub tenant_idle_timeout: Option<Duration>,
    /// e.g. `gametaverns.com`
    pub root_domain: String,
    pub reserved_subdomains: BTreeSet<String>,
    pub schema_prefix: String,
    pub isolation: TenantIsolation,
    /// Schema holding the tenant directory table.
    pub core_schema: String,
    /// `None` disables negative-result caching in the resolver.
    pub negative_cache_ttl: Option<Duration>,
}

impl TenancyConfig {
    /// Defaults for everything except the connection string.
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        TenancyConfig {
            database_url: database_url.into(),
            core_max_connections: 20,
            tenant_max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(15),
            close_timeout: Duration::from_secs(10),
            tenant_idle_timeout: None,
            root_domain: "gametaverns.com".into(),
            reserved_subdomains: BUILTIN_RESERVED_SUBDOMAINS.iter().map(|s| s.to_string()).collect(),
            schema_prefix: "tenant_".into(),
            isolation: TenantIsolation::Schema,
            core_schema: "public".into(),
            negative_cache_ttl: Some(Duration::from_secs(30)),
        }
    }

    pub fn is_reserved(&self, label: &str) -> bool {
        self.reserved_subdomains.contains(label)
    }
}
