//! Load [`TenancyConfig`] from the process environment (with `.env` support).

use crate::config::types::{TenancyConfig, TenantIsolation};
use crate::config::validate;
use crate::error::TenancyError;
use std::str::FromStr;
use std::time::Duration;

/// Read config from the environment, loading `.env` first if present.
pub fn from_env() -> Result<TenancyConfig, TenancyError> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build config from any key lookup. Empty values count as unset.
pub fn from_lookup<F>(lookup: F) -> Result<TenancyConfig, TenancyError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let database_url = get("DATABASE_URL")
        .ok_or_else(|| TenancyError::Configuration("DATABASE_URL is not set".into()))?;
    let mut config = TenancyConfig::with_database_url(database_url);

    if let Some(v) = get("CORE_POOL_MAX_CONNECTIONS") {
        config.core_max_connections = parse_num("CORE_POOL_MAX_CONNECTIONS", &v)?;
    }
    if let Some(v) = get("TENANT_POOL_MAX_CONNECTIONS") {
        config.tenant_max_connections = parse_num("TENANT_POOL_MAX_CONNECTIONS", &v)?;
    }
    if let Some(v) = get("POOL_ACQUIRE_TIMEOUT_MS") {
        config.acquire_timeout = Duration::from_millis(parse_num("POOL_ACQUIRE_TIMEOUT_MS", &v)?);
    }
    if let Some(v) = get("STATEMENT_TIMEOUT_MS") {
        config.statement_timeout = Duration::from_millis(parse_num("STATEMENT_TIMEOUT_MS", &v)?);
    }
    if let Some(v) = get("POOL_CLOSE_TIMEOUT_MS") {
        config.close_timeout = Duration::from_millis(parse_num("POOL_CLOSE_TIMEOUT_MS", &v)?);
    }
    if let Some(v) = get("TENANT_POOL_IDLE_SECS") {
        let secs: u64 = parse_num("TENANT_POOL_IDLE_SECS", &v)?;
        config.tenant_idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(v) = get("PLATFORM_ROOT_DOMAIN") {
        config.root_domain = v.trim_end_matches('.').to_lowercase();
    }
    if let Some(v) = get("RESERVED_SUBDOMAINS") {
        config
            .reserved_subdomains
            .extend(v.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()));
    }
    if let Some(v) = get("TENANT_SCHEMA_PREFIX") {
        config.schema_prefix = v;
    }
    if let Some(v) = get("TENANT_ISOLATION") {
        config.isolation = TenantIsolation::from_str(&v)?;
    }
    if let Some(v) = get("CORE_SCHEMA") {
        config.core_schema = v;
    }
    if let Some(v) = get("RESOLVER_NEGATIVE_TTL_SECS") {
        let secs: u64 = parse_num("RESOLVER_NEGATIVE_TTL_SECS", &v)?;
        config.negative_cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
    }

    validate(&config)?;
    Ok(config)
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, TenancyError> {
    value
        .parse()
        .map_err(|_| TenancyError::Configuration(format!("{} must be a non-negative integer, got {:?}", key, value)))
}
