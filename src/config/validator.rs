//! Sanity checks on a loaded [`TenancyConfig`].

use crate::config::types::TenancyConfig;
use crate::error::TenancyError;
use crate::schema::validate_prefix;
use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;

pub fn validate(config: &TenancyConfig) -> Result<(), TenancyError> {
    PgConnectOptions::from_str(&config.database_url)
        .map_err(|e| TenancyError::Configuration(format!("invalid DATABASE_URL: {}", e)))?;
    if config.core_max_connections == 0 {
        return Err(TenancyError::Configuration("core pool needs at least one connection".into()));
    }
    if config.tenant_max_connections == 0 {
        return Err(TenancyError::Configuration("tenant pools need at least one connection".into()));
    }
    if config.tenant_max_connections > config.core_max_connections {
        tracing::warn!(
            tenant = config.tenant_max_connections,
            core = config.core_max_connections,
            "per-tenant pool cap exceeds the core pool cap"
        );
    }
    validate_prefix(&config.schema_prefix)?;
    if !is_identifier(&config.core_schema) {
        return Err(TenancyError::Configuration(format!(
            "invalid CORE_SCHEMA: {:?}",
            config.core_schema
        )));
    }
    let domain_ok = !config.root_domain.is_empty()
        && config.root_domain.contains('.')
        && config
            .root_domain
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if !domain_ok {
        return Err(TenancyError::Configuration(format!(
            "invalid PLATFORM_ROOT_DOMAIN: {:?}",
            config.root_domain
        )));
    }
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    s.chars().next().map(|c| c.is_ascii_lowercase() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_defaults() {
        assert!(validate(&TenancyConfig::with_database_url("postgres://localhost/core")).is_ok());
    }

    #[test]
    fn rejects_bad_url_and_domain() {
        let c = TenancyConfig::with_database_url("not a url");
        assert!(validate(&c).is_err());

        let mut c = TenancyConfig::with_database_url("postgres://localhost/core");
        c.root_domain = "localhost".into();
        assert!(validate(&c).is_err());
        c.root_domain = "game..com".into();
        assert!(validate(&c).is_err());
    }

    #[test]
    fn rejects_bad_core_schema() {
        let mut c = TenancyConfig::with_database_url("postgres://localhost/core");
        c.core_schema = "public; drop".into();
        assert!(validate(&c).is_err());
    }
}
