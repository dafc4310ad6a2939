//! Slug validation and the single slug -> schema name mapping.

use crate::error::TenancyError;
use regex::Regex;
use std::sync::OnceLock;

/// PostgreSQL truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

fn slug_pattern() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("slug pattern is valid")
    })
}

/// True when `slug` is a DNS-label shaped tenant slug: lowercase ASCII, digits and inner hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    slug_pattern().is_match(slug)
}

pub fn validate_slug(slug: &str) -> Result<(), TenancyError> {
    if is_valid_slug(slug) {
        Ok(())
    } else {
        Err(TenancyError::tenant_not_found(slug))
    }
}

/// Physical schema (or database) name for a tenant, e.g. `tenant_` + `tzolak` -> `tenant_tzolak`.
/// Hyphens become underscores so the result never needs quoting.
pub fn schema_name_for(prefix: &str, slug: &str) -> Result<String, TenancyError> {
    validate_slug(slug)?;
    let name = format!("{}{}", prefix, slug.replace('-', "_"));
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(TenancyError::tenant_not_found(slug));
    }
    Ok(name)
}

/// Checks a configured prefix: must start with a letter and contain only `[a-z0-9_]`.
pub fn validate_prefix(prefix: &str) -> Result<(), TenancyError> {
    let ok = prefix.chars().next().map(|c| c.is_ascii_lowercase()).unwrap_or(false)
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TenancyError::Configuration(format!(
            "invalid tenant schema prefix: {:?}",
            prefix
        )))
    }
}

/// Double-quoted identifier for DDL, where bind parameters are not allowed.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
