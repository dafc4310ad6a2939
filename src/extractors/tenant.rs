//! Resolve the request's tenant from its `Host` header.

use crate::error::TenancyError;
use crate::resolver::{classify_host, HostShape, TenantContext};
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::HOST, request::Parts},
};

/// Header selecting a tenant explicitly. Only honored on loopback hosts (local development).
pub const TENANT_SLUG_HEADER: &str = "X-Tenant-Slug";

/// The resolved tenant, or `None` for the main site and anything unrecognized.
#[derive(Clone, Debug)]
pub struct ResolvedTenant(pub Option<TenantContext>);

/// Like [`ResolvedTenant`] but rejects with "library not found" when there is no tenant.
#[derive(Clone, Debug)]
pub struct RequireTenant(pub TenantContext);

fn request_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.host().map(str::to_string))
}

fn header_slug(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(TENANT_SLUG_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for ResolvedTenant {
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(host) = request_host(parts) else {
            return Ok(ResolvedTenant(None));
        };
        let root = &state.config().root_domain;
        let tenant = match (classify_host(&host, root), header_slug(parts)) {
            (HostShape::Loopback, Some(slug)) => state.resolver.resolve_slug(&slug).await?,
            _ => state.resolver.resolve(&host).await?,
        };
        Ok(ResolvedTenant(tenant))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequireTenant {
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match ResolvedTenant::from_request_parts(parts, state).await? {
            ResolvedTenant(Some(ctx)) => Ok(RequireTenant(ctx)),
            ResolvedTenant(None) => Err(TenancyError::tenant_not_found(
                request_host(parts).unwrap_or_default(),
            )),
        }
    }
}
