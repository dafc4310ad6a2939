//! Tenant-aware routes: who am I, a schema round trip, pool stats.

use crate::error::TenancyError;
use crate::extractors::tenant::{RequireTenant, ResolvedTenant};
use crate::response::{success_one_ok, success_with_meta};
use crate::sql::rows_to_json;
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, routing::get, Router};

/// GET /tenant: the resolved tenant, or `null` on the main site.
async fn current_tenant(ResolvedTenant(tenant): ResolvedTenant) -> impl IntoResponse {
    success_one_ok(tenant)
}

/// GET /tenant/ping: one query on the tenant's own pool.
async fn ping_tenant(
    State(state): State<AppState>,
    RequireTenant(ctx): RequireTenant,
) -> Result<impl IntoResponse, TenancyError> {
    let rows = state
        .db
        .tenant_query(&ctx.slug, "SELECT current_schema() AS schema", &[])
        .await?;
    let pool = state.db.tenant_stats(&ctx.slug);
    Ok(success_with_meta(
        rows_to_json(&rows)?,
        serde_json::json!({ "tenant": ctx, "pool": pool }),
    ))
}

/// GET /pools: aggregate connection counts. Never lists slugs: a warm pool may
/// belong to a library that has since been disabled.
async fn pool_stats(State(state): State<AppState>) -> impl IntoResponse {
    success_one_ok(state.db.registry().totals())
}

pub fn tenant_routes(state: AppState) -> Router {
    Router::new()
        .route("/tenant", get(current_tenant))
        .route("/tenant/ping", get(ping_tenant))
        .route("/pools", get(pool_stats))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenancyConfig;
    use crate::lifecycle::Lifecycle;
    use crate::registry::testing::CountingConnector;
    use crate::resolver::testing::MemoryDirectory;
    use crate::resolver::TenantResolver;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state(dir: Arc<MemoryDirectory>) -> AppState {
        let config = TenancyConfig::with_database_url("postgres://127.0.0.1:1/core");
        let lifecycle = Lifecycle::bootstrap_with(config, Arc::new(CountingConnector::default()))
            .await
            .unwrap();
        let lifecycle = Arc::new(lifecycle);
        let resolver = Arc::new(TenantResolver::new(lifecycle.registry().config().clone(), dir));
        AppState::with_resolver(lifecycle, resolver)
    }

    async fn get(state: &AppState, uri: &str, host: &str, slug: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().uri(uri).header("host", host);
        if let Some(slug) = slug {
            req = req.header(crate::extractors::tenant::TENANT_SLUG_HEADER, slug);
        }
        let resp = tenant_routes(state.clone())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn resolves_tenant_from_host() {
        let dir = Arc::new(MemoryDirectory::with(&[("tzolak", "abc-123", true)]));
        let state = state(dir).await;
        let (status, body) = get(&state, "/tenant", "tzolak.gametaverns.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["slug"], "tzolak");
        assert_eq!(body["data"]["id"], "abc-123");
        assert_eq!(body["data"]["schema_name"], "tenant_tzolak");

        let (status, body) = get(&state, "/tenant", "gametaverns.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn slug_header_only_counts_on_loopback() {
        let dir = Arc::new(MemoryDirectory::with(&[("tzolak", "abc-123", true)]));
        let state = state(dir).await;
        let (_, body) = get(&state, "/tenant", "localhost:3000", Some("tzolak")).await;
        assert_eq!(body["data"]["slug"], "tzolak");

        let (_, body) = get(&state, "/tenant", "other.gametaverns.com", Some("tzolak")).await;
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn disabled_and_missing_libraries_look_identical() {
        let dir = Arc::new(MemoryDirectory::with(&[("tzolak", "abc-123", false)]));
        let state = state(dir).await;
        let disabled = get(&state, "/tenant/ping", "tzolak.gametaverns.com", None).await;
        let missing = get(&state, "/tenant/ping", "nosuch.gametaverns.com", None).await;
        assert_eq!(disabled.0, StatusCode::NOT_FOUND);
        assert_eq!(disabled, missing);
        assert_eq!(disabled.1["error"]["message"], "library not found");
    }

    #[tokio::test]
    async fn pool_stats_do_not_name_tenants() {
        let dir = Arc::new(MemoryDirectory::with(&[("secretlib", "s-1", true)]));
        let state = state(dir.clone()).await;
        state.db.registry().get_or_create_tenant_pool("secretlib").await.unwrap();
        dir.set("secretlib", "s-1", false);

        let (status, body) = get(&state, "/pools", "anything.example.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.to_string().contains("secretlib"));
        assert_eq!(body["data"]["tenant_pools"], 1);
        assert_eq!(body["data"]["tenant_connections"]["in_use"], 0);
        assert_eq!(body["data"]["core"]["in_use"], 0);

        let (_, body) = get(&state, "/tenant", "secretlib.gametaverns.com", None).await;
        assert!(body["data"].is_null());
    }
}
