pub mod common;
pub mod tenant;

pub use common::common_routes;
pub use tenant::tenant_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Every route this crate serves, with HTTP request tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(tenant_routes(state))
        .layer(TraceLayer::new_for_http())
}
