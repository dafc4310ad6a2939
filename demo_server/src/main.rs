//! Demo server: bootstraps the core pool, serves tenant-aware routes, and closes
//! every pool on Ctrl+C / SIGTERM.
//!
//! Run from repo root: `cargo run -p demo-server`

use std::sync::Arc;
use tavern_tenancy::{
    app_router, ensure_database_exists, ensure_directory, from_env, init_tracing, shutdown_signal,
    AppState, Lifecycle,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("tavern_tenancy=info,demo_server=info");

    let config = from_env()?;
    ensure_database_exists(&config.database_url).await?;
    let lifecycle = Arc::new(Lifecycle::bootstrap(config).await?);
    let state = AppState::new(lifecycle.clone());
    ensure_directory(&state.db).await?;

    let app = app_router(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    lifecycle.mark_serving()?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    lifecycle.shutdown().await?;
    served?;
    Ok(())
}
