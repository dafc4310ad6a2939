//! Shared application state handed to every route.

use crate::config::TenancyConfig;
use crate::db::Db;
use crate::lifecycle::Lifecycle;
use crate::resolver::TenantResolver;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub resolver: Arc<TenantResolver>,
    pub lifecycle: Arc<Lifecycle>,
}

impl AppState {
    /// State wired to the lifecycle's registry, with a directory-backed resolver.
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        let resolver = Arc::new(TenantResolver::for_registry(lifecycle.registry().clone()));
        Self::with_resolver(lifecycle, resolver)
    }

    pub fn with_resolver(lifecycle: Arc<Lifecycle>, resolver: Arc<TenantResolver>) -> Self {
        AppState {
            db: lifecycle.db(),
            resolver,
            lifecycle,
        }
    }

    pub fn config(&self) -> &TenancyConfig {
        self.db.registry().config()
    }
}
