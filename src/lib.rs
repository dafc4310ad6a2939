//! Tavern tenancy: per-tenant PostgreSQL pools, hostname tenant resolution and a
//! narrow query/transaction facade for a physical-database-per-tenant platform.

pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod extractors;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod response;
pub mod routes;
pub mod schema;
pub mod sql;
pub mod state;

pub use config::{from_env, from_lookup, TenancyConfig, TenantIsolation};
pub use db::{Db, UnitOfWork};
pub use directory::{ensure_database_exists, ensure_directory, TenantAdmin, TenantRecord};
pub use error::TenancyError;
pub use extractors::{RequireTenant, ResolvedTenant};
pub use lifecycle::{shutdown_signal, Lifecycle, Phase};
pub use logging::init_tracing;
pub use registry::{CorePool, PgConnector, PoolConnector, PoolRegistry, PoolStats, PoolTotals, TenantPool};
pub use resolver::{PgTenantDirectory, TenantContext, TenantDirectory, TenantResolver};
pub use routes::{app_router, common_routes, tenant_routes};
pub use schema::schema_name_for;
pub use sql::{rows_to_json, SqlParam};
pub use state::AppState;
