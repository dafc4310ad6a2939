//! Tenant directory DDL and administration. The directory (`libraries`) lives in
//! the core database under `CORE_SCHEMA`; tenant data lives in `tenant_<slug>`.

use crate::config::TenantIsolation;
use crate::db::Db;
use crate::error::TenancyError;
use crate::resolver::TenantResolver;
use crate::schema::{quote_ident, schema_name_for};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// One row of the tenant directory.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct TenantRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Create the core schema and the `libraries` directory table if missing.
pub async fn ensure_directory(db: &Db) -> Result<(), TenancyError> {
    let core_schema = quote_ident(&db.registry().config().core_schema);
    db.core_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", core_schema), &[])
        .await?;
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.libraries (
            id UUID PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT true,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        core_schema
    );
    db.core_execute(&ddl, &[]).await?;
    Ok(())
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before bootstrapping the core pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), TenancyError> {
    let opts = sqlx::postgres::PgConnectOptions::from_str(database_url)
        .map_err(|e| TenancyError::Configuration(format!("invalid DATABASE_URL: {}", e)))?;
    let db_name = opts.get_database().unwrap_or("").to_string();
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let mut conn = opts
        .database("postgres")
        .connect()
        .await
        .map_err(|e| TenancyError::Connectivity(format!("admin connection: {}", e)))?;
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists {
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "created core database");
    }
    Ok(())
}

/// Directory administration. Every multi-step change runs in one core transaction.
#[derive(Clone)]
pub struct TenantAdmin {
    db: Db,
    resolver: Arc<TenantResolver>,
}

impl TenantAdmin {
    pub fn new(db: Db, resolver: Arc<TenantResolver>) -> Self {
        TenantAdmin { db, resolver }
    }

    fn table(&self) -> String {
        format!("{}.libraries", quote_ident(&self.db.registry().config().core_schema))
    }

    fn isolation(&self) -> TenantIsolation {
        self.db.registry().config().isolation
    }

    /// Register a tenant and create its schema (or database).
    pub async fn provision_tenant(&self, slug: &str, name: &str) -> Result<TenantRecord, TenancyError> {
        let schema = schema_name_for(&self.db.registry().config().schema_prefix, slug)?;
        let insert = format!(
            "INSERT INTO {} (id, slug, name, is_active) VALUES ($1, $2, $3, true) \
             RETURNING id, slug, name, is_active, created_at",
            self.table()
        );
        let id = Uuid::new_v4();

        let record = match self.isolation() {
            TenantIsolation::Schema => {
                let (slug, name) = (slug.to_string(), name.to_string());
                let create = format!("CREATE SCHEMA {}", quote_ident(&schema));
                self.db
                    .with_core_transaction(move |conn| {
                        Box::pin(async move {
                            let record: TenantRecord = sqlx::query_as(&insert)
                                .bind(id)
                                .bind(&slug)
                                .bind(&name)
                                .fetch_one(&mut *conn)
                                .await?;
                            sqlx::query(&create).execute(&mut *conn).await?;
                            Ok::<_, TenancyError>(record)
                        })
                    })
                    .await?
            }
            TenantIsolation::Database => {
                // CREATE DATABASE cannot run inside a transaction.
                self.db
                    .core_execute(&format!("CREATE DATABASE {}", quote_ident(&schema)), &[])
                    .await?;
                let (slug_owned, name) = (slug.to_string(), name.to_string());
                let inserted = self
                    .db
                    .with_core_transaction(move |conn| {
                        Box::pin(async move {
                            let record: TenantRecord = sqlx::query_as(&insert)
                                .bind(id)
                                .bind(&slug_owned)
                                .bind(&name)
                                .fetch_one(&mut *conn)
                                .await?;
                            Ok::<_, TenancyError>(record)
                        })
                    })
                    .await;
                match inserted {
                    Ok(record) => record,
                    Err(e) => {
                        let drop = format!("DROP DATABASE IF EXISTS {}", quote_ident(&schema));
                        if let Err(cleanup) = self.db.core_execute(&drop, &[]).await {
                            tracing::error!(slug, error = %cleanup, "could not drop database after failed provisioning");
                        }
                        return Err(e);
                    }
                }
            }
        };

        self.resolver.forget(slug);
        tracing::info!(slug, schema = %schema, "tenant provisioned");
        Ok(record)
    }

    /// Enable or disable a tenant. Returns false when the slug is unknown.
    pub async fn set_tenant_active(&self, slug: &str, active: bool) -> Result<bool, TenancyError> {
        let sql = format!("UPDATE {} SET is_active = $1 WHERE slug = $2", self.table());
        let updated = self
            .db
            .core_execute(&sql, &[active.into(), slug.into()])
            .await?;
        if active {
            self.resolver.forget(slug);
        }
        tracing::info!(slug, active, "tenant active flag changed");
        Ok(updated > 0)
    }

    /// Remove a tenant's directory row and its data, then close its pool.
    /// Returns false when the slug is unknown.
    pub async fn decommission_tenant(&self, slug: &str) -> Result<bool, TenancyError> {
        let schema = schema_name_for(&self.db.registry().config().schema_prefix, slug)?;
        let delete = format!("DELETE FROM {} WHERE slug = $1", self.table());
        let isolation = self.isolation();
        let drop_schema = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(&schema));
        let slug_owned = slug.to_string();

        let removed = self
            .db
            .with_core_transaction(move |conn| {
                Box::pin(async move {
                    let done = sqlx::query(&delete).bind(&slug_owned).execute(&mut *conn).await?;
                    if done.rows_affected() == 0 {
                        return Ok::<_, TenancyError>(false);
                    }
                    if isolation == TenantIsolation::Schema {
                        sqlx::query(&drop_schema).execute(&mut *conn).await?;
                    }
                    Ok(true)
                })
            })
            .await?;
        if !removed {
            return Ok(false);
        }

        self.db.registry().evict(slug).await;
        if isolation == TenantIsolation::Database {
            let drop = format!("DROP DATABASE IF EXISTS {}", quote_ident(&schema));
            self.db.core_execute(&drop, &[]).await?;
        }
        tracing::info!(slug, "tenant decommissioned");
        Ok(true)
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantRecord>, TenancyError> {
        let pool = self.db.registry().get_core_pool()?;
        let sql = format!(
            "SELECT id, slug, name, is_active, created_at FROM {} ORDER BY slug",
            self.table()
        );
        let rows = sqlx::query_as::<_, TenantRecord>(&sql).fetch_all(&pool).await?;
        Ok(rows)
    }
}
