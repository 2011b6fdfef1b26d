use std::collections::BTreeSet;

use sqlx::{PgConnection, PgPool};

use crate::db::tenant::quote_ident;

pub const TRACKING_TABLE: &str = "schema_migrations";

/// Advisory-lock class for per-schema migration serialization ("MIGR").
const LOCK_CLASS: i32 = 0x4d49_4752;

/// Per-schema record of applied migration versions, stored in
/// `<schema>.schema_migrations` so every schema carries its own history.
pub struct MigrationTracker;

impl MigrationTracker {
    /// Creates the tracking table if missing. Safe under concurrent callers:
    /// creation is serialized by the schema's advisory lock.
    pub async fn ensure_tracking_table(pool: &PgPool, schema: &str) -> sqlx::Result<()> {
        let mut tx = pool.begin().await?;
        Self::lock_schema(&mut tx, schema).await?;
        Self::create_tracking_table(&mut tx, schema).await?;
        tx.commit().await
    }

    pub async fn create_tracking_table(conn: &mut PgConnection, schema: &str) -> sqlx::Result<()> {
        let ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS {}.{TRACKING_TABLE} (
                   version VARCHAR(255) PRIMARY KEY,
                   applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
               )"#,
            quote_ident(schema)
        );
        sqlx::Executor::execute(&mut *conn, ddl.as_str()).await?;
        Ok(())
    }

    /// Versions recorded for `schema`; empty when the tracking table does not
    /// exist yet.
    pub async fn applied_versions(pool: &PgPool, schema: &str) -> sqlx::Result<BTreeSet<String>> {
        let mut conn = pool.acquire().await?;
        Self::applied_versions_on(&mut conn, schema).await
    }

    pub async fn applied_versions_on(
        conn: &mut PgConnection,
        schema: &str,
    ) -> sqlx::Result<BTreeSet<String>> {
        let table = format!("{}.{TRACKING_TABLE}", quote_ident(schema));
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&table)
            .fetch_one(&mut *conn)
            .await?;
        if !exists {
            return Ok(BTreeSet::new());
        }

        let versions: Vec<String> = sqlx::query_scalar(&format!("SELECT version FROM {table}"))
            .fetch_all(&mut *conn)
            .await?;
        Ok(versions.into_iter().collect())
    }

    pub async fn is_applied(conn: &mut PgConnection, schema: &str, version: &str) -> sqlx::Result<bool> {
        sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {}.{TRACKING_TABLE} WHERE version = $1)",
            quote_ident(schema)
        ))
        .bind(version)
        .fetch_one(&mut *conn)
        .await
    }

    /// Recording an already-recorded version is a no-op.
    pub async fn record_applied(conn: &mut PgConnection, schema: &str, version: &str) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {}.{TRACKING_TABLE} (version) VALUES ($1) ON CONFLICT (version) DO NOTHING",
            quote_ident(schema)
        ))
        .bind(version)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Transaction-scoped lock on `schema`; released at commit or rollback.
    pub async fn lock_schema(conn: &mut PgConnection, schema: &str) -> sqlx::Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(LOCK_CLASS)
            .bind(schema)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
