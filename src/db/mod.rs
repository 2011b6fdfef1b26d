pub mod tenant;

use std::ops::{Deref, DerefMut};

use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres};

use tenant::{quote_ident, PUBLIC_SCHEMA};

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = pool_options(max_connections).connect(database_url).await?;
    Ok(pool)
}

/// Pool options shared by the server and the migrate tool. Connections come
/// back from a tenant binding with a custom `search_path`; it is reset on
/// release, and a connection that cannot be reset is closed instead of reused.
pub fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .after_release(|conn, _meta| {
            Box::pin(async move {
                match sqlx::Executor::execute(&mut *conn, "RESET search_path").await {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not reset search_path, discarding connection");
                        Ok(false)
                    }
                }
            })
        })
}

/// The `search_path` value that makes `schema` the only namespace reachable
/// by unqualified names. Shared data in `public` must be schema-qualified.
pub fn search_path_for(schema: &str) -> String {
    if schema == PUBLIC_SCHEMA {
        PUBLIC_SCHEMA.to_string()
    } else {
        quote_ident(schema)
    }
}

/// A pooled connection whose `search_path` is bound to one schema for as
/// long as it is held.
pub struct TenantConnection {
    conn: PoolConnection<Postgres>,
    schema: String,
}

impl TenantConnection {
    pub async fn acquire(pool: &PgPool, schema: &str) -> sqlx::Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("SELECT set_config('search_path', $1, false)")
            .bind(search_path_for(schema))
            .execute(&mut *conn)
            .await?;
        Ok(Self {
            conn,
            schema: schema.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

impl Deref for TenantConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for TenantConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_database_url, unique_slug};

    #[test]
    fn tenant_search_path_excludes_public() {
        assert_eq!(search_path_for("tenant_acme-co"), "\"tenant_acme-co\"");
        assert_eq!(search_path_for("public"), "public");
    }

    #[tokio::test]
    #[ignore] // needs TEST_DATABASE_URL
    async fn binding_lasts_until_release_then_resets() {
        // One connection, so the second acquire gets the same one back.
        let pool = pool_options(1).connect(&test_database_url()).await.unwrap();
        let schema = tenant::schema_name(&unique_slug("conn"));
        tenant::create_namespace(&pool, &schema).await.unwrap();

        let mut conn = TenantConnection::acquire(&pool, &schema).await.unwrap();
        let current: String = sqlx::query_scalar("SELECT current_schema()")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(current, schema);
        assert_eq!(conn.schema(), schema);
        drop(conn);

        let mut conn = pool.acquire().await.unwrap();
        let current: String = sqlx::query_scalar("SELECT current_schema()")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(current, "public");
        drop(conn);

        tenant::destroy_namespace(&pool, &schema).await.unwrap();
    }
}
