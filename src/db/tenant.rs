use sqlx::{Executor, PgExecutor, PgPool};

use crate::error::TenancyError;

pub const PUBLIC_SCHEMA: &str = "public";
pub const SCHEMA_PREFIX: &str = "tenant_";

/// Longest slug whose schema name still fits PostgreSQL's 63-byte identifier limit.
pub const MAX_SLUG_LEN: usize = 63 - SCHEMA_PREFIX.len();

/// Returns the PostgreSQL schema name for a given tenant slug.
pub fn schema_name(slug: &str) -> String {
    format!("{SCHEMA_PREFIX}{slug}")
}

/// Inverse of [`schema_name`], used for token claims that carry the schema.
pub fn slug_from_schema(schema: &str) -> Option<&str> {
    schema.strip_prefix(SCHEMA_PREFIX).filter(|s| !s.is_empty())
}

/// Lowercase ASCII letters, digits and hyphens, no leading or trailing hyphen,
/// 2 to [`MAX_SLUG_LEN`] characters.
pub fn is_valid_slug(s: &str) -> bool {
    let len = s.len();
    (2..=MAX_SLUG_LEN).contains(&len)
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `public` (in any case) and the system catalogs can never be dropped here.
pub fn is_reserved_namespace(schema: &str) -> bool {
    let lower = schema.to_ascii_lowercase();
    lower == PUBLIC_SCHEMA || lower == "information_schema" || lower.starts_with("pg_")
}

pub async fn namespace_exists<'e, E>(executor: E, schema: &str) -> sqlx::Result<bool>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = $1)")
        .bind(schema)
        .fetch_one(executor)
        .await
}

/// Idempotent: an existing schema is left as is.
pub async fn create_namespace(pool: &PgPool, schema: &str) -> Result<(), TenancyError> {
    let ddl = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
    pool.execute(ddl.as_str())
        .await
        .map_err(|source| TenancyError::Provisioning {
            schema: schema.to_string(),
            operation: "create",
            source,
        })?;

    tracing::info!(schema, "Created tenant schema");
    Ok(())
}

/// Drops the schema and everything in it. Irreversible.
pub async fn destroy_namespace(pool: &PgPool, schema: &str) -> Result<(), TenancyError> {
    if is_reserved_namespace(schema) {
        return Err(TenancyError::ReservedNamespace {
            schema: schema.to_string(),
            operation: "destroy",
        });
    }

    let ddl = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema));
    pool.execute(ddl.as_str())
        .await
        .map_err(|source| TenancyError::Provisioning {
            schema: schema.to_string(),
            operation: "destroy",
            source,
        })?;

    tracing::info!(schema, "Dropped tenant schema");
    Ok(())
}

/// Administrator row inserted into a freshly migrated tenant schema.
pub struct AdminSeed<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub full_name: Option<&'a str>,
    pub password_hash: &'a str,
}

pub async fn seed_admin(pool: &PgPool, schema: &str, admin: &AdminSeed<'_>) -> Result<(), TenancyError> {
    let schema_ident = quote_ident(schema);
    sqlx::query(&format!(
        r#"INSERT INTO {schema_ident}.users (email, username, full_name, hashed_password, is_active, is_admin)
           VALUES ($1, $2, $3, $4, TRUE, TRUE)"#
    ))
    .bind(admin.email)
    .bind(admin.username)
    .bind(admin.full_name)
    .bind(admin.password_hash)
    .execute(pool)
    .await
    .map_err(|e| TenancyError::Seeding {
        schema: schema.to_string(),
        reason: e.to_string(),
    })?;

    tracing::info!(schema, username = admin.username, "Seeded tenant administrator");
    Ok(())
}
