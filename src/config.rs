use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// HS256 secret used to validate bearer tokens carrying tenant claims.
    /// Without it, token claims are never consulted during tenant resolution.
    pub jwt_secret: Option<String>,
    /// Tenant administration is disabled when unset.
    pub super_admin_key: Option<String>,
    pub db_max_connections: u32,
    /// Read migrations from this directory instead of the compiled-in catalog.
    pub migrations_dir: Option<PathBuf>,
    /// Number of tenant schemas migrated in parallel by bulk runs.
    pub migration_concurrency: usize,
    pub trial_days: i64,
    pub bcrypt_cost: u32,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".into())
                .parse()?,
            jwt_secret: optional("JWT_SECRET"),
            super_admin_key: optional("SUPER_ADMIN_KEY"),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".into())
                .parse()?,
            migrations_dir: optional("MIGRATIONS_DIR").map(PathBuf::from),
            migration_concurrency: env::var("MIGRATION_CONCURRENCY")
                .unwrap_or_else(|_| "4".into())
                .parse::<usize>()?
                .max(1),
            trial_days: env::var("TRIAL_DAYS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            bcrypt_cost: env::var("BCRYPT_COST")
                .unwrap_or_else(|_| bcrypt::DEFAULT_COST.to_string())
                .parse()?,
            migrate_on_startup: parse_bool("MIGRATE_ON_STARTUP", true)?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_bool(key: &str, default: bool) -> anyhow::Result<bool> {
    match optional(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("Invalid boolean for {key}: {v}"),
    }
}
