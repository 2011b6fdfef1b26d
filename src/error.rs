use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Input rejected before any storage or schema mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Slug '{0}' must be 2-56 characters of lowercase letters, digits and hyphens, without a leading or trailing hyphen")]
    InvalidSlug(String),

    #[error("Slug '{0}' is reserved")]
    ReservedSlug(String),

    #[error("Tenant name is required")]
    EmptyName,

    #[error("Invalid admin email address")]
    InvalidEmail,

    #[error("Admin password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("A tenant with slug '{0}' already exists")]
    DuplicateSlug(String),

    #[error("A tenant with admin email '{0}' already exists")]
    DuplicateEmail(String),

    #[error("Tenant '{0}' has not finished provisioning and cannot be activated")]
    Unprovisioned(String),
}

impl ValidationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::DuplicateSlug(_) | Self::DuplicateEmail(_))
    }
}

/// A migration source that cannot be turned into a definition.
#[derive(Debug, thiserror::Error)]
pub enum MalformedMigrationError {
    #[error("{path}: missing scope header (expected `-- scope: public|tenant|both`)")]
    MissingScope { path: String },

    #[error("{path}: unknown scope '{scope}' (expected public, tenant or both)")]
    UnknownScope { path: String, scope: String },

    #[error("{path}: header key '{key}' appears more than once")]
    RepeatedHeader { path: String, key: String },

    #[error("{path}: no version header and no file name to derive one from")]
    MissingVersion { path: String },

    #[error("{path}: forward body is empty")]
    EmptyBody { path: String },

    #[error("version {version} is defined by both {first} and {second}")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    #[error("could not read migration source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a migration did not apply.
#[derive(Debug, thiserror::Error)]
pub enum MigrationFailure {
    #[error("schema does not exist")]
    MissingSchema,

    #[error("scope '{0}' does not apply to this schema")]
    ScopeMismatch(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A specific version failed against a specific schema. `version` is `None`
/// when the failure happened in tracking-table bookkeeping.
#[derive(Debug, thiserror::Error)]
#[error("migration {} failed on schema {schema}: {reason}", .version.as_deref().unwrap_or("bookkeeping"))]
pub struct MigrationError {
    pub schema: String,
    pub version: Option<String>,
    #[source]
    pub reason: MigrationFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum TenancyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Refusing to {operation} reserved namespace '{schema}'")]
    ReservedNamespace {
        schema: String,
        operation: &'static str,
    },

    #[error("Could not {operation} schema {schema}: {source}")]
    Provisioning {
        schema: String,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Could not seed tenant data in {schema}: {reason}")]
    Seeding { schema: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TenancyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(v) if v.is_conflict() => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ReservedNamespace { .. } => StatusCode::BAD_REQUEST,
            Self::Provisioning { .. }
            | Self::Migration(_)
            | Self::Seeding { .. }
            | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failure to bind a request to a tenant.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Tenant identification required. Use subdomain, X-Tenant-Slug header, or ?tenant= parameter")]
    NoTenant,

    #[error("Invalid tenant identifier '{0}'")]
    InvalidSelector(String),

    #[error("Tenant '{0}' not found")]
    NotFound(String),

    #[error("Tenant '{0}' is inactive")]
    Inactive(String),

    #[error("Tenant lookup failed: {0}")]
    Directory(#[source] TenancyError),
}

impl ResolveError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoTenant | Self::InvalidSelector(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Inactive(_) => StatusCode::FORBIDDEN,
            Self::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
