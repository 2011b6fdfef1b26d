use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Directory entry in `public.tenants`. Each tenant owns the schema named
/// `schema_name`, which is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub schema_name: String,
    pub admin_email: String,
    pub admin_name: Option<String>,
    pub is_active: bool,
    pub is_trial: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub settings: Option<Value>,
    /// NULL until the create workflow completes; a NULL here marks a
    /// half-created entry that needs operator attention.
    pub provisioned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_provisioned(&self) -> bool {
        self.provisioned_at.is_some()
    }
}

#[derive(Clone, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub slug: String,
    pub admin_email: String,
    pub admin_name: Option<String>,
    pub admin_password: String,
}

/// Row reserved by the create workflow before its schema exists.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub schema_name: String,
    pub admin_email: String,
    pub admin_name: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    /// `Some(false)` converts a trial into a permanent account and clears `trial_ends_at`.
    pub is_trial: Option<bool>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub settings: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListTenantsQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}
