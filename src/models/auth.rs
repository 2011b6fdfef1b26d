use serde::{Deserialize, Serialize};

/// Claims read from an already-issued access token. Only the tenant
/// claims matter here; issuance lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_slug: Option<String>,
    /// `tenant_<slug>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_schema: Option<String>,
    pub exp: usize,
}
