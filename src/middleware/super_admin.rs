use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::AppState;

pub const SUPER_ADMIN_HEADER: &str = "X-Super-Admin-Key";

/// Extractor that validates the `X-Super-Admin-Key` header against
/// `config.super_admin_key`. Every request is refused when no key is configured.
pub struct SuperAdminAuth;

impl FromRequestParts<AppState> for SuperAdminAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state
            .config
            .super_admin_key
            .as_deref()
            .ok_or((StatusCode::FORBIDDEN, "Tenant administration is disabled"))?;

        let key = parts
            .headers
            .get(SUPER_ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing X-Super-Admin-Key header"))?;

        if key != expected {
            tracing::warn!("Rejected request with invalid super-admin key");
            return Err((StatusCode::UNAUTHORIZED, "Invalid super-admin key"));
        }

        Ok(SuperAdminAuth)
    }
}
