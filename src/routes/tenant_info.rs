use axum::Json;
use serde_json::{json, Value};

use crate::{
    context::TenantContext,
    error::TenancyError,
    middleware::tenant::{CurrentTenant, TenantDb},
};

/// Echoes the tenant this request was bound to.
pub async fn current_tenant(CurrentTenant(ctx): CurrentTenant) -> Json<Value> {
    // Same value the task-local holds for anything called from this handler.
    let schema = TenantContext::current_schema();
    let tenant = ctx.tenant();
    Json(json!({
        "slug": tenant.map(|t| t.slug.as_str()),
        "name": tenant.map(|t| t.name.as_str()),
        "schema": schema,
        "is_trial": tenant.map(|t| t.is_trial),
        "trial_ends_at": tenant.and_then(|t| t.trial_ends_at),
    }))
}

/// Reports the schema the database itself sees for this request's
/// connection, confirming the connection binding end to end.
pub async fn database_schema(TenantDb(mut conn): TenantDb) -> Result<Json<Value>, TenancyError> {
    let current: Option<String> = sqlx::query_scalar("SELECT current_schema()")
        .fetch_one(&mut *conn)
        .await?;
    Ok(Json(json!({
        "bound_schema": conn.schema(),
        "current_schema": current,
    })))
}
