use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::TenancyError,
    middleware::super_admin::SuperAdminAuth,
    models::tenant::{CreateTenantRequest, ListTenantsQuery, Tenant, UpdateTenantRequest},
    AppState,
};

pub async fn create_tenant(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Json(body): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<Tenant>), TenancyError> {
    let tenant = state.lifecycle.create(body).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn list_tenants(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Query(query): Query<ListTenantsQuery>,
) -> Result<Json<Vec<Tenant>>, TenancyError> {
    let tenants = state.lifecycle.list(query.offset, query.limit).await?;
    Ok(Json(tenants))
}

pub async fn get_tenant(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<i32>,
) -> Result<Json<Tenant>, TenancyError> {
    Ok(Json(state.lifecycle.get(id).await?))
}

pub async fn update_tenant(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<i32>,
    Json(body): Json<UpdateTenantRequest>,
) -> Result<Json<Tenant>, TenancyError> {
    Ok(Json(state.lifecycle.update(id, body).await?))
}

/// Irreversible: drops the tenant schema and all of its data.
pub async fn delete_tenant(
    State(state): State<AppState>,
    _auth: SuperAdminAuth,
    Path(id): Path<i32>,
) -> Result<StatusCode, TenancyError> {
    state.lifecycle.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
