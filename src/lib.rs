// Library exports for the api server, the migrate tool and tests
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use middleware::tenant::TenantResolver;
use migrations::Migrator;
use services::directory::{PgTenantStore, TenantStore};
use services::lifecycle::{PgProvisioner, Provisioner, TenantLifecycle};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub lifecycle: Arc<TenantLifecycle>,
    pub resolver: TenantResolver,
}

impl AppState {
    /// Wire the Postgres-backed directory and provisioner.
    pub fn new(db: PgPool, config: Arc<Config>, migrator: Migrator) -> Self {
        let store: Arc<dyn TenantStore> = Arc::new(PgTenantStore::new(db.clone()));
        let provisioner: Arc<dyn Provisioner> = Arc::new(PgProvisioner::new(
            db.clone(),
            migrator,
            config.bcrypt_cost,
        ));
        Self::with_components(db, config, store, provisioner)
    }

    pub fn with_components(
        db: PgPool,
        config: Arc<Config>,
        store: Arc<dyn TenantStore>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let resolver = TenantResolver::new(store.clone(), config.jwt_secret.as_deref());
        let lifecycle = Arc::new(TenantLifecycle::new(store, provisioner, config.trial_days));
        Self {
            db,
            config,
            lifecycle,
            resolver,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-tenant-slug"),
            HeaderName::from_static("x-super-admin-key"),
        ])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Tenant administration (super-admin)
        .route("/api/tenants/create", post(routes::tenants::create_tenant))
        .route("/api/tenants", get(routes::tenants::list_tenants))
        .route(
            "/api/tenants/{id}",
            get(routes::tenants::get_tenant)
                .put(routes::tenants::update_tenant)
                .delete(routes::tenants::delete_tenant),
        )
        // Tenant-scoped
        .route("/api/tenant/current", get(routes::tenant_info::current_tenant))
        .route("/api/tenant/schema", get(routes::tenant_info::database_schema))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::tenant::tenant_context,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
