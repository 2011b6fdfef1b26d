use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archify_api::{
    build_router, config::Config, db, migrations::MigrationRegistry, migrations::Migrator, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    info!("Database connected");

    let registry = MigrationRegistry::load(config.migrations_dir.as_deref())?;
    info!(count = registry.len(), "Migration catalog loaded");
    let migrator = Migrator::new(pool.clone(), Arc::new(registry), config.migration_concurrency);

    if config.migrate_on_startup {
        migrator.migrate_public().await?;

        let reports = migrator.migrate_all_tenants().await?;
        for report in reports.iter().filter(|r| !r.is_success()) {
            if let Some(failure) = &report.failure {
                warn!(schema = %report.schema, error = %failure.error, "Tenant schema left behind");
            }
        }
        info!(tenants = reports.len(), "Startup migrations finished");
    }

    let state = AppState::new(pool, config.clone(), migrator);
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
