use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::tenant::PUBLIC_SCHEMA;
use crate::error::{MigrationError, MigrationFailure, TenancyError};
use crate::models::tenant::Tenant;
use crate::services::directory::{PgTenantStore, TenantStore};

use super::executor::{ApplyOutcome, MigrationExecutor};
use super::registry::MigrationRegistry;
use super::tracker::MigrationTracker;

/// Drives the registry, tracker and executor across the public schema and
/// every tenant schema.
#[derive(Clone)]
pub struct Migrator {
    pool: PgPool,
    registry: Arc<MigrationRegistry>,
    concurrency: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedMigration {
    pub version: Option<String>,
    pub error: String,
}

/// Outcome of migrating one schema. Versions before the failure stay applied.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub schema: String,
    pub applied: Vec<String>,
    pub failure: Option<FailedMigration>,
}

impl SchemaReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaStatus {
    pub schema: String,
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSchemaStatus {
    pub slug: String,
    pub is_active: bool,
    #[serde(flatten)]
    pub status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub public: SchemaStatus,
    pub tenants: Vec<TenantSchemaStatus>,
    /// Slugs whose creation never completed (`provisioned_at IS NULL`).
    pub incomplete: Vec<String>,
}

impl Migrator {
    pub fn new(pool: PgPool, registry: Arc<MigrationRegistry>, concurrency: usize) -> Self {
        Self {
            pool,
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Applies every pending migration for `schema` in version order and
    /// stops at the first failure. Returns the versions applied by this call.
    pub async fn migrate_schema(&self, schema: &str) -> Result<Vec<String>, MigrationError> {
        let mut applied = Vec::new();
        self.apply_pending(schema, &mut applied).await?;
        Ok(applied)
    }

    /// Like [`Self::migrate_schema`], folded into a report for bulk runs.
    /// Versions applied before a failure are still listed.
    pub async fn run_schema(&self, schema: &str) -> SchemaReport {
        let mut applied = Vec::new();
        let failure = self
            .apply_pending(schema, &mut applied)
            .await
            .err()
            .map(|e| FailedMigration {
                version: e.version.clone(),
                error: e.to_string(),
            });
        SchemaReport {
            schema: schema.to_string(),
            applied,
            failure,
        }
    }

    async fn apply_pending(&self, schema: &str, newly_applied: &mut Vec<String>) -> Result<(), MigrationError> {
        let bookkeeping = |e: sqlx::Error| MigrationError {
            schema: schema.to_string(),
            version: None,
            reason: MigrationFailure::Database(e),
        };

        MigrationTracker::ensure_tracking_table(&self.pool, schema)
            .await
            .map_err(bookkeeping)?;
        let applied = MigrationTracker::applied_versions(&self.pool, schema)
            .await
            .map_err(bookkeeping)?;

        for def in self.registry.pending_for(schema, &applied) {
            if MigrationExecutor::apply(&self.pool, schema, def).await? == ApplyOutcome::Applied {
                newly_applied.push(def.version.to_string());
            }
        }

        if newly_applied.is_empty() {
            info!(schema, "Schema is up to date");
        } else {
            info!(schema, count = newly_applied.len(), "Schema migrated");
        }
        Ok(())
    }

    pub async fn migrate_public(&self) -> Result<Vec<String>, MigrationError> {
        self.migrate_schema(PUBLIC_SCHEMA).await
    }

    /// Migrates every provisioned tenant schema, active or not, with bounded
    /// parallelism. One schema failing never stops the others. Reports are
    /// sorted by schema name.
    pub async fn migrate_all_tenants(&self) -> Result<Vec<SchemaReport>, TenancyError> {
        let store = PgTenantStore::new(self.pool.clone());
        let tenants = store.list_all().await?;

        let skipped = tenants.iter().filter(|t| !t.is_provisioned()).count();
        if skipped > 0 {
            warn!(skipped, "Skipping tenants whose creation never completed");
        }

        let schemas: Vec<String> = tenants
            .into_iter()
            .filter(Tenant::is_provisioned)
            .map(|t| t.schema_name)
            .collect();

        let mut reports: Vec<SchemaReport> = stream::iter(schemas)
            .map(|schema| async move { self.run_schema(&schema).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        reports.sort_by(|a, b| a.schema.cmp(&b.schema));

        let failed = reports.iter().filter(|r| !r.is_success()).count();
        info!(total = reports.len(), failed, "Tenant migration run finished");
        Ok(reports)
    }

    pub async fn migrate_tenant(&self, slug: &str) -> Result<Vec<String>, TenancyError> {
        let store = PgTenantStore::new(self.pool.clone());
        let tenant = store
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| TenancyError::NotFound(slug.to_string()))?;
        Ok(self.migrate_schema(&tenant.schema_name).await?)
    }

    /// Applied and pending versions for public and every tenant schema.
    pub async fn status(&self) -> Result<MigrationStatus, TenancyError> {
        let public = self.schema_status(PUBLIC_SCHEMA).await?;

        let store = PgTenantStore::new(self.pool.clone());
        let tenants = if store.directory_exists().await? {
            store.list_all().await?
        } else {
            Vec::new()
        };

        let mut statuses = Vec::new();
        let mut incomplete = Vec::new();
        for tenant in tenants {
            if !tenant.is_provisioned() {
                incomplete.push(tenant.slug);
                continue;
            }
            statuses.push(TenantSchemaStatus {
                status: self.schema_status(&tenant.schema_name).await?,
                slug: tenant.slug,
                is_active: tenant.is_active,
            });
        }

        Ok(MigrationStatus {
            public,
            tenants: statuses,
            incomplete,
        })
    }

    async fn schema_status(&self, schema: &str) -> Result<SchemaStatus, TenancyError> {
        let applied: BTreeSet<String> = MigrationTracker::applied_versions(&self.pool, schema).await?;
        let pending = self
            .registry
            .pending_for(schema, &applied)
            .map(|d| d.version.to_string())
            .collect();
        Ok(SchemaStatus {
            schema: schema.to_string(),
            applied: applied.into_iter().collect(),
            pending,
        })
    }
}
