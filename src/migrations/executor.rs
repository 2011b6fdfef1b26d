use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::db::{search_path_for, tenant::namespace_exists};
use crate::error::{MigrationError, MigrationFailure};
use crate::services::metrics::{MIGRATIONS_APPLIED, MIGRATIONS_FAILED};

use super::definition::{MigrationDefinition, SchemaKind};
use super::tracker::MigrationTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    AlreadyApplied,
}

/// Applies one migration to one schema.
pub struct MigrationExecutor;

impl MigrationExecutor {
    /// Runs the forward body and records the version in a single transaction,
    /// under the schema's advisory lock. Unqualified names in the body
    /// resolve to `schema` only. On any failure nothing is recorded and the
    /// body's effects are rolled back.
    pub async fn apply(
        pool: &PgPool,
        schema: &str,
        def: &MigrationDefinition,
    ) -> Result<ApplyOutcome, MigrationError> {
        let kind = SchemaKind::of(schema);
        let fail = |reason: MigrationFailure| MigrationError {
            schema: schema.to_string(),
            version: Some(def.version.to_string()),
            reason,
        };

        if !def.scope.applies_to(kind) {
            return Err(fail(MigrationFailure::ScopeMismatch(def.scope.to_string())));
        }

        let result = Self::apply_in_transaction(pool, schema, def).await;
        match &result {
            Ok(ApplyOutcome::Applied) => {
                MIGRATIONS_APPLIED.with_label_values(&[kind.as_str()]).inc();
                info!(schema, version = %def.version, "Applied migration");
            }
            Ok(ApplyOutcome::AlreadyApplied) => {
                debug!(schema, version = %def.version, "Migration already applied");
            }
            Err(reason) => {
                MIGRATIONS_FAILED.with_label_values(&[kind.as_str()]).inc();
                warn!(schema, version = %def.version, error = %reason, "Migration failed");
            }
        }
        result.map_err(fail)
    }

    async fn apply_in_transaction(
        pool: &PgPool,
        schema: &str,
        def: &MigrationDefinition,
    ) -> Result<ApplyOutcome, MigrationFailure> {
        let mut tx = pool.begin().await?;
        MigrationTracker::lock_schema(&mut tx, schema).await?;

        if !namespace_exists(&mut *tx, schema).await? {
            return Err(MigrationFailure::MissingSchema);
        }

        MigrationTracker::create_tracking_table(&mut tx, schema).await?;

        // Another runner may have applied it while we waited for the lock.
        if MigrationTracker::is_applied(&mut tx, schema, def.version.as_str()).await? {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        sqlx::query("SELECT set_config('search_path', $1, true)")
            .bind(search_path_for(schema))
            .execute(&mut *tx)
            .await?;

        // No bind arguments: sent as a simple query, so multi-statement bodies work.
        sqlx::Executor::execute(&mut *tx, def.up.as_str()).await?;

        MigrationTracker::record_applied(&mut tx, schema, def.version.as_str()).await?;
        tx.commit().await?;

        Ok(ApplyOutcome::Applied)
    }
}
