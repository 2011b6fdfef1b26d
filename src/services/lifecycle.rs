use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::db::tenant::{self as tenant_db, is_valid_slug, schema_name, AdminSeed};
use crate::error::{TenancyError, ValidationError};
use crate::migrations::Migrator;
use crate::models::tenant::{CreateTenantRequest, NewTenant, Tenant, UpdateTenantRequest};
use crate::services::directory::TenantStore;
use crate::services::metrics::TENANT_PROVISIONING;

/// Slugs that collide with hostnames or routing conventions.
pub const RESERVED_SLUGS: &[&str] = &[
    "www", "api", "app", "admin", "public", "static", "assets", "mail", "localhost",
];

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_LIST_LIMIT: i64 = 500;

/// Administrator account created inside a new tenant schema.
pub struct AdminAccount {
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub password: String,
}

/// Physical side of tenant creation: everything that touches the tenant's
/// own schema rather than the directory.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_namespace(&self, schema: &str) -> Result<(), TenancyError>;

    /// Applies every pending tenant-scope migration. Returns the versions applied.
    async fn apply_migrations(&self, schema: &str) -> Result<Vec<String>, TenancyError>;

    async fn seed_admin(&self, schema: &str, admin: &AdminAccount) -> Result<(), TenancyError>;

    async fn destroy_namespace(&self, schema: &str) -> Result<(), TenancyError>;
}

pub struct PgProvisioner {
    pool: PgPool,
    migrator: Migrator,
    bcrypt_cost: u32,
}

impl PgProvisioner {
    pub fn new(pool: PgPool, migrator: Migrator, bcrypt_cost: u32) -> Self {
        Self {
            pool,
            migrator,
            bcrypt_cost,
        }
    }
}

#[async_trait]
impl Provisioner for PgProvisioner {
    async fn create_namespace(&self, schema: &str) -> Result<(), TenancyError> {
        tenant_db::create_namespace(&self.pool, schema).await
    }

    async fn apply_migrations(&self, schema: &str) -> Result<Vec<String>, TenancyError> {
        Ok(self.migrator.migrate_schema(schema).await?)
    }

    async fn seed_admin(&self, schema: &str, admin: &AdminAccount) -> Result<(), TenancyError> {
        let password = admin.password.clone();
        let cost = self.bcrypt_cost;
        let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| TenancyError::Seeding {
                schema: schema.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| TenancyError::Seeding {
                schema: schema.to_string(),
                reason: e.to_string(),
            })?;

        tenant_db::seed_admin(
            &self.pool,
            schema,
            &AdminSeed {
                email: &admin.email,
                username: &admin.username,
                full_name: admin.full_name.as_deref(),
                password_hash: &password_hash,
            },
        )
        .await
    }

    async fn destroy_namespace(&self, schema: &str) -> Result<(), TenancyError> {
        tenant_db::destroy_namespace(&self.pool, schema).await
    }
}

/// Progress of the create workflow. `Failed` is terminal and can be reached
/// from any other stage; it keeps the last stage completed before the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateStage {
    Validating,
    SlugReserved,
    SchemaCreated,
    MigrationsApplied,
    Seeded,
    Active,
    Failed { after: &'static str, reason: String },
}

impl CreateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::SlugReserved => "slug_reserved",
            Self::SchemaCreated => "schema_created",
            Self::MigrationsApplied => "migrations_applied",
            Self::Seeded => "seeded",
            Self::Active => "active",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// No-op once failed.
    fn advance(&mut self, next: CreateStage) {
        if !self.is_failed() {
            *self = next;
        }
    }

    fn fail(&mut self, reason: &impl fmt::Display) {
        if !self.is_failed() {
            *self = Self::Failed {
                after: self.as_str(),
                reason: reason.to_string(),
            };
        }
    }
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { after, reason } => write!(f, "failed after {after}: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Creates, updates and deletes tenants, keeping the directory and the
/// physical schemas in step.
pub struct TenantLifecycle {
    store: Arc<dyn TenantStore>,
    provisioner: Arc<dyn Provisioner>,
    trial_days: i64,
}

impl TenantLifecycle {
    pub fn new(store: Arc<dyn TenantStore>, provisioner: Arc<dyn Provisioner>, trial_days: i64) -> Self {
        Self {
            store,
            provisioner,
            trial_days,
        }
    }

    /// Runs the full create workflow. On any failure after the directory row
    /// exists, the schema is dropped and then the row deleted; the caller
    /// always gets the error that stopped the workflow.
    pub async fn create(&self, req: CreateTenantRequest) -> Result<Tenant, TenancyError> {
        let mut stage = CreateStage::Validating;
        self.run_create(&req, &mut stage).await
    }

    async fn run_create(&self, req: &CreateTenantRequest, stage: &mut CreateStage) -> Result<Tenant, TenancyError> {
        debug!(slug = %req.slug, stage = %stage, "Validating tenant request");
        let outcome = match self.validate(req).await {
            Ok(()) => self.provision(req, stage).await,
            Err(e) => Err(e),
        };

        let label = match &outcome {
            Ok(_) => "created",
            Err(TenancyError::Validation(_)) => "rejected",
            Err(_) => "failed",
        };
        TENANT_PROVISIONING.with_label_values(&[label]).inc();

        match &outcome {
            Ok(tenant) => info!(slug = %tenant.slug, schema = %tenant.schema_name, stage = %stage, "Tenant created"),
            Err(e) => {
                stage.fail(e);
                if matches!(e, TenancyError::Validation(_)) {
                    debug!(slug = %req.slug, stage = %stage, "Tenant request rejected");
                } else {
                    error!(slug = %req.slug, stage = %stage, "Tenant creation failed");
                }
            }
        }
        outcome
    }

    async fn validate(&self, req: &CreateTenantRequest) -> Result<(), TenancyError> {
        validate_request(req)?;
        if self.store.slug_exists(&req.slug).await? {
            return Err(ValidationError::DuplicateSlug(req.slug.clone()).into());
        }
        let email = req.admin_email.trim();
        if self.store.email_exists(email).await? {
            return Err(ValidationError::DuplicateEmail(email.to_string()).into());
        }
        Ok(())
    }

    async fn provision(&self, req: &CreateTenantRequest, stage: &mut CreateStage) -> Result<Tenant, TenancyError> {
        let schema = schema_name(&req.slug);
        let pending = NewTenant {
            name: req.name.trim().to_string(),
            slug: req.slug.clone(),
            schema_name: schema.clone(),
            admin_email: req.admin_email.trim().to_string(),
            admin_name: req.admin_name.clone(),
            trial_ends_at: Some(Utc::now() + Duration::days(self.trial_days)),
        };

        let row = self.store.insert_pending(&pending).await?;
        stage.advance(CreateStage::SlugReserved);
        info!(slug = %row.slug, schema = %schema, stage = %stage, "Tenant reserved");

        let admin = AdminAccount {
            email: pending.admin_email.clone(),
            username: format!("admin_{}", req.slug),
            full_name: req.admin_name.clone(),
            password: req.admin_password.clone(),
        };

        let built = match self.build_schema(&schema, &admin, stage).await {
            Ok(()) => self.store.mark_active(row.id).await,
            Err(e) => Err(e),
        };
        match built {
            Ok(tenant) => {
                stage.advance(CreateStage::Active);
                Ok(tenant)
            }
            Err(e) => {
                self.compensate(&row).await;
                Err(e)
            }
        }
    }

    async fn build_schema(
        &self,
        schema: &str,
        admin: &AdminAccount,
        stage: &mut CreateStage,
    ) -> Result<(), TenancyError> {
        self.provisioner.create_namespace(schema).await?;
        stage.advance(CreateStage::SchemaCreated);

        let applied = self.provisioner.apply_migrations(schema).await?;
        stage.advance(CreateStage::MigrationsApplied);
        info!(schema, count = applied.len(), stage = %stage, "Tenant schema migrated");

        self.provisioner.seed_admin(schema, admin).await?;
        stage.advance(CreateStage::Seeded);
        Ok(())
    }

    /// Best effort. The row is only removed once the schema is gone, so a
    /// failed cleanup leaves a detectable unprovisioned row instead of an
    /// untracked schema.
    async fn compensate(&self, row: &Tenant) {
        if let Err(e) = self.provisioner.destroy_namespace(&row.schema_name).await {
            warn!(
                slug = %row.slug,
                schema = %row.schema_name,
                error = %e,
                "Cleanup could not drop schema; directory row kept for reconciliation"
            );
            return;
        }
        match self.store.delete(row.id).await {
            Ok(_) => info!(slug = %row.slug, "Rolled back partial tenant creation"),
            Err(e) => warn!(slug = %row.slug, error = %e, "Cleanup could not delete directory row"),
        }
    }

    /// Drops the schema, then the directory row. If the schema cannot be
    /// dropped the row stays, so the tenant remains listed.
    pub async fn delete(&self, id: i32) -> Result<(), TenancyError> {
        let tenant = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| TenancyError::NotFound(id.to_string()))?;

        self.provisioner.destroy_namespace(&tenant.schema_name).await?;
        self.store.delete(tenant.id).await?;

        info!(slug = %tenant.slug, schema = %tenant.schema_name, "Tenant deleted");
        Ok(())
    }

    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Tenant>, TenancyError> {
        self.store
            .list(offset.max(0), limit.clamp(0, MAX_LIST_LIMIT))
            .await
    }

    pub async fn get(&self, id: i32) -> Result<Tenant, TenancyError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| TenancyError::NotFound(id.to_string()))
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Tenant, TenancyError> {
        self.store
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| TenancyError::NotFound(slug.to_string()))
    }

    pub async fn update(&self, id: i32, changes: UpdateTenantRequest) -> Result<Tenant, TenancyError> {
        if let Some(name) = &changes.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName.into());
            }
        }

        let current = self.get(id).await?;
        if changes.is_active == Some(true) && !current.is_provisioned() {
            return Err(ValidationError::Unprovisioned(current.slug).into());
        }

        let updated = self
            .store
            .update(id, &changes)
            .await?
            .ok_or_else(|| TenancyError::NotFound(id.to_string()))?;
        info!(slug = %updated.slug, "Tenant updated");
        Ok(updated)
    }
}

fn validate_request(req: &CreateTenantRequest) -> Result<(), ValidationError> {
    if !is_valid_slug(&req.slug) {
        return Err(ValidationError::InvalidSlug(req.slug.clone()));
    }
    if RESERVED_SLUGS.contains(&req.slug.as_str()) {
        return Err(ValidationError::ReservedSlug(req.slug.clone()));
    }
    if req.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let email = req.admin_email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => return Err(ValidationError::InvalidEmail),
    }
    if req.admin_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::WeakPassword(MIN_PASSWORD_LEN));
    }
    Ok(())
}
