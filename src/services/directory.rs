use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{TenancyError, ValidationError};
use crate::models::tenant::{NewTenant, Tenant, UpdateTenantRequest};

/// Persistent map of tenants, kept in `public.tenants`.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError>;

    async fn find_by_id(&self, id: i32) -> Result<Option<Tenant>, TenancyError>;

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Tenant>, TenancyError>;

    async fn slug_exists(&self, slug: &str) -> Result<bool, TenancyError>;

    async fn email_exists(&self, email: &str) -> Result<bool, TenancyError>;

    /// Inserts an inactive, unprovisioned row. A slug or email taken by a
    /// concurrent insert surfaces as the matching duplicate validation error.
    async fn insert_pending(&self, tenant: &NewTenant) -> Result<Tenant, TenancyError>;

    /// Sets `is_active` and stamps `provisioned_at`.
    async fn mark_active(&self, id: i32) -> Result<Tenant, TenancyError>;

    async fn update(&self, id: i32, changes: &UpdateTenantRequest) -> Result<Option<Tenant>, TenancyError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: i32) -> Result<bool, TenancyError>;
}

#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every row, provisioned or not, ordered by slug.
    pub async fn list_all(&self) -> Result<Vec<Tenant>, TenancyError> {
        let tenants = sqlx::query_as::<_, Tenant>("SELECT * FROM public.tenants ORDER BY slug")
            .fetch_all(&self.pool)
            .await?;
        Ok(tenants)
    }

    /// False before the public migrations have created the directory table.
    pub async fn directory_exists(&self) -> Result<bool, TenancyError> {
        let exists = sqlx::query_scalar("SELECT to_regclass('public.tenants') IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

fn map_unique_violation(e: sqlx::Error, tenant: &NewTenant) -> TenancyError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let on_email = db.constraint().is_some_and(|c| c.contains("email"));
            return if on_email {
                ValidationError::DuplicateEmail(tenant.admin_email.clone()).into()
            } else {
                ValidationError::DuplicateSlug(tenant.slug.clone()).into()
            };
        }
    }
    e.into()
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM public.tenants WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Tenant>, TenancyError> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM public.tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Tenant>, TenancyError> {
        let tenants = sqlx::query_as::<_, Tenant>(
            "SELECT * FROM public.tenants ORDER BY created_at DESC, id DESC OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, TenancyError> {
        let exists = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM public.tenants WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, TenancyError> {
        let exists = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM public.tenants WHERE admin_email = $1)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_pending(&self, tenant: &NewTenant) -> Result<Tenant, TenancyError> {
        sqlx::query_as::<_, Tenant>(
            "INSERT INTO public.tenants
                (name, slug, schema_name, admin_email, admin_name, is_active, is_trial, trial_ends_at)
             VALUES ($1, $2, $3, $4, $5, FALSE, TRUE, $6)
             RETURNING *",
        )
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(&tenant.schema_name)
        .bind(&tenant.admin_email)
        .bind(&tenant.admin_name)
        .bind(tenant.trial_ends_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, tenant))
    }

    async fn mark_active(&self, id: i32) -> Result<Tenant, TenancyError> {
        sqlx::query_as::<_, Tenant>(
            "UPDATE public.tenants
             SET is_active = TRUE, provisioned_at = NOW(), updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TenancyError::NotFound(id.to_string()))
    }

    async fn update(&self, id: i32, changes: &UpdateTenantRequest) -> Result<Option<Tenant>, TenancyError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "UPDATE public.tenants SET
               name      = COALESCE($2, name),
               is_active = COALESCE($3, is_active),
               is_trial  = COALESCE($4, is_trial),
               trial_ends_at = CASE
                   WHEN $4 = FALSE THEN NULL::TIMESTAMPTZ
                   ELSE COALESCE($5, trial_ends_at)
               END,
               settings  = COALESCE($6, settings),
               updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(changes.is_active)
        .bind(changes.is_trial)
        .bind(changes.trial_ends_at)
        .bind(&changes.settings)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn delete(&self, id: i32) -> Result<bool, TenancyError> {
        let result = sqlx::query("DELETE FROM public.tenants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
