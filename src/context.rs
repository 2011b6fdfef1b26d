use std::future::Future;

use serde::Serialize;

use crate::db::tenant::PUBLIC_SCHEMA;
use crate::models::tenant::Tenant;

tokio::task_local! {
    static CURRENT: TenantContext;
}

/// The schema a unit of work is bound to. Lives for one request (or one
/// job) and is never shared between them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantContext {
    schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant: Option<Tenant>,
}

impl TenantContext {
    pub fn public() -> Self {
        Self {
            schema: PUBLIC_SCHEMA.to_string(),
            tenant: None,
        }
    }

    pub fn for_tenant(tenant: Tenant) -> Self {
        Self {
            schema: tenant.schema_name.clone(),
            tenant: Some(tenant),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }

    pub fn is_public(&self) -> bool {
        self.tenant.is_none()
    }

    /// Runs `fut` with this context as the current one. Tasks spawned from
    /// inside do not inherit it.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The context of the enclosing [`Self::scope`], if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Outside any scope this is `public`.
    pub fn current_schema() -> String {
        CURRENT
            .try_with(|ctx| ctx.schema.clone())
            .unwrap_or_else(|_| PUBLIC_SCHEMA.to_string())
    }
}
