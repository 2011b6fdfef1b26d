use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{header, request::Parts, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::context::TenantContext;
use crate::db::tenant::{is_valid_slug, slug_from_schema};
use crate::db::TenantConnection;
use crate::error::{ResolveError, TenancyError};
use crate::models::auth::TenantClaims;
use crate::services::directory::TenantStore;
use crate::services::metrics::TENANT_RESOLUTION;
use crate::AppState;

pub const TENANT_HEADER: &str = "X-Tenant-Slug";
pub const TENANT_QUERY_PARAM: &str = "tenant";

/// Served from `public` without any tenant lookup. Matched on whole path
/// segments.
const EXEMPT_PREFIXES: &[&str] = &[
    "/docs",
    "/redoc",
    "/openapi.json",
    "/health",
    "/metrics",
    "/api/auth/register",
    "/api/auth/login",
    "/api/tenants",
];

const RESERVED_SUBDOMAINS: &[&str] = &["www", "api"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorSource {
    Token,
    Header,
    Query,
    Subdomain,
}

/// Maps an incoming request to the schema it may touch.
#[derive(Clone)]
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
    token_key: Option<DecodingKey>,
}

impl TenantResolver {
    /// Without a `jwt_secret`, bearer tokens are never consulted.
    pub fn new(store: Arc<dyn TenantStore>, jwt_secret: Option<&str>) -> Self {
        Self {
            store,
            token_key: jwt_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        }
    }

    pub fn is_exempt(path: &str) -> bool {
        path == "/"
            || EXEMPT_PREFIXES.iter().any(|prefix| {
                path.strip_prefix(prefix)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
    }

    /// The first selector found, in precedence order: token claim, header,
    /// query parameter, subdomain. The value is trimmed and lowercased but
    /// not yet validated.
    pub fn identify(&self, parts: &Parts) -> Option<(String, SelectorSource)> {
        let normalize = |s: &str| Some(s.trim().to_ascii_lowercase()).filter(|s| !s.is_empty());

        if let Some(slug) = self.token_slug(parts).and_then(|s| normalize(&s)) {
            return Some((slug, SelectorSource::Token));
        }

        if let Some(slug) = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(normalize)
        {
            return Some((slug, SelectorSource::Header));
        }

        if let Some(slug) = query_tenant(&parts.uri).and_then(|s| normalize(&s)) {
            return Some((slug, SelectorSource::Query));
        }

        parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(subdomain)
            .and_then(normalize)
            .map(|slug| (slug, SelectorSource::Subdomain))
    }

    pub async fn resolve(&self, parts: &Parts) -> Result<TenantContext, ResolveError> {
        if Self::is_exempt(parts.uri.path()) {
            return Ok(TenantContext::public());
        }

        let (slug, source) = self.identify(parts).ok_or(ResolveError::NoTenant)?;
        if !is_valid_slug(&slug) {
            return Err(ResolveError::InvalidSelector(slug));
        }

        let tenant = self
            .store
            .find_by_slug(&slug)
            .await
            .map_err(ResolveError::Directory)?
            .ok_or_else(|| ResolveError::NotFound(slug.clone()))?;

        if !tenant.is_active {
            return Err(ResolveError::Inactive(slug));
        }

        tracing::debug!(slug = %tenant.slug, source = ?source, "Resolved tenant");
        Ok(TenantContext::for_tenant(tenant))
    }

    /// Tenant claim of a valid bearer token. Invalid or expired tokens yield
    /// nothing; rejecting them is the authentication layer's job.
    fn token_slug(&self, parts: &Parts) -> Option<String> {
        let key = self.token_key.as_ref()?;
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))?;

        let claims = decode::<TenantClaims>(token, key, &Validation::new(Algorithm::HS256))
            .map_err(|e| tracing::debug!(error = %e, "Ignoring tenant claim of invalid token"))
            .ok()?
            .claims;

        claims.tenant_slug.or_else(|| {
            claims
                .tenant_schema
                .as_deref()
                .and_then(slug_from_schema)
                .map(str::to_string)
        })
    }
}

/// Percent-decoded `?tenant=` value. An unparseable query carries no tenant.
fn query_tenant(uri: &Uri) -> Option<String> {
    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.remove(TENANT_QUERY_PARAM)
}

/// Leftmost label of a host with at least three labels. Local and IP hosts
/// never carry a tenant.
fn subdomain(host: &str) -> Option<&str> {
    let domain = match host.strip_prefix('[') {
        Some(_) => return None,
        None => host.split(':').next().unwrap_or(host),
    };
    if domain.parse::<IpAddr>().is_ok() {
        return None;
    }
    let lower = domain.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".localhost") {
        return None;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    let first = labels[0];
    if RESERVED_SUBDOMAINS.iter().any(|r| first.eq_ignore_ascii_case(r)) {
        return None;
    }
    Some(first)
}

fn outcome_label(result: &Result<TenantContext, ResolveError>) -> &'static str {
    match result {
        Ok(ctx) if ctx.is_public() => "public",
        Ok(_) => "tenant",
        Err(ResolveError::NoTenant) => "no_tenant",
        Err(ResolveError::InvalidSelector(_)) => "invalid",
        Err(ResolveError::NotFound(_)) => "not_found",
        Err(ResolveError::Inactive(_)) => "inactive",
        Err(ResolveError::Directory(_)) => "error",
    }
}

/// Resolves the tenant and runs the rest of the request inside its context.
/// The context is also placed in request extensions for extractors.
pub async fn tenant_context(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();

    let result = state.resolver.resolve(&parts).await;
    TENANT_RESOLUTION.with_label_values(&[outcome_label(&result)]).inc();

    let ctx = match result {
        Ok(ctx) => ctx,
        Err(e) => {
            if let ResolveError::Directory(inner) = &e {
                tracing::error!(error = %inner, "Tenant lookup failed");
            }
            return e.into_response();
        }
    };

    parts.extensions.insert(ctx.clone());
    let req = Request::from_parts(parts, body);
    ctx.scope(next.run(req)).await
}

/// The tenant bound to this request. Rejects requests served from `public`.
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub TenantContext);

impl<S: Send + Sync> FromRequestParts<S> for CurrentTenant {
    type Rejection = ResolveError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .filter(|ctx| !ctx.is_public())
            .cloned()
            .map(CurrentTenant)
            .ok_or(ResolveError::NoTenant)
    }
}

/// A pooled connection bound to the request's schema.
pub struct TenantDb(pub TenantConnection);

impl FromRequestParts<AppState> for TenantDb {
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let schema = parts
            .extensions
            .get::<TenantContext>()
            .map(|ctx| ctx.schema().to_string())
            .unwrap_or_else(TenantContext::current_schema);
        let conn = TenantConnection::acquire(&state.db, &schema).await?;
        Ok(TenantDb(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use crate::testing::{tenant, InMemoryStore};

    const SECRET: &str = "test-secret";

    fn resolver() -> TenantResolver {
        let store = InMemoryStore::with([
            tenant(1, "acme", true),
            tenant(2, "other", true),
            tenant(3, "beta", true),
            tenant(4, "dormant", false),
        ]);
        TenantResolver::new(Arc::new(store), Some(SECRET))
    }

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = HttpRequest::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn token(slug: Option<&str>, schema: Option<&str>) -> String {
        let claims = TenantClaims {
            sub: "1".into(),
            tenant_slug: slug.map(str::to_string),
            tenant_schema: schema.map(str::to_string),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn schema_for(uri: &str, headers: &[(&str, &str)]) -> Result<String, ResolveError> {
        resolver()
            .resolve(&parts(uri, headers))
            .await
            .map(|ctx| ctx.schema().to_string())
    }

    #[tokio::test]
    async fn token_claim_beats_header() {
        let bearer = format!("Bearer {}", token(Some("acme"), None));
        let schema = schema_for(
            "/api/tenant/current",
            &[("authorization", bearer.as_str()), ("x-tenant-slug", "other")],
        )
        .await
        .unwrap();
        assert_eq!(schema, "tenant_acme");
    }

    #[tokio::test]
    async fn token_schema_claim_is_mapped_to_slug() {
        let bearer = format!("Bearer {}", token(None, Some("tenant_beta")));
        let schema = schema_for("/api/anything", &[("authorization", bearer.as_str())]).await.unwrap();
        assert_eq!(schema, "tenant_beta");
    }

    #[tokio::test]
    async fn invalid_token_falls_through_to_header() {
        let schema = schema_for(
            "/api/anything",
            &[("authorization", "Bearer not.a.token"), ("x-tenant-slug", "other")],
        )
        .await
        .unwrap();
        assert_eq!(schema, "tenant_other");
    }

    #[tokio::test]
    async fn header_beats_query_beats_subdomain() {
        let schema = schema_for(
            "/api/x?tenant=beta",
            &[("x-tenant-slug", "acme"), ("host", "other.example.com")],
        )
        .await
        .unwrap();
        assert_eq!(schema, "tenant_acme");

        let schema = schema_for("/api/x?page=2&tenant=beta", &[("host", "other.example.com")])
            .await
            .unwrap();
        assert_eq!(schema, "tenant_beta");

        let schema = schema_for("/api/x", &[("host", "other.example.com:8443")]).await.unwrap();
        assert_eq!(schema, "tenant_other");
    }

    #[tokio::test]
    async fn selector_is_normalized() {
        let schema = schema_for("/api/x", &[("x-tenant-slug", "  ACME ")]).await.unwrap();
        assert_eq!(schema, "tenant_acme");
    }

    #[tokio::test]
    async fn exempt_paths_resolve_to_public() {
        for path in ["/", "/health", "/metrics", "/docs/index.html", "/api/tenants", "/api/tenants/7"] {
            let schema = schema_for(path, &[("x-tenant-slug", "acme")]).await.unwrap();
            assert_eq!(schema, "public", "{path}");
        }
        assert!(!TenantResolver::is_exempt("/healthz"));
        assert!(!TenantResolver::is_exempt("/api/tenant/current"));
    }

    #[tokio::test]
    async fn reserved_and_local_hosts_carry_no_tenant() {
        for host in [
            "www.example.com",
            "api.example.com",
            "example.com",
            "localhost:8000",
            "acme.localhost",
            "127.0.0.1:8000",
            "[::1]:8000",
        ] {
            let err = schema_for("/api/x", &[("host", host)]).await.unwrap_err();
            assert!(matches!(err, ResolveError::NoTenant), "{host}: {err}");
        }
    }

    #[tokio::test]
    async fn unknown_and_inactive_are_distinct() {
        let err = schema_for("/api/x", &[("x-tenant-slug", "ghost")]).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(ref s) if s == "ghost"));

        let err = schema_for("/api/x", &[("x-tenant-slug", "dormant")]).await.unwrap_err();
        assert!(matches!(err, ResolveError::Inactive(ref s) if s == "dormant"));
    }

    #[tokio::test]
    async fn malformed_selector_is_rejected_before_lookup() {
        let err = schema_for("/api/x", &[("x-tenant-slug", "acme\"; drop")]).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidSelector(_)));
    }

    #[tokio::test]
    async fn no_selector_is_no_tenant() {
        let err = schema_for("/api/x", &[]).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoTenant));
    }

    #[tokio::test]
    async fn tokens_are_ignored_without_a_secret() {
        let store = InMemoryStore::with([tenant(1, "acme", true), tenant(2, "other", true)]);
        let resolver = TenantResolver::new(Arc::new(store), None);
        let bearer = format!("Bearer {}", token(Some("acme"), None));

        let ctx = resolver
            .resolve(&parts("/api/x", &[("authorization", bearer.as_str()), ("x-tenant-slug", "other")]))
            .await
            .unwrap();
        assert_eq!(ctx.schema(), "tenant_other");
    }

    #[test]
    fn query_parsing() {
        let tenant_of = |uri: &str| query_tenant(&uri.parse::<Uri>().unwrap());
        assert_eq!(tenant_of("/x?tenant=acme").as_deref(), Some("acme"));
        assert_eq!(tenant_of("/x?a=1&tenant=beta&b=2").as_deref(), Some("beta"));
        assert_eq!(tenant_of("/x?tenant=acme%2Dco").as_deref(), Some("acme-co"));
        assert_eq!(tenant_of("/x?tenants=acme"), None);
        assert_eq!(tenant_of("/x"), None);
    }

    #[tokio::test]
    async fn encoded_query_selector_is_decoded() {
        let store = InMemoryStore::with([tenant(1, "acme-co", true)]);
        let resolver = TenantResolver::new(Arc::new(store), None);

        let ctx = resolver.resolve(&parts("/api/x?tenant=acme%2Dco", &[])).await.unwrap();
        assert_eq!(ctx.schema(), "tenant_acme-co");

        let ctx = resolver.resolve(&parts("/api/x?tenant=%20ACME-CO", &[])).await.unwrap();
        assert_eq!(ctx.schema(), "tenant_acme-co");
    }
}
