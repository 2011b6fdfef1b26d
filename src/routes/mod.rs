pub mod health;
pub mod metrics;
pub mod tenant_info;
pub mod tenants;
