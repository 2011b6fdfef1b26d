use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    pub static ref MIGRATIONS_APPLIED: CounterVec = register_counter_vec!(
        "migrations_applied_total",
        "Migrations applied, by schema kind",
        &["scope_kind"]
    ).unwrap();

    pub static ref MIGRATIONS_FAILED: CounterVec = register_counter_vec!(
        "migrations_failed_total",
        "Migrations that failed and were rolled back, by schema kind",
        &["scope_kind"]
    ).unwrap();

    pub static ref TENANT_PROVISIONING: CounterVec = register_counter_vec!(
        "tenant_provisioning_total",
        "Tenant create workflows by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref TENANT_RESOLUTION: CounterVec = register_counter_vec!(
        "tenant_resolution_total",
        "Request tenant resolutions by outcome",
        &["outcome"]
    ).unwrap();
}
