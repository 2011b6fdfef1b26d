pub mod definition;
pub mod executor;
pub mod registry;
pub mod runner;
pub mod tracker;

pub use definition::{MigrationDefinition, MigrationScope, MigrationSource, SchemaKind, Version};
pub use executor::{ApplyOutcome, MigrationExecutor};
pub use registry::MigrationRegistry;
pub use runner::{MigrationStatus, Migrator, SchemaReport};
pub use tracker::MigrationTracker;
