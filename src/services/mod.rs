pub mod directory;
pub mod lifecycle;
pub mod metrics;
