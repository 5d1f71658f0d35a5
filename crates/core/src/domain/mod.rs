pub mod metrics;
pub mod snapshot;
