//! Shared types for the fleetprobe pipeline: host records, probe seams,
//! the concurrency limiter and the result aggregator.

pub mod aggregate;
pub mod error;
pub mod limiter;
pub mod model;
pub mod probe;
pub mod settings;

pub use aggregate::{Aggregator, Collector};
pub use error::ProbeError;
pub use limiter::ConcurrencyLimiter;
pub use model::*;
pub use settings::{PortSet, ScanSettings, ServicePort, SettingsError};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
