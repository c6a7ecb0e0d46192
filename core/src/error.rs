//! Failure kinds a single probe can report.
//!
//! None of these ever leave a worker: each is turned into a data value on the
//! record that owns the probe (a `false`, a `ManagementStatus`, or a sentinel).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("no address found for {0}")]
    Resolution(String),
    #[error("{0} did not respond")]
    Reachability(String),
    #[error("port {port} closed on {host}")]
    PortClosed { host: String, port: u16 },
    #[error("management session unavailable: {0}")]
    ManagementUnavailable(String),
    #[error("inventory query failed: {0}")]
    DeepQuery(String),
    #[error("system facts retrieval failed: {0}")]
    ExtendedFacts(String),
    #[error("admin share unavailable: {0}")]
    ShareUnavailable(String),
    #[error("{probe} timed out after {} ms", .after.as_millis())]
    TimedOut { probe: &'static str, after: Duration },
}

impl ProbeError {
    pub fn timed_out(probe: &'static str, after: Duration) -> Self {
        ProbeError::TimedOut { probe, after }
    }
}
