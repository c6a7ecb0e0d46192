//! Scan-wide constants: concurrency bounds, timeouts and the port set.

use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PHASE1_CONCURRENCY: usize = 64;
pub const DEFAULT_PHASE2_CONCURRENCY: usize = 16;
pub const DEFAULT_PORT_CONCURRENCY: usize = 8;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_MANAGEMENT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const MANAGEMENT_LABEL: &str = "WinRM";
pub const MANAGEMENT_PORT: u16 = 5985;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("port label must not be empty")]
    EmptyLabel,
    #[error("duplicate port label: {0}")]
    DuplicateLabel(String),
    #[error("invalid port 0 for {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub label: String,
    pub port: u16,
}

impl ServicePort {
    pub fn new(label: &str, port: u16) -> Self {
        ServicePort { label: label.to_string(), port }
    }
}

/// Ordered services exported as columns, plus the management port swept
/// alongside them but never exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSet {
    services: Vec<ServicePort>,
    management: ServicePort,
}

impl PortSet {
    pub fn new(services: Vec<ServicePort>, management: ServicePort) -> Result<Self, SettingsError> {
        let mut seen = HashSet::new();
        for s in services.iter().chain(std::iter::once(&management)) {
            if s.label.trim().is_empty() { return Err(SettingsError::EmptyLabel); }
            if s.port == 0 { return Err(SettingsError::InvalidPort(s.label.clone())); }
            if !seen.insert(s.label.to_lowercase()) {
                return Err(SettingsError::DuplicateLabel(s.label.clone()));
            }
        }
        Ok(PortSet { services, management })
    }

    pub fn services(&self) -> &[ServicePort] { &self.services }

    pub fn management(&self) -> &ServicePort { &self.management }

    /// Exported labels, in column order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.label.as_str())
    }

    /// Everything the per-host sweep probes.
    pub fn sweep(&self) -> impl Iterator<Item = &ServicePort> {
        self.services.iter().chain(std::iter::once(&self.management))
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub phase1_concurrency: usize,
    pub phase2_concurrency: usize,
    pub port_concurrency: usize,
    pub probe_timeout: Duration,
    pub management_timeout: Duration,
    pub ports: PortSet,
}

impl ScanSettings {
    pub fn new(ports: PortSet) -> Self {
        ScanSettings {
            phase1_concurrency: DEFAULT_PHASE1_CONCURRENCY,
            phase2_concurrency: DEFAULT_PHASE2_CONCURRENCY,
            port_concurrency: DEFAULT_PORT_CONCURRENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            management_timeout: DEFAULT_MANAGEMENT_TIMEOUT,
            ports,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.phase1_concurrency == 0 { return Err(SettingsError::Zero("phase1_concurrency")); }
        if self.phase2_concurrency == 0 { return Err(SettingsError::Zero("phase2_concurrency")); }
        if self.port_concurrency == 0 { return Err(SettingsError::Zero("port_concurrency")); }
        if self.probe_timeout.is_zero() { return Err(SettingsError::Zero("probe_timeout_ms")); }
        if self.management_timeout.is_zero() { return Err(SettingsError::Zero("management_timeout_ms")); }
        Ok(())
    }

    /// Upper bound on network operations in flight during phase 2.
    pub fn phase2_in_flight_bound(&self) -> usize {
        self.phase2_concurrency.saturating_mul(self.port_concurrency)
    }
}
