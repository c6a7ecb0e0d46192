use anyhow::{anyhow, Context, Result};
use fleetprobe_core::settings::MANAGEMENT_LABEL;
use fleetprobe_core::{PortSet, ScanSettings, ServicePort};
use host_discovery::ReachabilityMethod;
use management::share::DEFAULT_ADMIN_SHARE;
use management::ManagementOptions;
use port_scan::Profile;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "fleetprobe.yaml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub label: String,
    pub port: u16,
}

/// WS-Management endpoint. Authenticated queries use HTTP Basic only, which a stock
/// WinRM listener rejects; enable Basic on the listener and set `https: true`.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ManagementConfig {
    pub port: Option<u16>,
    pub https: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub phase1_concurrency: Option<usize>,
    pub phase2_concurrency: Option<usize>,
    pub port_concurrency: Option<usize>,
    pub probe_timeout_ms: Option<u64>,
    pub management_timeout_ms: Option<u64>,
    pub profile: Option<Profile>,
    /// Replaces the profile's services when set.
    pub ports: Option<Vec<PortEntry>>,
    pub reachability: Option<ReachabilityMethod>,
    /// Comma/range list, e.g. "135,445,3389".
    pub reachability_ports: Option<String>,
    pub management: Option<ManagementConfig>,
    pub admin_share: Option<String>,
}

/// Load the YAML config. An explicit path must exist; the default path is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&s).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_config(s: &str) -> Result<Config> {
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(s)?)
}

impl Config {
    fn management_port(&self) -> Option<u16> {
        self.management.as_ref().and_then(|m| m.port)
    }

    pub fn port_set(&self) -> Result<PortSet> {
        let set = match &self.ports {
            Some(entries) => PortSet::new(
                entries.iter().map(|e| ServicePort::new(&e.label, e.port)).collect(),
                ServicePort::new(MANAGEMENT_LABEL, self.management_port().unwrap_or(fleetprobe_core::settings::MANAGEMENT_PORT)),
            )?,
            None => port_scan::profile_port_set(self.profile.unwrap_or_default(), self.management_port())?,
        };
        Ok(set)
    }

    pub fn scan_settings(&self) -> Result<ScanSettings> {
        let mut s = ScanSettings::new(self.port_set()?);
        if let Some(v) = self.phase1_concurrency { s.phase1_concurrency = v; }
        if let Some(v) = self.phase2_concurrency { s.phase2_concurrency = v; }
        if let Some(v) = self.port_concurrency { s.port_concurrency = v; }
        if let Some(v) = self.probe_timeout_ms { s.probe_timeout = Duration::from_millis(v); }
        if let Some(v) = self.management_timeout_ms { s.management_timeout = Duration::from_millis(v); }
        s.validate()?;
        Ok(s)
    }

    pub fn reachability_method(&self) -> ReachabilityMethod {
        self.reachability.unwrap_or_default()
    }

    pub fn reachability_ports(&self) -> Result<Vec<u16>> {
        match &self.reachability_ports {
            Some(spec) => {
                let ports = port_scan::parse_ports(spec)?;
                if ports.is_empty() { return Err(anyhow!("reachability_ports is empty")); }
                Ok(ports)
            }
            None => Ok(host_discovery::DEFAULT_LIVENESS_PORTS.to_vec()),
        }
    }

    pub fn management_options(&self, settings: &ScanSettings) -> ManagementOptions {
        let m = self.management.clone().unwrap_or_default();
        ManagementOptions {
            port: settings.ports.management().port,
            https: m.https.unwrap_or(false),
            username: m.username,
            password: m.password,
            timeout: settings.management_timeout,
        }
    }

    pub fn admin_share(&self) -> &str {
        self.admin_share.as_deref().unwrap_or(DEFAULT_ADMIN_SHARE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        let s = cfg.scan_settings().unwrap();
        assert_eq!(s.phase1_concurrency, fleetprobe_core::settings::DEFAULT_PHASE1_CONCURRENCY);
        assert_eq!(s.probe_timeout, Duration::from_millis(2000));
        assert_eq!(s.ports.labels().count(), 8);
        assert_eq!(cfg.reachability_method(), ReachabilityMethod::Icmp);
        assert_eq!(cfg.admin_share(), "admin$");
    }

    #[test]
    fn overrides_apply() {
        let yaml = r#"
phase2_concurrency: 4
port_concurrency: 3
probe_timeout_ms: 750
profile: extended
reachability: tcp
reachability_ports: "445,3389"
management:
  port: 5986
  https: true
  username: scanner
"#;
        let cfg = parse_config(yaml).unwrap();
        let s = cfg.scan_settings().unwrap();
        assert_eq!(s.phase2_concurrency, 4);
        assert_eq!(s.phase2_in_flight_bound(), 12);
        assert_eq!(s.probe_timeout, Duration::from_millis(750));
        assert_eq!(s.ports.labels().count(), 13);
        assert_eq!(s.ports.management().port, 5986);
        assert_eq!(cfg.reachability_method(), ReachabilityMethod::Tcp);
        assert_eq!(cfg.reachability_ports().unwrap(), vec![445, 3389]);
        let m = cfg.management_options(&s);
        assert!(m.https);
        assert_eq!(m.username.as_deref(), Some("scanner"));
    }

    #[test]
    fn custom_ports_replace_profile() {
        let yaml = "ports:\n  - { label: HTTPS, port: 443 }\n  - { label: Postgres, port: 5432 }\n";
        let s = parse_config(yaml).unwrap().scan_settings().unwrap();
        assert_eq!(s.ports.labels().collect::<Vec<_>>(), vec!["HTTPS", "Postgres"]);
    }

    #[test]
    fn invalid_values_are_fatal() {
        assert!(parse_config("port_concurrency: 0").unwrap().scan_settings().is_err());
        assert!(parse_config("ports:\n  - { label: A, port: 1 }\n  - { label: a, port: 2 }\n").unwrap().scan_settings().is_err());
        assert!(parse_config("bogus_key: 1").is_err());
        assert!(parse_config("reachability_ports: \"0\"").unwrap().reachability_ports().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/fleetprobe.yaml"))).is_err());
    }
}
