//! TCP connect probes with timeouts, service profiles, and the per-host port sweep.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fleetprobe_core::probe::{within, PortProbe};
use fleetprobe_core::settings::{MANAGEMENT_LABEL, MANAGEMENT_PORT};
use fleetprobe_core::{ConcurrencyLimiter, PortProbeResult, PortSet, ProbeError, ServicePort, SettingsError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Parse a comma-separated list of ports/ranges (e.g., "22,80,443", "1-1024,8080").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse()?;
            let e: u16 = end.trim().parse()?;
            if s == 0 || e == 0 || s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse()?;
            if p == 0 {
                return Err(anyhow!("invalid port: {}", part));
            }
            ports.push(p);
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

/// Which service columns a scan reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Standard,
    Extended,
}

const STANDARD: &[(&str, u16)] = &[
    ("RDP", 3389),
    ("HTTP", 80),
    ("HTTPS", 443),
    ("FTP", 21),
    ("SSH", 22),
    ("LDAP", 389),
    ("LDAPS", 636),
    ("Kerberos", 88),
];

const EXTENDED_EXTRA: &[(&str, u16)] = &[
    ("SMB", 445),
    ("RPC", 135),
    ("MSSQL", 1433),
    ("SMTP", 25),
    ("SMTPS", 465),
];

/// Service columns for a profile, in report order.
pub fn profile_services(profile: Profile) -> Vec<ServicePort> {
    let extra: &[(&str, u16)] = match profile {
        Profile::Standard => &[],
        Profile::Extended => EXTENDED_EXTRA,
    };
    STANDARD.iter().chain(extra).map(|&(label, port)| ServicePort::new(label, port)).collect()
}

/// Profile services plus the management port under its usual label.
pub fn profile_port_set(profile: Profile, management_port: Option<u16>) -> Result<PortSet, SettingsError> {
    PortSet::new(
        profile_services(profile),
        ServicePort::new(MANAGEMENT_LABEL, management_port.unwrap_or(MANAGEMENT_PORT)),
    )
}

/// Attempt a TCP connection; only a fully established connection within `limit` counts.
pub async fn probe_port(host: &str, port: u16, limit: Duration) -> Result<(), ProbeError> {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => {
            trace!(host, port, error = %e, "connect failed");
            Err(ProbeError::PortClosed { host: host.to_string(), port })
        }
        Err(_) => Err(ProbeError::timed_out("port", limit)),
    }
}

/// [`PortProbe`] backed by real TCP connects.
#[derive(Debug, Clone)]
pub struct TcpPortProbe {
    pub timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(timeout: Duration) -> Self {
        TcpPortProbe { timeout }
    }
}

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn check(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        probe_port(host, port, self.timeout).await
    }
}

/// Probe every port in `ports.sweep()` concurrently; each probe holds a slot of `limiter`.
///
/// The limiter is per host and may be shared with the host's other network steps.
/// The returned list holds one entry per swept service (management included),
/// in sweep order, whatever each probe's outcome.
pub async fn sweep_ports(
    prober: Arc<dyn PortProbe>,
    host: &str,
    ports: &PortSet,
    limiter: &ConcurrencyLimiter,
    limit: Duration,
) -> Vec<PortProbeResult> {
    let services: Vec<ServicePort> = ports.sweep().cloned().collect();
    trace!(host, ports = services.len(), slots = limiter.bound(), "sweeping ports");
    let (tx, mut rx) = mpsc::channel::<(usize, bool)>(services.len().max(1));

    for (idx, svc) in services.iter().enumerate() {
        let tx = tx.clone();
        let prober = prober.clone();
        let limiter = limiter.clone();
        let host = host.to_string();
        let port = svc.port;
        tokio::spawn(async move {
            let res = limiter.run(within("port", limit, prober.check(&host, port))).await;
            if let Err(e) = &res {
                debug!(host = %host, port, error = %e, "port probe negative");
            }
            let _ = tx.send((idx, res.is_ok())).await;
        });
    }
    drop(tx);

    let mut results: Vec<PortProbeResult> = services
        .iter()
        .map(|s| PortProbeResult { label: s.label.clone(), is_open: false })
        .collect();
    while let Some((idx, open)) = rx.recv().await {
        results[idx].is_open = open;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[test]
    fn parse_simple_list() {
        let v = parse_ports("22,80,443").unwrap();
        assert_eq!(v, vec![22, 80, 443]);
    }

    #[test]
    fn parse_ranges_and_list() {
        let v = parse_ports("1-3,5,3").unwrap();
        assert_eq!(v, vec![1, 2, 3, 5]);
    }

    #[test]
    fn reject_invalid() {
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("10-5").is_err());
    }

    #[test]
    fn extended_profile_appends_to_standard() {
        let std_labels: Vec<_> = profile_services(Profile::Standard).into_iter().map(|s| s.label).collect();
        assert_eq!(std_labels, vec!["RDP", "HTTP", "HTTPS", "FTP", "SSH", "LDAP", "LDAPS", "Kerberos"]);
        let ext = profile_services(Profile::Extended);
        assert_eq!(ext.len(), 13);
        assert_eq!(ext[8], ServicePort::new("SMB", 445));
        let set = profile_port_set(Profile::Standard, None).unwrap();
        assert_eq!(set.management().port, 5985);
        assert!(set.labels().all(|l| l != MANAGEMENT_LABEL));
    }

    #[tokio::test]
    async fn open_loopback_port_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_port("127.0.0.1", port, Duration::from_millis(500)).await.is_ok());
    }

    #[tokio::test]
    async fn closed_loopback_port_is_negative() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let res = probe_port("127.0.0.1", port, Duration::from_millis(500)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn unresponsive_target_returns_within_timeout() {
        let started = Instant::now();
        // TEST-NET-1, never routed.
        let res = probe_port("192.0.2.1", 3389, Duration::from_millis(300)).await;
        assert!(res.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    struct Scripted {
        open: HashSet<u16>,
        hang: HashSet<u16>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PortProbe for Scripted {
        async fn check(&self, host: &str, port: u16) -> Result<(), ProbeError> {
            if self.hang.contains(&port) {
                std::future::pending::<()>().await;
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.open.contains(&port) {
                Ok(())
            } else {
                Err(ProbeError::PortClosed { host: host.to_string(), port })
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweep_reports_every_label_and_respects_bound() {
        let prober = Arc::new(Scripted {
            open: [443, 5985].into_iter().collect(),
            hang: [22].into_iter().collect(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let set = profile_port_set(Profile::Extended, None).unwrap();
        let started = Instant::now();
        let res = sweep_ports(prober.clone(), "db1", &set, &ConcurrencyLimiter::new(2), Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(res.len(), set.sweep().count());
        for r in &res {
            let expect = r.label == "HTTPS" || r.label == MANAGEMENT_LABEL;
            assert_eq!(r.is_open, expect, "{}", r.label);
        }
        assert!(prober.peak.load(Ordering::SeqCst) <= 2);
    }
}
