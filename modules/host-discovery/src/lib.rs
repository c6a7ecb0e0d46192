//! Phase one: resolve each directory host and keep the ones that answer.

use async_trait::async_trait;
use fleetprobe_core::probe::{within, NameResolver, ReachabilityProbe};
use fleetprobe_core::{Aggregator, ConcurrencyLimiter, HostRecord, ProbeError, ReachableHost};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info};

/// Ports tried by the TCP liveness check when none are configured.
pub const DEFAULT_LIVENESS_PORTS: &[u16] = &[135, 445, 3389, 22, 80, 443];

/// Resolve a name to its first IPv4 address.
pub async fn resolve_ipv4(name: &str, limit: Duration) -> Result<IpAddr, ProbeError> {
    let addrs = match timeout(limit, lookup_host((name, 0u16))).await {
        Ok(Ok(it)) => it,
        Ok(Err(e)) => {
            debug!(name, error = %e, "lookup failed");
            return Err(ProbeError::Resolution(name.to_string()));
        }
        Err(_) => return Err(ProbeError::timed_out("resolve", limit)),
    };
    addrs
        .map(|sa| sa.ip())
        .find(IpAddr::is_ipv4)
        .ok_or_else(|| ProbeError::Resolution(name.to_string()))
}

/// [`NameResolver`] using the system resolver.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    pub timeout: Duration,
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr, ProbeError> {
        resolve_ipv4(name, self.timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityMethod {
    /// One ICMP echo request.
    #[default]
    Icmp,
    /// TCP connect to any of a set of ports.
    Tcp,
}

/// TCP-based liveness check: the host is live if any port accepts within `per_attempt`.
/// All ports are tried at once so the whole check costs a single timeout.
pub async fn is_host_live(name: &str, ports: &[u16], per_attempt: Duration) -> bool {
    let mut attempts = JoinSet::new();
    for &p in ports {
        let target = name.to_string();
        attempts.spawn(async move { matches!(timeout(per_attempt, TcpStream::connect((target.as_str(), p))).await, Ok(Ok(_))) });
    }
    while let Some(res) = attempts.join_next().await {
        if let Ok(true) = res {
            attempts.abort_all();
            return true;
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct TcpLiveness {
    pub ports: Vec<u16>,
    pub timeout: Duration,
}

#[async_trait]
impl ReachabilityProbe for TcpLiveness {
    async fn check(&self, name: &str) -> Result<(), ProbeError> {
        if is_host_live(name, &self.ports, self.timeout).await {
            Ok(())
        } else {
            Err(ProbeError::Reachability(name.to_string()))
        }
    }
}

/// Single ICMP echo. The name is re-resolved by the probe itself.
#[derive(Debug, Clone)]
pub struct IcmpEcho {
    pub timeout: Duration,
}

#[async_trait]
impl ReachabilityProbe for IcmpEcho {
    async fn check(&self, name: &str) -> Result<(), ProbeError> {
        let ip = resolve_ipv4(name, self.timeout).await?;
        let payload = [0u8; 32];
        match timeout(self.timeout, surge_ping::ping(ip, &payload)).await {
            Ok(Ok((_packet, rtt))) => {
                debug!(name, rtt_ms = rtt.as_millis() as u64, "echo reply");
                Ok(())
            }
            Ok(Err(e)) => {
                debug!(name, error = %e, "echo failed");
                Err(ProbeError::Reachability(name.to_string()))
            }
            Err(_) => Err(ProbeError::timed_out("icmp", self.timeout)),
        }
    }
}

pub fn reachability_probe(method: ReachabilityMethod, ports: &[u16], limit: Duration) -> Arc<dyn ReachabilityProbe> {
    match method {
        ReachabilityMethod::Icmp => Arc::new(IcmpEcho { timeout: limit }),
        ReachabilityMethod::Tcp => {
            let ports = if ports.is_empty() { DEFAULT_LIVENESS_PORTS.to_vec() } else { ports.to_vec() };
            Arc::new(TcpLiveness { ports, timeout: limit })
        }
    }
}

/// Resolve `host` (primary name first, then alias) and test the first name that resolves.
///
/// Returns `None` when no name resolves or the resolved name does not answer.
pub async fn resolve_reachable(
    host: &HostRecord,
    resolver: &dyn NameResolver,
    reach: &dyn ReachabilityProbe,
    limit: Duration,
) -> Option<ReachableHost> {
    let mut resolved = None;
    for name in host.candidates() {
        match within("resolve", limit, resolver.resolve(name)).await {
            Ok(ip) => {
                resolved = Some((name, ip));
                break;
            }
            Err(e) => debug!(name, error = %e, "resolution failed"),
        }
    }
    let (name, ip) = resolved?;

    if let Err(e) = within("reachability", limit, reach.check(name)).await {
        debug!(name, error = %e, "host unreachable");
        return None;
    }
    Some(ReachableHost {
        chosen_name: name.to_string(),
        ip_address: ip,
        os_name: host.os_name.clone(),
        os_version: host.os_version.clone(),
    })
}

/// Run [`resolve_reachable`] over every host, at most `concurrency` at a time.
/// The result is sorted by host name.
pub async fn discover_reachable(
    hosts: Vec<HostRecord>,
    resolver: Arc<dyn NameResolver>,
    reach: Arc<dyn ReachabilityProbe>,
    concurrency: usize,
    limit: Duration,
) -> Vec<ReachableHost> {
    let total = hosts.len();
    let limiter = ConcurrencyLimiter::new(concurrency);
    let aggregator = Aggregator::new();

    for host in hosts {
        if !host.has_name() {
            debug!("skipping directory entry without a name");
            continue;
        }
        let slot = limiter.admit().await;
        let collector = aggregator.collector();
        let resolver = resolver.clone();
        let reach = reach.clone();
        tokio::spawn(async move {
            if let Some(found) = resolve_reachable(&host, resolver.as_ref(), reach.as_ref(), limit).await {
                collector.submit(found);
            }
            drop(slot);
        });
    }

    let live = aggregator.finish().await;
    info!(total, reachable = live.len(), "reachability phase complete");
    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct FakeNet {
        dns: HashMap<String, IpAddr>,
        up: Vec<String>,
        resolved: Mutex<Vec<String>>,
        pinged: Mutex<Vec<String>>,
    }

    impl FakeNet {
        fn host(mut self, name: &str, ip: [u8; 4], up: bool) -> Self {
            self.dns.insert(name.to_string(), IpAddr::V4(Ipv4Addr::from(ip)));
            if up { self.up.push(name.to_string()); }
            self
        }
    }

    #[async_trait]
    impl NameResolver for FakeNet {
        async fn resolve(&self, name: &str) -> Result<IpAddr, ProbeError> {
            self.resolved.lock().unwrap().push(name.to_string());
            self.dns.get(name).copied().ok_or_else(|| ProbeError::Resolution(name.to_string()))
        }
    }

    #[async_trait]
    impl ReachabilityProbe for FakeNet {
        async fn check(&self, name: &str) -> Result<(), ProbeError> {
            self.pinged.lock().unwrap().push(name.to_string());
            if self.up.iter().any(|u| u == name) { Ok(()) } else { Err(ProbeError::Reachability(name.to_string())) }
        }
    }

    const LIMIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn nameless_host_is_skipped() {
        let net = FakeNet::default();
        let out = resolve_reachable(&HostRecord::new(None, None), &net, &net, LIMIT).await;
        assert!(out.is_none());
        assert!(net.resolved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn primary_wins_and_alias_is_never_tried() {
        let net = FakeNet::default().host("db1.corp.local", [10, 0, 0, 5], true).host("DB1", [10, 0, 0, 6], true);
        let rec = HostRecord::new(Some("db1.corp.local"), Some("DB1")).with_os("Windows Server 2019", "10.0");
        let out = resolve_reachable(&rec, &net, &net, LIMIT).await.unwrap();
        assert_eq!(out.chosen_name, "db1.corp.local");
        assert_eq!(out.ip_address, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(out.os_name, "Windows Server 2019");
        assert_eq!(*net.resolved.lock().unwrap(), vec!["db1.corp.local"]);
    }

    #[tokio::test]
    async fn alias_used_when_primary_does_not_resolve() {
        let net = FakeNet::default().host("DB1", [10, 0, 0, 6], true);
        let rec = HostRecord::new(Some("db1.corp.local"), Some("DB1"));
        let out = resolve_reachable(&rec, &net, &net, LIMIT).await.unwrap();
        assert_eq!(out.chosen_name, "DB1");
        assert_eq!(*net.pinged.lock().unwrap(), vec!["DB1"]);
    }

    #[tokio::test]
    async fn resolved_but_silent_primary_skips_host() {
        let net = FakeNet::default().host("db1.corp.local", [10, 0, 0, 5], false).host("DB1", [10, 0, 0, 6], true);
        let rec = HostRecord::new(Some("db1.corp.local"), Some("DB1"));
        assert!(resolve_reachable(&rec, &net, &net, LIMIT).await.is_none());
        assert_eq!(*net.pinged.lock().unwrap(), vec!["db1.corp.local"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn discovery_is_sorted_and_repeatable() {
        let net = Arc::new(
            FakeNet::default()
                .host("web2", [10, 0, 0, 2], true)
                .host("Web1", [10, 0, 0, 1], true)
                .host("app9", [10, 0, 0, 9], false),
        );
        let hosts = vec![
            HostRecord::new(Some("web2"), None),
            HostRecord::new(None, Some("Web1")),
            HostRecord::new(Some("app9"), None),
            HostRecord::new(Some("ghost"), None),
            HostRecord::new(None, None),
        ];
        let first = discover_reachable(hosts.clone(), net.clone(), net.clone(), 2, LIMIT).await;
        let names: Vec<_> = first.iter().map(|h| h.chosen_name.as_str()).collect();
        assert_eq!(names, vec!["Web1", "web2"]);
        let second = discover_reachable(hosts, net.clone(), net, 2, LIMIT).await;
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn discovery_holds_at_most_the_bound_in_flight() {
        #[derive(Default)]
        struct Slow {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }
        impl Slow {
            async fn work(&self) {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
        #[async_trait]
        impl NameResolver for Slow {
            async fn resolve(&self, _name: &str) -> Result<IpAddr, ProbeError> {
                self.work().await;
                Ok(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            }
        }
        #[async_trait]
        impl ReachabilityProbe for Slow {
            async fn check(&self, _name: &str) -> Result<(), ProbeError> {
                self.work().await;
                Ok(())
            }
        }

        let net = Arc::new(Slow::default());
        let hosts: Vec<_> = (0..10).map(|i| HostRecord::new(Some(format!("srv{:02}", i).as_str()), None)).collect();
        let out = discover_reachable(hosts, net.clone(), net.clone(), 2, LIMIT).await;
        assert_eq!(out.len(), 10);
        assert_eq!(net.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hung_reachability_is_cut_off() {
        struct Hang;
        #[async_trait]
        impl ReachabilityProbe for Hang {
            async fn check(&self, _name: &str) -> Result<(), ProbeError> {
                std::future::pending().await
            }
        }
        let net = FakeNet::default().host("slow", [10, 0, 0, 7], true);
        let rec = HostRecord::new(Some("slow"), None);
        let out = resolve_reachable(&rec, &net, &Hang, Duration::from_millis(50)).await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn tcp_liveness_on_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        assert!(is_host_live("127.0.0.1", &[closed, open], Duration::from_millis(500)).await);
        assert!(!is_host_live("127.0.0.1", &[closed], Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn literal_address_resolves_to_itself() {
        let ip = resolve_ipv4("127.0.0.1", LIMIT).await.unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
