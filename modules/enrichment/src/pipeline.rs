//! Directory inventory in, sorted report out.

use crate::{enrich_all, ProbeSet};
use fleetprobe_core::probe::{NameResolver, ReachabilityProbe};
use fleetprobe_core::{HostRecord, ReachableHost, ReportRecord, ScanSettings};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{info, warn};

/// Probes used by the reachability phase.
#[derive(Clone)]
pub struct Discovery {
    pub resolver: Arc<dyn NameResolver>,
    pub reachability: Arc<dyn ReachabilityProbe>,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub scan_timestamp: OffsetDateTime,
    pub inventory_count: usize,
    pub reachable: Vec<ReachableHost>,
    pub records: Vec<ReportRecord>,
    pub elapsed: Duration,
}

/// Run both phases. Phase two starts only once phase one has fully drained.
/// No reachable hosts is an empty report, not an error.
pub async fn run_scan(
    inventory: Vec<HostRecord>,
    discovery: Discovery,
    probes: ProbeSet,
    settings: Arc<ScanSettings>,
) -> ScanReport {
    let started = Instant::now();
    let scan_timestamp = OffsetDateTime::now_utc();
    let inventory_count = inventory.len();
    info!(hosts = inventory_count, concurrency = settings.phase1_concurrency, "starting reachability phase");

    let reachable = host_discovery::discover_reachable(
        inventory,
        discovery.resolver,
        discovery.reachability,
        settings.phase1_concurrency,
        settings.probe_timeout,
    )
    .await;

    let records = if reachable.is_empty() {
        warn!("no reachable hosts; skipping enrichment");
        Vec::new()
    } else {
        info!(
            hosts = reachable.len(),
            concurrency = settings.phase2_concurrency,
            max_in_flight = settings.phase2_in_flight_bound(),
            "starting enrichment phase"
        );
        enrich_all(reachable.clone(), probes, settings, scan_timestamp).await
    };

    ScanReport { scan_timestamp, inventory_count, reachable, records, elapsed: started.elapsed() }
}
