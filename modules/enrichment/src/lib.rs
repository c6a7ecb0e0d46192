//! Phase two: per-host service probing and metadata enrichment.

pub mod pipeline;

use fleetprobe_core::probe::{within, ManagementProbe, PortProbe, ShareProbe};
use fleetprobe_core::{Aggregator, ConcurrencyLimiter, ManagementStatus, ReachableHost, ReportRecord, ScanSettings};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info};

pub use pipeline::{run_scan, Discovery, ScanReport};

/// The probes one enrichment worker uses. Cheap to clone; shared by all workers.
#[derive(Clone)]
pub struct ProbeSet {
    pub ports: Arc<dyn PortProbe>,
    pub management: Arc<dyn ManagementProbe>,
    pub share: Arc<dyn ShareProbe>,
}

/// Probe one reachable host and build its report record.
///
/// Always returns a record; every failed step leaves its field at the default.
/// System facts are only queried after a successful management handshake.
/// Every network call made here, port probes and management steps alike, holds a
/// slot of one per-host limiter sized by `port_concurrency`.
pub async fn enrich_host(
    host: &ReachableHost,
    probes: &ProbeSet,
    settings: &ScanSettings,
    scan_timestamp: OffsetDateTime,
) -> ReportRecord {
    let name = host.chosen_name.as_str();
    let limit = settings.management_timeout;
    let slots = ConcurrencyLimiter::new(settings.port_concurrency);
    let mut record = ReportRecord::new(scan_timestamp, host, settings.ports.labels());

    let sweep = port_scan::sweep_ports(
        probes.ports.clone(),
        name,
        &settings.ports,
        &slots,
        settings.probe_timeout,
    );
    let inventory = slots.run(within("inventory", limit, probes.management.inventory(name)));
    let session = async {
        let handshake = slots.run(within("identify", limit, probes.management.identify(name))).await;
        let facts = match handshake {
            Ok(()) => Some(slots.run(within("system facts", limit, probes.management.system_facts(name))).await),
            Err(_) => None,
        };
        (handshake, facts)
    };
    let share = slots.run(within("admin share", limit, probes.share.check(name)));

    let (swept, inventory, (handshake, facts), share) = tokio::join!(sweep, inventory, session, share);

    let mgmt_label = settings.ports.management().label.as_str();
    let mut mgmt_port_open = false;
    for p in swept {
        if p.label == mgmt_label {
            mgmt_port_open = p.is_open;
        } else {
            record.set_port(&p.label, p.is_open);
        }
    }

    match inventory {
        Ok(()) => record.disk_management_available = true,
        Err(e) => debug!(host = name, error = %e, "inventory query failed"),
    }

    if let Err(e) = &handshake {
        debug!(host = name, error = %e, port_open = mgmt_port_open, "management handshake failed");
    }
    record.management = ManagementStatus::resolve(handshake.is_ok(), mgmt_port_open);

    if let Some(facts) = facts {
        let facts = match facts {
            Ok(f) => Some(f),
            Err(e) => {
                debug!(host = name, error = %e, "system facts unavailable");
                None
            }
        };
        record.record_facts(facts, OffsetDateTime::now_utc());
    }

    match share {
        Ok(()) => record.admin_share_available = true,
        Err(e) => debug!(host = name, error = %e, "admin share unavailable"),
    }

    record
}

/// Run [`enrich_host`] over every reachable host, at most `phase2_concurrency` at a time.
/// Exactly one record per host, sorted by host name.
pub async fn enrich_all(
    hosts: Vec<ReachableHost>,
    probes: ProbeSet,
    settings: Arc<ScanSettings>,
    scan_timestamp: OffsetDateTime,
) -> Vec<ReportRecord> {
    let total = hosts.len();
    let limiter = ConcurrencyLimiter::new(settings.phase2_concurrency);
    let aggregator = Aggregator::new();
    let mut handles = Vec::with_capacity(total);

    for host in hosts {
        let slot = limiter.admit().await;
        let collector = aggregator.collector();
        let probes = probes.clone();
        let settings = settings.clone();
        let task_host = host.clone();
        let handle = tokio::spawn(async move {
            let record = enrich_host(&task_host, &probes, &settings, scan_timestamp).await;
            collector.submit(record);
            drop(slot);
        });
        handles.push((host, handle));
    }

    // A worker that died must still leave its host in the report.
    let fallback = aggregator.collector();
    for (host, handle) in handles {
        if let Err(e) = handle.await {
            error!(host = %host.chosen_name, error = %e, "enrichment worker failed");
            fallback.submit(ReportRecord::new(scan_timestamp, &host, settings.ports.labels()));
        }
    }
    drop(fallback);

    let records = aggregator.finish().await;
    info!(total, reported = records.len(), "enrichment phase complete");
    records
}
