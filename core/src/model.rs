//! Records flowing through the two scan phases.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Placeholder for a fact that was attempted and could not be retrieved.
pub const RETRIEVAL_FAILED: &str = "retrieval-failed";

/// Export columns preceding the per-port columns, in contract order.
pub const LEADING_COLUMNS: [&str; 9] = [
    "ScanDate",
    "Server",
    "IPAddress",
    "OperatingSystem",
    "OSVersion",
    "Online",
    "WMI",
    "WinRM",
    "RPC_over_SMB",
];

/// Export columns following the per-port columns.
pub const TRAILING_COLUMNS: [&str; 2] = ["InstallDate", "UptimeDays"];

/// One host as listed by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostRecord {
    pub primary_name: Option<String>,
    pub alias_name: Option<String>,
    pub os_name: String,
    pub os_version: String,
}

impl HostRecord {
    pub fn new(primary: Option<&str>, alias: Option<&str>) -> Self {
        HostRecord {
            primary_name: primary.map(str::to_string),
            alias_name: alias.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_os(mut self, name: &str, version: &str) -> Self {
        self.os_name = name.to_string();
        self.os_version = version.to_string();
        self
    }

    /// Names to try for resolution, primary first. Blank names are skipped.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        [self.primary_name.as_deref(), self.alias_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    pub fn has_name(&self) -> bool {
        self.candidates().next().is_some()
    }
}

/// A host that resolved and answered the reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachableHost {
    pub chosen_name: String,
    pub ip_address: IpAddr,
    pub os_name: String,
    pub os_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortProbeResult {
    pub label: String,
    pub is_open: bool,
}

/// Result of the management-session handshake, refined by the management port sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ManagementStatus {
    #[default]
    Unavailable,
    /// The management port accepted a TCP connection but the handshake failed.
    PortOnly,
    Available,
}

impl ManagementStatus {
    pub fn resolve(handshake_ok: bool, port_open: bool) -> Self {
        match (handshake_ok, port_open) {
            (true, _) => ManagementStatus::Available,
            (false, true) => ManagementStatus::PortOnly,
            (false, false) => ManagementStatus::Unavailable,
        }
    }
}

impl fmt::Display for ManagementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagementStatus::Unavailable => "Unavailable",
            ManagementStatus::PortOnly => "PortOnly",
            ManagementStatus::Available => "Available",
        };
        f.write_str(s)
    }
}

/// A remote fact that is either never attempted, attempted and failed, or known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fact<T> {
    NotAttempted,
    Failed,
    Value(T),
}

impl<T> Fact<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Fact::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: fmt::Display> Fact<T> {
    /// Flat text cell: empty when not attempted.
    pub fn cell(&self) -> String {
        match self {
            Fact::NotAttempted => String::new(),
            Fact::Failed => RETRIEVAL_FAILED.to_string(),
            Fact::Value(v) => v.to_string(),
        }
    }
}

impl<T: Serialize> Serialize for Fact<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Fact::NotAttempted => serializer.serialize_none(),
            Fact::Failed => serializer.serialize_str(RETRIEVAL_FAILED),
            Fact::Value(v) => v.serialize(serializer),
        }
    }
}

/// Calendar date rendered as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarDate(pub Date);

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.0.year(), u8::from(self.0.month()), self.0.day())
    }
}

impl Serialize for CalendarDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Uptime in days, kept at one decimal place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UptimeDays(f64);

impl UptimeDays {
    pub fn between(last_boot: OffsetDateTime, now: OffsetDateTime) -> Self {
        let days = (now - last_boot).as_seconds_f64() / 86_400.0;
        UptimeDays((days * 10.0).round() / 10.0)
    }

    pub fn days(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for UptimeDays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

impl Serialize for UptimeDays {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

/// Install date and last boot time as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemFacts {
    pub install_date: Date,
    pub last_boot: OffsetDateTime,
}

/// Consolidated view of one reachable host.
///
/// Built with every configured port label present and `false`; only the
/// enrichment worker that created it fills it in.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRecord {
    pub scan_timestamp: OffsetDateTime,
    pub host: String,
    pub ip_address: IpAddr,
    pub os_name: String,
    pub os_version: String,
    pub online: bool,
    pub disk_management_available: bool,
    pub management: ManagementStatus,
    pub admin_share_available: bool,
    ports: Vec<PortProbeResult>,
    pub install_date: Fact<CalendarDate>,
    pub uptime_days: Fact<UptimeDays>,
}

impl ReportRecord {
    pub fn new<'a>(
        scan_timestamp: OffsetDateTime,
        host: &ReachableHost,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        ReportRecord {
            scan_timestamp,
            host: host.chosen_name.clone(),
            ip_address: host.ip_address,
            os_name: host.os_name.clone(),
            os_version: host.os_version.clone(),
            online: true,
            disk_management_available: false,
            management: ManagementStatus::Unavailable,
            admin_share_available: false,
            ports: labels
                .into_iter()
                .map(|label| PortProbeResult { label: label.to_string(), is_open: false })
                .collect(),
            install_date: Fact::NotAttempted,
            uptime_days: Fact::NotAttempted,
        }
    }

    /// Record a probe outcome. Returns false for a label this record was not built with.
    pub fn set_port(&mut self, label: &str, open: bool) -> bool {
        match self.ports.iter_mut().find(|p| p.label == label) {
            Some(p) => {
                p.is_open = open;
                true
            }
            None => false,
        }
    }

    pub fn port_open(&self, label: &str) -> Option<bool> {
        self.ports.iter().find(|p| p.label == label).map(|p| p.is_open)
    }

    pub fn ports(&self) -> &[PortProbeResult] {
        &self.ports
    }

    pub fn record_facts(&mut self, facts: Option<SystemFacts>, now: OffsetDateTime) {
        match facts {
            Some(f) => {
                self.install_date = Fact::Value(CalendarDate(f.install_date));
                self.uptime_days = Fact::Value(UptimeDays::between(f.last_boot, now));
            }
            None => {
                self.install_date = Fact::Failed;
                self.uptime_days = Fact::Failed;
            }
        }
    }

    pub fn scan_date(&self) -> String {
        let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        self.scan_timestamp.format(&fmt).unwrap_or_default()
    }

    /// Column names for records built with `labels`, in export order.
    pub fn header<'a>(labels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut header: Vec<String> = LEADING_COLUMNS.iter().map(|c| c.to_string()).collect();
        header.extend(labels.into_iter().map(str::to_string));
        header.extend(TRAILING_COLUMNS.iter().map(|c| c.to_string()));
        header
    }

    /// Flat text cells matching `header`.
    pub fn cells(&self) -> Vec<String> {
        let mut row = vec![
            self.scan_date(),
            self.host.clone(),
            self.ip_address.to_string(),
            self.os_name.clone(),
            self.os_version.clone(),
            bool_cell(self.online),
            bool_cell(self.disk_management_available),
            self.management.to_string(),
            bool_cell(self.admin_share_available),
        ];
        row.extend(self.ports.iter().map(|p| bool_cell(p.is_open)));
        row.push(self.install_date.cell());
        row.push(self.uptime_days.cell());
        row
    }
}

fn bool_cell(v: bool) -> String {
    let s = if v { "True" } else { "False" };
    s.to_string()
}

impl Serialize for ReportRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = LEADING_COLUMNS.len() + self.ports.len() + TRAILING_COLUMNS.len();
        let mut map = serializer.serialize_map(Some(len))?;
        let scan_date = self.scan_timestamp.format(&Rfc3339).unwrap_or_default();
        map.serialize_entry("ScanDate", &scan_date)?;
        map.serialize_entry("Server", &self.host)?;
        map.serialize_entry("IPAddress", &self.ip_address.to_string())?;
        map.serialize_entry("OperatingSystem", &self.os_name)?;
        map.serialize_entry("OSVersion", &self.os_version)?;
        map.serialize_entry("Online", &self.online)?;
        map.serialize_entry("WMI", &self.disk_management_available)?;
        map.serialize_entry("WinRM", &self.management)?;
        map.serialize_entry("RPC_over_SMB", &self.admin_share_available)?;
        for p in &self.ports {
            map.serialize_entry(&p.label, &p.is_open)?;
        }
        map.serialize_entry("InstallDate", &self.install_date)?;
        map.serialize_entry("UptimeDays", &self.uptime_days)?;
        map.end()
    }
}

/// Identifier records are ordered by when aggregated.
pub trait HostKey {
    fn host_key(&self) -> &str;
}

impl HostKey for ReachableHost {
    fn host_key(&self) -> &str {
        &self.chosen_name
    }
}

impl HostKey for ReportRecord {
    fn host_key(&self) -> &str {
        &self.host
    }
}
