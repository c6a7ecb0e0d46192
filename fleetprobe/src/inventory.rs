//! Directory inventory import (CSV export of the directory computer query).

use anyhow::{Context, Result};
use fleetprobe_core::HostRecord;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DirectoryRow {
    #[serde(rename = "DNSHostName", default)]
    dns_host_name: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "OperatingSystem", default)]
    operating_system: Option<String>,
    #[serde(rename = "OperatingSystemVersion", default)]
    operating_system_version: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl From<DirectoryRow> for HostRecord {
    fn from(row: DirectoryRow) -> Self {
        HostRecord {
            primary_name: non_blank(row.dns_host_name),
            alias_name: non_blank(row.name),
            os_name: row.operating_system.unwrap_or_default(),
            os_version: row.operating_system_version.unwrap_or_default(),
        }
    }
}

pub fn read_inventory<R: Read>(reader: R) -> Result<Vec<HostRecord>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).flexible(true).from_reader(reader);
    let mut hosts = Vec::new();
    for (i, row) in rdr.deserialize::<DirectoryRow>().enumerate() {
        let row = row.with_context(|| format!("inventory row {}", i + 1))?;
        hosts.push(row.into());
    }
    Ok(hosts)
}

pub fn load_inventory(path: &Path) -> Result<Vec<HostRecord>> {
    let fh = std::fs::File::open(path).with_context(|| format!("opening inventory {}", path.display()))?;
    read_inventory(fh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_directory_export() {
        let data = "DNSHostName,Name,OperatingSystem,OperatingSystemVersion\n\
                    db1.corp.local,DB1,Windows Server 2019 Standard,10.0 (17763)\n\
                    ,LEGACY01,Windows Server 2008 R2,6.1 (7601)\n\
                    ,,,\n";
        let hosts = read_inventory(data.as_bytes()).unwrap();
        assert_eq!(hosts.len(), 3);
        assert_eq!(hosts[0].primary_name.as_deref(), Some("db1.corp.local"));
        assert_eq!(hosts[0].alias_name.as_deref(), Some("DB1"));
        assert_eq!(hosts[0].os_version, "10.0 (17763)");
        assert_eq!(hosts[1].primary_name, None);
        assert_eq!(hosts[1].alias_name.as_deref(), Some("LEGACY01"));
        assert!(!hosts[2].has_name());
    }

    #[test]
    fn column_order_does_not_matter() {
        let data = "Name,DNSHostName\nWEB1,web1.corp.local\n";
        let hosts = read_inventory(data.as_bytes()).unwrap();
        assert_eq!(hosts[0].primary_name.as_deref(), Some("web1.corp.local"));
        assert_eq!(hosts[0].os_name, "");
    }
}
