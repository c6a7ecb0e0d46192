//! Rendering of the final report: text grid, CSV file, JSON.

use anyhow::{Context, Result};
use fleetprobe_core::ReportRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

pub fn export_filename(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    format!("ServerInventory_{}.csv", ts.format(&fmt).unwrap_or_default())
}

pub fn write_csv<W: Write>(w: W, labels: &[&str], records: &[ReportRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(ReportRecord::header(labels.iter().copied()))?;
    for r in records {
        wtr.write_record(r.cells())?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write `ServerInventory_<timestamp>.csv` under `dir` and return its path.
pub fn write_csv_file(dir: &Path, ts: OffsetDateTime, labels: &[&str], records: &[ReportRecord]) -> Result<PathBuf> {
    let path = dir.join(export_filename(ts));
    let fh = std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    write_csv(std::io::BufWriter::new(fh), labels, records)?;
    Ok(path)
}

pub fn write_json<W: Write>(mut w: W, records: &[ReportRecord]) -> Result<()> {
    serde_json::to_writer_pretty(&mut w, records)?;
    writeln!(w)?;
    Ok(())
}

/// Left-aligned grid with one header row.
pub fn render_table(labels: &[&str], records: &[ReportRecord]) -> String {
    let header = ReportRecord::header(labels.iter().copied());
    let rows: Vec<Vec<String>> = records.iter().map(ReportRecord::cells).collect();
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut out = line(&header);
    out.push('\n');
    out.push_str(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    out.push('\n');
    for row in &rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}
