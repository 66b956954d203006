//! CSV export of trend series.

use crate::{Result, TrendPoint};
use std::io::Write;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    timestamp: String,
    bg: Option<f64>,
    rate: Option<f64>,
}

impl From<&TrendPoint> for CsvRow {
    fn from(point: &TrendPoint) -> Self {
        CsvRow {
            timestamp: point.timestamp.to_rfc3339(),
            bg: point.bg,
            rate: point.rate,
        }
    }
}

/// Write a series as `timestamp,bg,rate` rows. Returns the row count.
pub fn write_series<W: Write>(writer: W, points: &[TrendPoint]) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    // Header is written explicitly so an empty series still has one
    writer.write_record(["timestamp", "bg", "rate"])?;
    for point in points {
        writer.serialize(CsvRow::from(point))?;
    }
    writer.flush()?;
    Ok(points.len())
}

/// Export a series to a file, syncing it to disk before returning
pub fn export_series(path: &Path, points: &[TrendPoint]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(path)?;
    let count = write_series(&file, points)?;
    file.sync_all()?;

    tracing::info!("Exported {} trend points to {:?}", count, path);
    Ok(count)
}
