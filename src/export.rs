//! Record sinks: CSV and JSON writers plus output-file naming.
//!
//! The aggregator treats these as opaque persistence calls; the on-disk
//! format is this module's concern alone. Optional record fields always
//! appear in the output (empty CSV cells, JSON nulls) so downstream readers
//! see a stable schema.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::record::BusinessRecord;
use crate::task::TaskId;

/// Supported sink formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unsupported export format '{}', expected csv or json", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

const CSV_HEADER: [&str; 11] = [
    "name",
    "rating",
    "review_count",
    "category",
    "address",
    "phone",
    "website",
    "hours",
    "price_level",
    "coordinates",
    "source_query",
];

/// Write records in the configured format, creating parent directories.
/// Returns the path actually written.
pub fn persist(records: &[BusinessRecord], path: &Path, format: ExportFormat) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }
    match format {
        ExportFormat::Csv => export_csv(records, path)?,
        ExportFormat::Json => export_json(records, path)?,
    }
    Ok(path.to_path_buf())
}

pub fn export_csv(records: &[BusinessRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create CSV file: {}", path.display()))?;
    writer.write_record(CSV_HEADER)?;

    for record in records {
        let coordinates = record
            .coordinates
            .map(|c| format!("{},{}", c.latitude, c.longitude))
            .unwrap_or_default();
        writer.write_record([
            record.name.as_str(),
            &record.rating.map(|r| r.to_string()).unwrap_or_default(),
            &record.review_count.map(|r| r.to_string()).unwrap_or_default(),
            record.category.as_deref().unwrap_or(""),
            record.address.as_deref().unwrap_or(""),
            record.phone.as_deref().unwrap_or(""),
            record.website.as_deref().unwrap_or(""),
            record.hours.as_deref().unwrap_or(""),
            record.price_level.as_deref().unwrap_or(""),
            &coordinates,
            record.source_query.as_str(),
        ])?;
    }

    writer.flush().context("failed to flush CSV writer")?;
    Ok(())
}

pub fn export_json(records: &[BusinessRecord], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(records).context("failed to serialize records")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write JSON file: {}", path.display()))?;
    Ok(())
}

/// Filesystem-safe slug of a query string.
fn query_slug(query: &str) -> String {
    let slug: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = slug.trim_matches('_');
    let mut out = String::with_capacity(trimmed.len());
    let mut last_underscore = false;
    for c in trimmed.chars() {
        if c == '_' {
            if !last_underscore {
                out.push(c);
            }
            last_underscore = true;
        } else {
            out.push(c);
            last_underscore = false;
        }
    }
    if out.is_empty() { "query".to_string() } else { out }
}

/// Per-task output filename: query slug + timestamp + task id. The task id
/// keeps identical queries submitted in the same second from colliding.
pub fn task_output_filename(query: &str, task_id: TaskId, format: ExportFormat) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}_{}.{}", query_slug(query), timestamp, task_id, format.extension())
}

/// Combined result-set filename for one run.
pub fn combined_output_filename(format: ExportFormat) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    format!("combined_results_{}.{}", timestamp, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Coordinates;
    use tempfile::TempDir;

    fn sample() -> BusinessRecord {
        let mut r = BusinessRecord::new("Cafe Uno", "coffee in soho");
        r.rating = Some(4.5);
        r.review_count = Some(120);
        r.address = Some("5 Grand Ave".to_string());
        r.coordinates = Some(Coordinates { latitude: 40.7, longitude: -74.0 });
        r
    }

    #[test]
    fn test_csv_stable_schema() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.csv");
        export_csv(&[sample(), BusinessRecord::new("Cafe Dos", "coffee in soho")], &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next().unwrap(), CSV_HEADER.join(","));
        assert!(content.contains("Cafe Uno"));
        // Absent fields are present as empty cells, not dropped columns.
        let second = content.lines().nth(2).unwrap();
        assert_eq!(second.split(',').count(), CSV_HEADER.len());
    }

    #[test]
    fn test_json_preserves_nulls() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        export_json(&[BusinessRecord::new("Cafe Dos", "q")], &path).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(parsed[0].get("rating").unwrap().is_null());
        assert_eq!(parsed[0]["name"], "Cafe Dos");
    }

    #[test]
    fn test_persist_creates_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("dir").join("out.json");
        let written = persist(&[sample()], &path, ExportFormat::Json).unwrap();
        assert!(written.exists());
    }

    #[test]
    fn test_task_output_filename_is_collision_safe() {
        let a = task_output_filename("coffee shops in X", TaskId(1), ExportFormat::Csv);
        let b = task_output_filename("coffee shops in X", TaskId(2), ExportFormat::Csv);
        assert_ne!(a, b);
        assert!(a.starts_with("coffee_shops_in_x_"));
        assert!(a.ends_with("_task-1.csv"));
    }

    #[test]
    fn test_query_slug_squeezes_punctuation() {
        assert_eq!(query_slug("  pizza & pasta, Rome!  "), "pizza_pasta_rome");
        assert_eq!(query_slug("???"), "query");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
