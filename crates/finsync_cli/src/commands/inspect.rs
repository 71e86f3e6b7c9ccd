//! Inspect command implementation.

use super::{CliResult, OutputFormat};
use finsync_model::CollectionType;
use finsync_storage::FileCache;
use serde::Serialize;
use std::io::Write;
use tracing::warn;

/// Cache inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Cache directory.
    pub dir: String,
    /// Total size of all snapshot files in bytes.
    pub total_size: u64,
    /// Total number of cached entities.
    pub entity_count: usize,
    /// One entry per collection type, present or not.
    pub collections: Vec<CollectionReport>,
}

/// Summary of one collection snapshot.
#[derive(Debug, Serialize)]
pub struct CollectionReport {
    /// Collection name.
    pub collection: CollectionType,
    /// Snapshot state: `present`, `missing` or `unreadable`.
    pub status: &'static str,
    /// Number of entities.
    pub entity_count: usize,
    /// Lowest version in the snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<u64>,
    /// Highest version in the snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_version: Option<u64>,
    /// Save time in milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at_ms: Option<u64>,
    /// File size in bytes.
    pub file_size: u64,
    /// Why the snapshot could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectionReport {
    fn missing(collection: CollectionType) -> Self {
        Self {
            collection,
            status: "missing",
            entity_count: 0,
            min_version: None,
            max_version: None,
            saved_at_ms: None,
            file_size: 0,
            error: None,
        }
    }
}

/// Collects the inspection result for a cache.
///
/// An unreadable snapshot is reported, not treated as a failure.
pub async fn collect(cache: &FileCache) -> InspectResult {
    let mut collections = Vec::with_capacity(CollectionType::ALL.len());

    for collection in CollectionType::ALL {
        let report = match cache.inspect(collection).await {
            Ok(Some(info)) => CollectionReport {
                collection,
                status: "present",
                entity_count: info.entity_count,
                min_version: info.version_range.map(|(lo, _)| lo.get()),
                max_version: info.version_range.map(|(_, hi)| hi.get()),
                saved_at_ms: Some(info.saved_at_ms),
                file_size: info.file_size,
                error: None,
            },
            Ok(None) => CollectionReport::missing(collection),
            Err(e) => {
                warn!(%collection, error = %e, "unreadable snapshot");
                CollectionReport {
                    status: "unreadable",
                    file_size: std::fs::metadata(cache.path_for(collection))
                        .map(|m| m.len())
                        .unwrap_or(0),
                    error: Some(e.to_string()),
                    ..CollectionReport::missing(collection)
                }
            }
        };
        collections.push(report);
    }

    InspectResult {
        dir: cache.dir().display().to_string(),
        total_size: collections.iter().map(|c| c.file_size).sum(),
        entity_count: collections.iter().map(|c| c.entity_count).sum(),
        collections,
    }
}

/// Runs the inspect command.
pub async fn run(cache: &FileCache, format: OutputFormat, out: &mut impl Write) -> CliResult<()> {
    let result = collect(cache).await;
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?,
        OutputFormat::Text => print_text_output(&result, out)?,
    }
    Ok(())
}

fn print_text_output(result: &InspectResult, out: &mut impl Write) -> CliResult<()> {
    writeln!(out, "finsync Cache Inspection")?;
    writeln!(out, "========================")?;
    writeln!(out)?;
    writeln!(out, "Directory: {}", result.dir)?;
    writeln!(out, "Total size: {}", format_size(result.total_size))?;
    writeln!(out, "Entities:   {}", result.entity_count)?;
    writeln!(out)?;
    writeln!(out, "Collections:")?;
    for report in &result.collections {
        match report.status {
            "present" => {
                let versions = match (report.min_version, report.max_version) {
                    (Some(lo), Some(hi)) => format!("v{}..v{}", lo, hi),
                    _ => "-".to_string(),
                };
                writeln!(
                    out,
                    "  {:<14} {:>6} entities  {:<12} {:>10}  saved at {} ms",
                    report.collection.as_str(),
                    report.entity_count,
                    versions,
                    format_size(report.file_size),
                    report.saved_at_ms.unwrap_or_default()
                )?;
            }
            status => {
                writeln!(out, "  {:<14} {}", report.collection.as_str(), status)?;
                if let Some(error) = &report.error {
                    writeln!(out, "    {}", error)?;
                }
            }
        }
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
