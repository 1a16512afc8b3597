//! Batch scanning of catalog files on disk.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::extract::MetadataExtractor;
use crate::query::CatalogQuery;
use crate::record::DriverRecord;

/// Errors that stop a scan before it starts.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scan root does not exist.
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),
}

/// Counters for a finished scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanSummary {
    /// Catalogs processed.
    pub total: usize,
    /// Catalogs that produced at least one metadata entry.
    pub with_metadata: usize,
    /// Catalogs that opened but produced no metadata.
    pub empty: usize,
    /// Catalogs that could not be opened.
    pub failed: usize,
}

/// The records produced by a scan, one per catalog, plus counters.
#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    /// One record per catalog, in scan order.
    pub records: Vec<DriverRecord>,
    /// Counters.
    pub summary: ScanSummary,
}

fn is_catalog(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("cat"))
}

/// Scans `root`: a single file is processed as-is, a directory is walked
/// recursively for `*.cat` files.
///
/// A catalog that fails to open yields a record with empty metadata; it never
/// aborts the rest of the scan.
pub fn scan_path<Q: CatalogQuery>(
    root: impl AsRef<Path>,
    extractor: &MetadataExtractor<Q>,
) -> Result<ScanReport, ScanError> {
    let root = root.as_ref();
    if !root.exists() {
        return Err(ScanError::NotFound(root.to_path_buf()));
    }

    let mut report = ScanReport::default();

    if root.is_file() {
        scan_one(root, extractor, &mut report);
    } else {
        info!("Starting catalog scan: {}", root.display());
        for entry in WalkDir::new(root).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_catalog(entry.path()) => {
                    scan_one(entry.path(), extractor, &mut report);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry under {}: {e}", root.display()),
            }
        }
    }

    let s = report.summary;
    info!(
        total = s.total,
        with_metadata = s.with_metadata,
        empty = s.empty,
        failed = s.failed,
        "Scan complete"
    );
    Ok(report)
}

fn scan_one<Q: CatalogQuery>(
    path: &Path,
    extractor: &MetadataExtractor<Q>,
    report: &mut ScanReport,
) {
    let mut record = DriverRecord::for_catalog(path);
    report.summary.total += 1;

    match extractor.extract(path) {
        Ok(entries) if entries.is_empty() => {
            debug!("No metadata in {}", path.display());
            report.summary.empty += 1;
        }
        Ok(entries) => {
            record.merge_metadata(&entries);
            report.summary.with_metadata += 1;
        }
        Err(e) => {
            warn!(stage = e.stage(), "Failed to parse {}: {e}", path.display());
            report.summary.failed += 1;
        }
    }

    report.records.push(record);
}
