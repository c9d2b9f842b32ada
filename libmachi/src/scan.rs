//! Media library scanning

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{MachiError, Result};
use crate::ledger::{normalize_path, Ledger};

/// Summary of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Files found under the root
    pub discovered: usize,
    /// Files newly cataloged
    pub added: usize,
    /// Catalog rows removed because they lie in an excluded folder
    pub removed: u64,
}

/// Walk `root` and catalog every file outside the excluded folders
///
/// Excluded folders are given relative to `root`. Their subtrees are not
/// walked, and rows already cataloged below them are deleted.
pub async fn scan(ledger: &Ledger, root: &Path, exclude_folders: &[String]) -> Result<ScanReport> {
    if !root.is_dir() {
        tracing::error!("Media location is not a directory: {}", root.display());
        return Err(MachiError::InvalidInput(format!(
            "Media location is not a directory: {}",
            root.display()
        )));
    }

    let excluded: Vec<PathBuf> = exclude_folders.iter().map(|folder| root.join(folder)).collect();
    let excluded_keys: HashSet<String> = excluded.iter().map(|p| normalize_path(p)).collect();

    tracing::info!("Scanning {}", root.display());

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && excluded_keys.contains(&normalize_path(e.path()))))
    {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping unreadable entry: {}", e),
        }
    }

    let mut report = ScanReport {
        discovered: files.len(),
        ..ScanReport::default()
    };

    for path in &files {
        if ledger.ingest(path).await? {
            report.added += 1;
        }
    }

    for dir in &excluded {
        report.removed += ledger.purge_excluded(dir).await?;
    }

    tracing::info!(
        "Scan complete: {} files, {} new, {} excluded entries removed",
        report.discovered,
        report.added,
        report.removed
    );
    Ok(report)
}
