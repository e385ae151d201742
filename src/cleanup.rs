use anyhow::{anyhow, Result};
use colored::*;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub files: usize,
    pub bytes: u64,
    pub deleted: bool,
}

impl CleanupReport {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Deletes the output directory (converted PDFs, table of contents and the
/// finished book). A dry run only reports what would be removed. A missing
/// directory is not an error.
pub async fn cleanup(output_dir: &Path, dry_run: bool) -> Result<CleanupReport> {
    if !output_dir.exists() {
        info!("Output directory does not exist: {}", output_dir.display());
        return Ok(CleanupReport::default());
    }

    let mut report = CleanupReport::default();
    let mut pending = vec![output_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| anyhow!("Failed to read directory {}: {}", dir.display(), e))?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                report.files += 1;
                report.bytes += metadata.len();
            }
        }
    }

    info!("Output directory: {}", output_dir.display().to_string().blue());
    info!(
        "Files to delete: {} ({:.2} MB)",
        report.files,
        report.megabytes()
    );

    if dry_run {
        warn!(
            "[DRY RUN] Would delete {}. Run with --confirm to actually delete.",
            output_dir.display()
        );
        return Ok(report);
    }

    fs::remove_dir_all(output_dir)
        .await
        .map_err(|e| anyhow!("Failed to delete output directory {}: {}", output_dir.display(), e))?;
    report.deleted = true;
    info!(
        "{}",
        format!(
            "Deleted {} ({} files, {:.2} MB)",
            output_dir.display(),
            report.files,
            report.megabytes()
        )
        .green()
    );
    Ok(report)
}
