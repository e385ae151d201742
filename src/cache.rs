//! Modification-time cache for converted chapters.
//!
//! A rendered PDF is reused when it exists and is not older than its
//! markdown source. Both sides are produced on the same machine, so the
//! filesystem clock is trusted.

use std::path::Path;
use std::time::SystemTime;

/// Timestamps of a source and its rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_modified: Option<SystemTime>,
    pub artifact_modified: Option<SystemTime>,
}

impl CacheEntry {
    pub fn from_disk(source: &Path, artifact: &Path) -> Self {
        Self {
            source_modified: modified(source),
            artifact_modified: modified(artifact),
        }
    }

    /// `force` always invalidates. Otherwise the entry is stale when the
    /// artifact is missing or strictly older than the source.
    pub fn is_stale(&self, force: bool) -> bool {
        if force {
            return true;
        }
        match (self.source_modified, self.artifact_modified) {
            (_, None) => true,
            (Some(source), Some(artifact)) => source > artifact,
            // Source unreadable: let the conversion report it.
            (None, Some(_)) => true,
        }
    }
}

pub fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

pub fn needs_conversion(markdown: &Path, pdf: &Path, force: bool) -> bool {
    CacheEntry::from_disk(markdown, pdf).is_stale(force)
}
