//! Filesystem persistence for collections, version markers, snapshots and the
//! quality history log.

use std::io::Write;
use std::path::Path;

use content_governance_core::GovernanceError;
use tempfile::NamedTempFile;

mod collections;
mod history;
mod snapshots;
mod versions;

pub use collections::{CollectionStats, FsStore, LoadedCollection, COLLECTION_EXTENSION};
pub use history::MetricsLog;
pub use snapshots::{BackupStore, CleanupReport, SnapshotInfo, SnapshotVerification};
pub use versions::VersionStore;

/// Collection names double as file names, so they are restricted to
/// lowercase ASCII, digits, `_` and single `-`.
///
/// # Errors
/// Returns [`GovernanceError::Validation`] for names that could escape the data
/// directory or collide with snapshot file naming.
pub fn check_collection_name(name: &str) -> Result<(), GovernanceError> {
    let well_formed = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        && !name.starts_with('-')
        && !name.contains("--");
    if well_formed {
        Ok(())
    } else {
        Err(GovernanceError::Validation(format!("invalid collection name `{name}`")))
    }
}

/// Replace `path` with `contents` via a temporary file in the same directory.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

