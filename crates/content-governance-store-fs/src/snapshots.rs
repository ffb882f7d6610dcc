use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::check_collection_name;

const SNAPSHOT_EXTENSION: &str = "yaml";
const DIGEST_EXTENSION: &str = "sha256";
const ID_SEPARATOR: &str = "--";
const MAX_REASON_LEN: usize = 64;
const CREATE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub id: String,
    pub collection: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub reason: String,
    pub byte_size: u64,
    /// Digest recorded when the snapshot was taken; absent if the sidecar is missing.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotVerification {
    pub id: String,
    pub expected: Option<String>,
    pub actual: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub retained: usize,
    pub errors: Vec<String>,
}

/// Immutable, timestamped copies of collection files.
///
/// Each snapshot is `<collection>--<utc timestamp>--<reason>.yaml` with a
/// `.sha256` sidecar holding the content digest.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `contents` as a new snapshot of `collection`. Never overwrites:
    /// timestamps are kept strictly increasing per collection.
    ///
    /// # Errors
    /// Returns an error when the backup directory or snapshot file cannot be written.
    pub fn snapshot(
        &self,
        collection: &str,
        contents: &[u8],
        reason: &str,
    ) -> Result<SnapshotInfo> {
        check_collection_name(collection)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create backup directory {}", self.dir.display()))?;

        let reason = sanitize_reason(reason);
        let mut created_at = OffsetDateTime::now_utc();
        if let Some(newest) = self.list(Some(collection))?.first() {
            if created_at <= newest.created_at {
                created_at = newest.created_at + Duration::nanoseconds(1);
            }
        }

        let mut attempts = 0;
        let (id, path) = loop {
            let id = snapshot_id(collection, created_at, &reason)?;
            let path = self.file_path(&id, SNAPSHOT_EXTENSION);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    fill_or_remove(&path, || {
                        file.write_all(contents)?;
                        file.sync_all()
                    })
                    .with_context(|| format!("failed to write snapshot {}", path.display()))?;
                    break (id, path);
                }
                Err(err)
                    if err.kind() == ErrorKind::AlreadyExists && attempts < CREATE_ATTEMPTS =>
                {
                    attempts += 1;
                    created_at += Duration::nanoseconds(1);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create snapshot {}", path.display()));
                }
            }
        };

        let digest = hex::encode(Sha256::digest(contents));
        let digest_path = self.file_path(&id, DIGEST_EXTENSION);
        if let Err(err) = fs::write(&digest_path, format!("{digest}\n")) {
            remove_partial(&path);
            return Err(err).with_context(|| {
                format!("failed to write snapshot digest {}", digest_path.display())
            });
        }

        tracing::info!(collection, snapshot = %id, %reason, "snapshot created");
        Ok(SnapshotInfo {
            id,
            collection: collection.to_string(),
            created_at,
            reason,
            byte_size: contents.len() as u64,
            sha256: Some(digest),
        })
    }

    /// Snapshots newest-first, optionally for one collection only.
    ///
    /// # Errors
    /// Returns an error when the backup directory exists but cannot be listed.
    pub fn list(&self, collection: Option<&str>) -> Result<Vec<SnapshotInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list backups in {}", self.dir.display()))
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to list backups in {}", self.dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Some(parsed) = parse_id(id) else {
                continue;
            };
            if collection.is_some_and(|wanted| wanted != parsed.collection) {
                continue;
            }
            let byte_size = entry.metadata().map(|metadata| metadata.len()).unwrap_or_default();
            snapshots.push(SnapshotInfo {
                id: id.to_string(),
                collection: parsed.collection,
                created_at: parsed.created_at,
                reason: parsed.reason,
                byte_size,
                sha256: self.recorded_digest(id),
            });
        }
        snapshots.sort_by(|lhs, rhs| {
            rhs.created_at.cmp(&lhs.created_at).then_with(|| rhs.id.cmp(&lhs.id))
        });
        Ok(snapshots)
    }

    /// # Errors
    /// Returns an error for malformed ids or unknown snapshots.
    pub fn info(&self, id: &str) -> Result<SnapshotInfo> {
        let parsed = parse_id(id).ok_or_else(|| anyhow!("invalid snapshot id: {id}"))?;
        let path = self.file_path(id, SNAPSHOT_EXTENSION);
        let metadata = fs::metadata(&path)
            .with_context(|| format!("snapshot does not exist: {}", path.display()))?;
        Ok(SnapshotInfo {
            id: id.to_string(),
            collection: parsed.collection,
            created_at: parsed.created_at,
            reason: parsed.reason,
            byte_size: metadata.len(),
            sha256: self.recorded_digest(id),
        })
    }

    /// # Errors
    /// Returns an error for malformed ids or unreadable snapshots.
    pub fn read(&self, id: &str) -> Result<Vec<u8>> {
        parse_id(id).ok_or_else(|| anyhow!("invalid snapshot id: {id}"))?;
        let path = self.file_path(id, SNAPSHOT_EXTENSION);
        fs::read(&path).with_context(|| format!("failed to read snapshot {}", path.display()))
    }

    /// Recompute a snapshot's digest and compare it with the recorded one.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be read.
    pub fn verify(&self, id: &str) -> Result<SnapshotVerification> {
        let contents = self.read(id)?;
        let actual = hex::encode(Sha256::digest(&contents));
        let expected = self.recorded_digest(id);
        Ok(SnapshotVerification {
            id: id.to_string(),
            ok: expected.as_deref() == Some(actual.as_str()),
            expected,
            actual,
        })
    }

    /// Delete all but the `keep` newest snapshots of every collection.
    ///
    /// Failures are collected in the report rather than returned, so cleanup can
    /// never fail the operation that triggered it.
    #[must_use]
    pub fn cleanup(&self, keep: usize) -> CleanupReport {
        let mut report = CleanupReport::default();
        let snapshots = match self.list(None) {
            Ok(snapshots) => snapshots,
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    "snapshot cleanup could not list backups"
                );
                report.errors.push(format!("{err:#}"));
                return report;
            }
        };

        let mut by_collection: BTreeMap<String, Vec<SnapshotInfo>> = BTreeMap::new();
        for snapshot in snapshots {
            by_collection.entry(snapshot.collection.clone()).or_default().push(snapshot);
        }

        for (collection, snapshots) in by_collection {
            report.retained += snapshots.len().min(keep);
            for snapshot in snapshots.into_iter().skip(keep) {
                let path = self.file_path(&snapshot.id, SNAPSHOT_EXTENSION);
                if let Err(err) = fs::remove_file(&path) {
                    tracing::warn!(
                        %collection,
                        snapshot = %snapshot.id,
                        error = %err,
                        "failed to remove snapshot"
                    );
                    report.errors.push(format!("failed to remove {}: {err}", path.display()));
                    report.retained += 1;
                    continue;
                }
                let digest_path = self.file_path(&snapshot.id, DIGEST_EXTENSION);
                if let Err(err) = fs::remove_file(&digest_path) {
                    if err.kind() != ErrorKind::NotFound {
                        report
                            .errors
                            .push(format!("failed to remove {}: {err}", digest_path.display()));
                    }
                }
                report.removed += 1;
            }
        }
        tracing::info!(
            removed = report.removed,
            retained = report.retained,
            "snapshot cleanup finished"
        );
        report
    }

    fn file_path(&self, id: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{id}.{extension}"))
    }

    fn recorded_digest(&self, id: &str) -> Option<String> {
        fs::read_to_string(self.file_path(id, DIGEST_EXTENSION))
            .ok()
            .map(|digest| digest.trim().to_string())
            .filter(|digest| !digest.is_empty())
    }
}

struct ParsedId {
    collection: String,
    created_at: OffsetDateTime,
    reason: String,
}

/// Run `write` against a freshly created file, deleting the file if it fails so
/// no truncated snapshot is ever listed.
fn fill_or_remove(path: &Path, write: impl FnOnce() -> io::Result<()>) -> io::Result<()> {
    write().inspect_err(|_| remove_partial(path))
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove partial snapshot");
    }
}

fn snapshot_id(collection: &str, created_at: OffsetDateTime, reason: &str) -> Result<String> {
    let stamp = created_at
        .format(format_description!(
            "[year][month][day]T[hour][minute][second].[subsecond digits:9]Z"
        ))
        .context("failed to format snapshot timestamp")?;
    Ok(format!("{collection}{ID_SEPARATOR}{stamp}{ID_SEPARATOR}{reason}"))
}

fn parse_id(id: &str) -> Option<ParsedId> {
    let mut parts = id.splitn(3, ID_SEPARATOR);
    let collection = parts.next()?;
    let stamp = parts.next()?;
    let reason = parts.next()?;
    check_collection_name(collection).ok()?;
    if reason.is_empty() || !reason.chars().all(is_reason_char) {
        return None;
    }
    let created_at = PrimitiveDateTime::parse(
        stamp,
        format_description!("[year][month][day]T[hour][minute][second].[subsecond digits:9]Z"),
    )
    .ok()?
    .assume_utc();
    Some(ParsedId {
        collection: collection.to_string(),
        created_at,
        reason: reason.to_string(),
    })
}

fn is_reason_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-'
}

/// Reduce a free-text reason to a file-name-safe tag.
fn sanitize_reason(reason: &str) -> String {
    let mut tag = String::new();
    for c in reason.trim().chars().map(|c| c.to_ascii_lowercase()) {
        if is_reason_char(c) && c != '-' {
            tag.push(c);
        } else if !tag.is_empty() && !tag.ends_with('-') {
            tag.push('-');
        }
        if tag.len() >= MAX_REASON_LEN {
            break;
        }
    }
    let tag = tag.trim_end_matches('-');
    if tag.is_empty() {
        "manual".to_string()
    } else {
        tag.to_string()
    }
}
