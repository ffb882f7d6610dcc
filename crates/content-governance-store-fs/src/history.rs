use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use content_governance_core::QualityReport;

use crate::write_atomic;

/// Newline-delimited JSON log of quality reports, oldest first, capped at
/// `limit` entries.
#[derive(Debug, Clone)]
pub struct MetricsLog {
    path: PathBuf,
    limit: usize,
}

impl MetricsLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a report, rewriting the log without its oldest entries when the
    /// cap would be exceeded. Returns the number of reports now retained.
    ///
    /// # Errors
    /// Returns an error when the report cannot be serialized or the log written.
    pub fn append(&self, report: &QualityReport) -> Result<usize> {
        let line = serde_json::to_string(report).context("failed to serialize quality report")?;
        let mut lines = self.read_lines()?;
        lines.push(line);

        if lines.len() > self.limit {
            let excess = lines.len() - self.limit;
            lines.drain(..excess);
            let mut contents = lines.join("\n");
            contents.push('\n');
            write_atomic(&self.path, contents.as_bytes())
                .with_context(|| format!("failed to rewrite metrics log {}", self.path.display()))?;
            tracing::debug!(dropped = excess, "metrics log trimmed");
        } else {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create metrics directory {}", parent.display())
                })?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("failed to open metrics log {}", self.path.display()))?;
            writeln!(file, "{}", lines[lines.len() - 1]).with_context(|| {
                format!("failed to append to metrics log {}", self.path.display())
            })?;
        }
        Ok(lines.len())
    }

    /// Every parseable report, oldest first. Unparseable lines are skipped
    /// with a warning so one bad entry cannot hide the rest of the history.
    ///
    /// # Errors
    /// Returns an error when the log exists but cannot be read.
    pub fn read_all(&self) -> Result<Vec<QualityReport>> {
        let mut reports = Vec::new();
        for (index, line) in self.read_lines()?.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::warn!(
                        line = index + 1,
                        error = %err,
                        "skipping unparseable metrics entry"
                    );
                }
            }
        }
        Ok(reports)
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read metrics log {}", self.path.display())),
        }
    }
}
