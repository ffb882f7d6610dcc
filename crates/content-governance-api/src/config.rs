use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use content_governance_core::{site_registry, AlertThresholds, CollectionSchema, SchemaRegistry};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_BACKUP_RETENTION: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_ERROR_SAMPLE_LIMIT: usize = 5;
pub const DEFAULT_BROKEN_REFERENCE_SAMPLE_LIMIT: usize = 10;
pub const DEFAULT_TREND_WINDOW_DAYS: u32 = 30;

/// Runtime settings. Unset directories derive from `data_dir`, so moving the
/// data directory moves everything that lives beside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GovernanceConfig {
    pub data_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub versions_dir: Option<PathBuf>,
    pub metrics_log: Option<PathBuf>,
    pub backup_retention: usize,
    pub history_limit: usize,
    pub error_sample_limit: usize,
    pub broken_reference_sample_limit: usize,
    pub trend_window_days: u32,
    pub alerts: AlertThresholds,
    /// Replace or add registry entries; an entry here supersedes every built-in
    /// revision of the same collection.
    pub schemas: Vec<CollectionSchema>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            backup_dir: None,
            versions_dir: None,
            metrics_log: None,
            backup_retention: DEFAULT_BACKUP_RETENTION,
            history_limit: DEFAULT_HISTORY_LIMIT,
            error_sample_limit: DEFAULT_ERROR_SAMPLE_LIMIT,
            broken_reference_sample_limit: DEFAULT_BROKEN_REFERENCE_SAMPLE_LIMIT,
            trend_window_days: DEFAULT_TREND_WINDOW_DAYS,
            alerts: AlertThresholds::default(),
            schemas: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    /// Read a YAML config file. Relative paths inside it resolve against the
    /// file's own directory.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed, or holds
    /// out-of-range settings.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if let Some(base) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            config.resolve_relative_to(base);
        }
        config.check()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(|| self.data_dir.join(".backups"))
    }

    #[must_use]
    pub fn versions_dir(&self) -> PathBuf {
        self.versions_dir.clone().unwrap_or_else(|| self.data_dir.join(".versions"))
    }

    #[must_use]
    pub fn metrics_log(&self) -> PathBuf {
        self.metrics_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".metrics").join("quality-history.ndjson"))
    }

    /// The built-in registry with this config's overrides applied.
    #[must_use]
    pub fn registry(&self) -> SchemaRegistry {
        let mut registry = site_registry();
        for schema in &self.schemas {
            registry.replace(schema.clone());
        }
        registry
    }

    /// # Errors
    /// Returns an error for settings no operation can honor.
    pub fn check(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit must be at least 1"));
        }
        if self.error_sample_limit == 0 {
            return Err(anyhow!("error_sample_limit must be at least 1"));
        }
        let thresholds = [self.alerts.critical_completeness, self.alerts.warning_completeness];
        if thresholds.iter().any(|value| !(0.0..=100.0).contains(value)) {
            return Err(anyhow!("alert thresholds must be percentages between 0 and 100"));
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.data_dir);
        for path in [&mut self.backup_dir, &mut self.versions_dir, &mut self.metrics_log]
            .into_iter()
            .flatten()
        {
            resolve(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn defaults_derive_from_data_dir() {
        let config = GovernanceConfig::default().with_data_dir("/srv/site");
        assert_eq!(config.backup_dir(), PathBuf::from("/srv/site/.backups"));
        assert_eq!(config.versions_dir(), PathBuf::from("/srv/site/.versions"));
        assert_eq!(
            config.metrics_log(),
            PathBuf::from("/srv/site/.metrics/quality-history.ndjson")
        );
        assert_eq!(config.backup_retention, 10);
    }

    #[test]
    fn load_resolves_paths_against_the_config_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("governance.yaml");
        fs::write(
            &path,
            concat!(
                "data_dir: content\n",
                "backup_dir: /var/backups/site\n",
                "backup_retention: 3\n",
                "alerts:\n",
                "  critical_completeness: 90\n",
            ),
        )?;
        let config = GovernanceConfig::load(&path)?;
        assert_eq!(config.data_dir, dir.path().join("content"));
        assert_eq!(config.backup_dir(), PathBuf::from("/var/backups/site"));
        assert_eq!(config.versions_dir(), dir.path().join("content/.versions"));
        assert_eq!(config.backup_retention, 3);
        assert!((config.alerts.critical_completeness - 90.0).abs() < f64::EPSILON);
        assert!((config.alerts.warning_completeness - 70.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn schema_overrides_replace_registry_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("governance.yaml");
        fs::write(
            &path,
            concat!(
                "schemas:\n",
                "  - name: quotes\n",
                "    shape: sequence\n",
                "    required_fields: [text]\n",
                "    field_validators:\n",
                "      source:\n",
                "        - rule: url_or_path\n",
            ),
        )?;
        let registry = GovernanceConfig::load(&path)?.registry();
        assert!(registry.contains("quotes"));
        assert!(registry.contains("books"));
        Ok(())
    }

    #[test]
    fn unknown_keys_and_bad_limits_are_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("governance.yaml");
        fs::write(&path, "data_dri: typo\n")?;
        assert!(GovernanceConfig::load(&path).is_err());
        fs::write(&path, "history_limit: 0\n")?;
        assert!(GovernanceConfig::load(&path).is_err());
        Ok(())
    }
}
