//! Command surface over the governance core and the filesystem store.
//!
//! Every batch operation isolates collections from each other: one collection
//! failing to load or snapshot is recorded in the result and the batch moves on.

use anyhow::{anyhow, Context, Result};
use content_governance_core::{
    compute_metrics, compute_trends, derive_alerts, run_checks, site_consistency_checks,
    site_migrations, validate_collection, Alert, AlertLevel, CollectionSchema, ConsistencyCheck,
    ConsistencyReport, GovernanceError, MetricsInput, MigrationCatalog, PlannedStep,
    QualityMetrics, QualityReport, SchemaRegistry, SchemaVersion, TrendReport, ValidationResult,
};
use content_governance_store_fs::{
    BackupStore, CleanupReport, CollectionStats, FsStore, MetricsLog, SnapshotInfo,
    SnapshotVerification, VersionStore,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

mod config;

pub use config::GovernanceConfig;

pub const API_CONTRACT_VERSION: &str = "api.v1";

const MAINTENANCE_REASON: &str = "maintenance";
const PRE_RESTORE_REASON: &str = "pre-restore";

/// Emitted as each collection (or check) finishes, before the batch completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub operation: String,
    pub subject: String,
    pub ok: bool,
    pub detail: String,
}

impl Progress {
    fn new(operation: &str, subject: &str, ok: bool, detail: String) -> Self {
        Self {
            operation: operation.to_string(),
            subject: subject.to_string(),
            ok,
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionFailure {
    pub collection: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub results: Vec<ValidationResult>,
    pub passed: usize,
    pub failed: usize,
    pub valid: bool,
}

impl ValidationReport {
    fn new(results: Vec<ValidationResult>) -> Self {
        let passed = results.iter().filter(|result| result.valid).count();
        let failed = results.len() - passed;
        Self {
            results,
            passed,
            failed,
            valid: failed == 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupSummary {
    pub reason: String,
    pub created: Vec<SnapshotInfo>,
    pub failed: Vec<CollectionFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsSummary {
    pub collections: Vec<CollectionStats>,
    pub failed: Vec<CollectionFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationStatus {
    pub collection: String,
    pub current_version: Option<SchemaVersion>,
    pub latest_version: SchemaVersion,
    pub pending_versions: Vec<SchemaVersion>,
    pub up_to_date: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub collection: String,
    pub dry_run: bool,
    pub migrated: bool,
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    pub steps: Vec<PlannedStep>,
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateAllSummary {
    pub outcomes: Vec<MigrationOutcome>,
    pub failures: Vec<CollectionFailure>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityOptions {
    /// Append the report to the metrics history log.
    pub record_history: bool,
    /// Run the consistency checks and fold their failures into the alerts.
    pub include_consistency: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityRun {
    pub report: QualityReport,
    pub consistency: Option<ConsistencyReport>,
    pub alerts: Vec<Alert>,
    /// Reports retained in the history log after this one was appended.
    pub history_len: Option<usize>,
}

impl QualityRun {
    /// No alert at error level or above.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.alerts.iter().all(|alert| alert.level < AlertLevel::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub snapshot: SnapshotInfo,
    /// Snapshot of the content the restore replaced.
    pub safety_snapshot: Option<SnapshotInfo>,
    /// Version marker reset to, when the snapshot was taken before a migration.
    pub version_marker: Option<SchemaVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaintenanceStep {
    pub name: String,
    pub ok: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceReport {
    pub steps: Vec<MaintenanceStep>,
    pub validation: ValidationReport,
    pub backup: BackupSummary,
    pub migration_status: Vec<MigrationStatus>,
    pub quality: Option<QualityRun>,
    pub consistency: ConsistencyReport,
    pub cleanup: CleanupReport,
    pub ok: bool,
}

pub struct GovernanceApi {
    config: GovernanceConfig,
    registry: SchemaRegistry,
    migrations: MigrationCatalog,
    checks: Vec<Box<dyn ConsistencyCheck>>,
    store: FsStore,
    backups: BackupStore,
    versions: VersionStore,
    history: MetricsLog,
}

impl GovernanceApi {
    /// Build the API over the built-in site catalog plus config overrides.
    ///
    /// # Errors
    /// Returns an error when the config is out of range or the migration
    /// catalog is inconsistent.
    pub fn new(config: GovernanceConfig) -> Result<Self> {
        config.check()?;
        let registry = config.registry();
        let migrations = site_migrations().context("failed to build migration catalog")?;
        Ok(Self::with_catalog(config, registry, migrations, site_consistency_checks()))
    }

    #[must_use]
    pub fn with_catalog(
        config: GovernanceConfig,
        registry: SchemaRegistry,
        migrations: MigrationCatalog,
        checks: Vec<Box<dyn ConsistencyCheck>>,
    ) -> Self {
        Self {
            store: FsStore::new(config.data_dir.clone()),
            backups: BackupStore::new(config.backup_dir()),
            versions: VersionStore::new(config.versions_dir()),
            history: MetricsLog::new(config.metrics_log(), config.history_limit),
            config,
            registry,
            migrations,
            checks,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Every schema revision of `name`, oldest first.
    #[must_use]
    pub fn schema_revisions(&self, name: &str) -> Vec<(SchemaVersion, &CollectionSchema)> {
        self.registry
            .revisions(name)
            .into_iter()
            .filter_map(|version| {
                self.registry.schema_at(name, version).map(|schema| (version, schema))
            })
            .collect()
    }

    /// Requested names, or every registered collection followed by any
    /// unregistered collection files found in the data directory.
    fn targets(&self, names: &[String]) -> Vec<String> {
        let requested = if names.is_empty() {
            let mut known = self.registry.names();
            match self.store.list_collections() {
                Ok(found) => known.extend(found),
                Err(err) => tracing::warn!(error = %err, "could not list the data directory"),
            }
            known
        } else {
            names.to_vec()
        };
        let mut targets: Vec<String> = Vec::with_capacity(requested.len());
        for name in requested {
            if !targets.contains(&name) {
                targets.push(name);
            }
        }
        targets
    }

    fn schema_for(&self, name: &str) -> Result<Option<&CollectionSchema>, GovernanceError> {
        let version = self.versions.current(name)?;
        Ok(self.registry.schema_at(name, version))
    }

    /// Validate collections against the schema of their current version.
    /// `names` empty means every known collection.
    pub fn validate(
        &self,
        names: &[String],
        progress: &mut dyn FnMut(&Progress),
    ) -> ValidationReport {
        let mut results = Vec::new();
        for name in self.targets(names) {
            let result = self.validate_one(&name);
            let detail = if result.valid {
                format!("{} item(s), {} warning(s)", result.total_items, result.warnings.len())
            } else {
                tracing::warn!(
                    collection = %name,
                    errors = result.errors.len(),
                    "validation failed"
                );
                format!("{} error(s)", result.errors.len())
            };
            progress(&Progress::new("validate", &name, result.valid, detail));
            results.push(result);
        }
        ValidationReport::new(results)
    }

    fn validate_one(&self, name: &str) -> ValidationResult {
        let loaded = match self.store.load(name) {
            Ok(loaded) => loaded,
            Err(err) => return ValidationResult::unavailable(name, err.to_string()),
        };
        match self.schema_for(name) {
            Ok(schema) => validate_collection(name, schema, &loaded.data),
            Err(err) => ValidationResult::unavailable(name, err.to_string()),
        }
    }

    /// Snapshot collections with a caller-supplied reason.
    pub fn backup(
        &self,
        names: &[String],
        reason: &str,
        progress: &mut dyn FnMut(&Progress),
    ) -> BackupSummary {
        let mut created = Vec::new();
        let mut failed = Vec::new();
        for name in self.targets(names) {
            match self.snapshot_collection(&name, reason) {
                Ok(snapshot) => {
                    progress(&Progress::new("backup", &name, true, snapshot.id.clone()));
                    created.push(snapshot);
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    tracing::warn!(collection = %name, %error, "backup failed");
                    progress(&Progress::new("backup", &name, false, error.clone()));
                    failed.push(CollectionFailure {
                        collection: name,
                        error,
                    });
                }
            }
        }
        BackupSummary {
            reason: reason.to_string(),
            created,
            failed,
        }
    }

    fn snapshot_collection(&self, name: &str, reason: &str) -> Result<SnapshotInfo> {
        let contents = self.store.read_raw(name)?;
        self.backups.snapshot(name, &contents, reason)
    }

    /// Record counts, sizes and field completeness, without running validation.
    #[must_use]
    pub fn stats(&self, names: &[String]) -> StatsSummary {
        let mut collections = Vec::new();
        let mut failed = Vec::new();
        for name in self.targets(names) {
            match self.store.stats(&name) {
                Ok(stats) => collections.push(stats),
                Err(err) => failed.push(CollectionFailure {
                    collection: name,
                    error: err.to_string(),
                }),
            }
        }
        StatsSummary {
            collections,
            failed,
        }
    }

    /// Current, latest and pending versions per collection.
    #[must_use]
    pub fn migration_status(&self, names: &[String]) -> Vec<MigrationStatus> {
        self.targets(names).iter().map(|name| self.status_of(name)).collect()
    }

    fn status_of(&self, name: &str) -> MigrationStatus {
        let plan = self.migrations.plan(name);
        let latest_version = self.migrations.latest(name);
        let mut status = MigrationStatus {
            collection: name.to_string(),
            current_version: None,
            latest_version,
            pending_versions: Vec::new(),
            up_to_date: false,
            error: None,
        };
        match self.versions.current(name) {
            Ok(current) => {
                status.current_version = Some(current);
                let registered = current == SchemaVersion::INITIAL
                    || plan.is_some_and(|plan| plan.versions().contains(&current));
                if registered {
                    status.pending_versions =
                        plan.map(|plan| plan.pending(current)).unwrap_or_default();
                    status.up_to_date = current == latest_version;
                } else {
                    status.error =
                        Some(format!("version marker {current} is not a registered version"));
                }
            }
            Err(err) => status.error = Some(err.to_string()),
        }
        status
    }

    /// Move one collection to `target` (default: latest registered version).
    ///
    /// The collection is snapshotted first, transformed in memory, and only
    /// saved once the result satisfies the target version's schema. The version
    /// marker advances only after the save.
    ///
    /// # Errors
    /// Returns [`GovernanceError::UnknownVersion`] for unregistered targets,
    /// [`GovernanceError::MigrationAborted`] when a step fails or its result is
    /// invalid (naming the pre-migration snapshot), and
    /// [`GovernanceError::Io`] when snapshotting or persisting fails.
    pub fn migrate(
        &self,
        name: &str,
        target: Option<SchemaVersion>,
        dry_run: bool,
    ) -> Result<MigrationOutcome, GovernanceError> {
        let current = self.versions.current(name)?;
        let target = target.unwrap_or_else(|| self.migrations.latest(name));
        let mut outcome = MigrationOutcome {
            collection: name.to_string(),
            dry_run,
            migrated: false,
            from_version: current,
            to_version: target,
            steps: Vec::new(),
            snapshot_id: None,
        };
        if current == target {
            return Ok(outcome);
        }

        let plan = self.migrations.plan(name).ok_or_else(|| GovernanceError::UnknownVersion {
            collection: name.to_string(),
            version: target.to_string(),
        })?;
        outcome.steps = plan.describe(current, target)?;
        if dry_run {
            return Ok(outcome);
        }

        let original = self.store.read_raw(name)?;
        let snapshot = self
            .backups
            .snapshot(name, &original, &format!("migration-{current}-to-{target}"))
            .map_err(|err| GovernanceError::Io(format!("{err:#}")))?;
        let aborted = |reason: String| GovernanceError::MigrationAborted {
            collection: name.to_string(),
            reason: format!(
                "{reason}; manual restoration may be needed from snapshot {}",
                snapshot.id
            ),
            snapshot_id: Some(snapshot.id.clone()),
        };

        let loaded = self.store.load(name)?;
        let (migrated, applied) =
            plan.apply(current, target, loaded.data).map_err(|err| aborted(err.to_string()))?;
        for step in &applied {
            tracing::info!(
                collection = name,
                version = %step.version,
                direction = ?step.direction,
                "migration step applied"
            );
        }

        let result = validate_collection(name, self.registry.schema_at(name, target), &migrated);
        if !result.valid {
            let sample = result.sample_errors(self.config.error_sample_limit);
            return Err(aborted(format!(
                "result does not satisfy the {target} schema: {}",
                sample.shown.join("; ")
            )));
        }

        self.store.save(name, &migrated, &loaded.header)?;
        if let Err(err) = self.versions.set(name, target) {
            tracing::warn!(
                collection = name,
                error = %err,
                "version marker not written; restoring collection"
            );
            if let Err(restore_err) = self.store.write_raw(name, &original) {
                tracing::warn!(
                    collection = name,
                    error = %restore_err,
                    snapshot = %snapshot.id,
                    "collection left migrated without a matching version marker"
                );
            }
            return Err(err);
        }

        tracing::info!(collection = name, from = %current, to = %target, "migration committed");
        outcome.migrated = true;
        outcome.steps = applied;
        outcome.snapshot_id = Some(snapshot.id);
        Ok(outcome)
    }

    /// Migrate every outdated collection to its latest version.
    pub fn migrate_all(
        &self,
        dry_run: bool,
        progress: &mut dyn FnMut(&Progress),
    ) -> MigrateAllSummary {
        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for status in self.migration_status(&[]) {
            if status.up_to_date {
                continue;
            }
            let result = match status.error {
                Some(error) => Err(error),
                None => {
                    self.migrate(&status.collection, None, dry_run).map_err(|err| err.to_string())
                }
            };
            match result {
                Ok(outcome) => {
                    let detail = format!("{} -> {}", outcome.from_version, outcome.to_version);
                    progress(&Progress::new("migrate", &status.collection, true, detail));
                    outcomes.push(outcome);
                }
                Err(error) => {
                    tracing::warn!(collection = %status.collection, %error, "migration failed");
                    progress(&Progress::new("migrate", &status.collection, false, error.clone()));
                    failures.push(CollectionFailure {
                        collection: status.collection,
                        error,
                    });
                }
            }
        }
        MigrateAllSummary { outcomes, failures }
    }

    /// Compute quality metrics and the alerts they imply.
    ///
    /// # Errors
    /// Returns an error when the report cannot be appended to the history log.
    pub fn quality(
        &self,
        names: &[String],
        options: QualityOptions,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<QualityRun> {
        let mut collections = Vec::new();
        for name in self.targets(names) {
            let metrics = self.metrics_for(&name);
            let ok = metrics.load_error.is_none() && metrics.validation.valid;
            let detail = match &metrics.load_error {
                Some(error) => error.clone(),
                None => format!("completeness {:.2}%", metrics.completeness),
            };
            progress(&Progress::new("quality", &name, ok, detail));
            collections.push(metrics);
        }

        let report = QualityReport::new(OffsetDateTime::now_utc(), collections);
        let history_len = if options.record_history {
            Some(self.history.append(&report)?)
        } else {
            None
        };
        let consistency = options.include_consistency.then(|| self.consistency(&mut |_| {}));
        let alerts = derive_alerts(&report, consistency.as_ref(), &self.config.alerts);
        Ok(QualityRun {
            report,
            consistency,
            alerts,
            history_len,
        })
    }

    fn metrics_for(&self, name: &str) -> QualityMetrics {
        let loaded = match self.store.load(name) {
            Ok(loaded) => loaded,
            Err(err) => return QualityMetrics::unavailable(name, &err),
        };
        let schema = match self.schema_for(name) {
            Ok(schema) => schema,
            Err(err) => return QualityMetrics::unavailable(name, &err),
        };
        let validation = validate_collection(name, schema, &loaded.data);
        compute_metrics(&MetricsInput {
            name,
            data: &loaded.data,
            byte_size: loaded.byte_size,
            schema,
            validation: &validation,
            source: &self.store,
            broken_sample_limit: self.config.broken_reference_sample_limit,
        })
    }

    /// Completeness and error trends over the recorded history.
    ///
    /// # Errors
    /// Returns an error when the history log cannot be read.
    pub fn trends(&self, window_days: Option<u32>) -> Result<TrendReport> {
        let history = self.history.read_all()?;
        Ok(compute_trends(
            &history,
            OffsetDateTime::now_utc(),
            window_days.unwrap_or(self.config.trend_window_days),
        ))
    }

    /// Run the cross-collection business rules.
    pub fn consistency(&self, progress: &mut dyn FnMut(&Progress)) -> ConsistencyReport {
        let report = run_checks(&self.checks, &self.store);
        for check in &report.checks {
            if !check.passed {
                tracing::warn!(
                    check = %check.name,
                    details = %check.details,
                    "consistency check failed"
                );
            }
            let detail = check.details.clone();
            progress(&Progress::new("consistency", &check.name, check.passed, detail));
        }
        report
    }

    /// Apply snapshot retention; `keep` defaults to the configured retention.
    #[must_use]
    pub fn cleanup(&self, keep: Option<usize>) -> CleanupReport {
        self.backups.cleanup(keep.unwrap_or(self.config.backup_retention))
    }

    /// # Errors
    /// Returns an error when the backup directory cannot be listed.
    pub fn list_snapshots(&self, collection: Option<&str>) -> Result<Vec<SnapshotInfo>> {
        self.backups.list(collection)
    }

    /// # Errors
    /// Returns an error when the snapshot cannot be read.
    pub fn verify_snapshot(&self, id: &str) -> Result<SnapshotVerification> {
        self.backups.verify(id)
    }

    /// Write a snapshot back over its collection, snapshotting the current
    /// content first. Snapshots taken before a migration also reset the
    /// version marker to the version they were taken at.
    ///
    /// # Errors
    /// Returns an error when the snapshot is unknown or fails verification, or
    /// when the safety snapshot or the write fails.
    pub fn restore(&self, id: &str) -> Result<RestoreOutcome> {
        let snapshot = self.backups.info(id)?;
        let verification = self.backups.verify(id)?;
        if verification.expected.is_some() && !verification.ok {
            return Err(anyhow!(
                "snapshot {id} does not match its recorded digest; refusing to restore"
            ));
        }
        let contents = self.backups.read(id)?;

        let safety_snapshot = if self.store.exists(&snapshot.collection) {
            Some(
                self.snapshot_collection(&snapshot.collection, PRE_RESTORE_REASON)
                    .context("failed to snapshot content before restore")?,
            )
        } else {
            None
        };
        self.store.write_raw(&snapshot.collection, &contents)?;

        let version_marker = migration_origin(&snapshot.reason);
        if let Some(version) = version_marker {
            self.versions.set(&snapshot.collection, version)?;
        }
        tracing::info!(
            collection = %snapshot.collection,
            snapshot = %snapshot.id,
            "snapshot restored"
        );
        Ok(RestoreOutcome {
            snapshot,
            safety_snapshot,
            version_marker,
        })
    }

    /// validate, backup, migration status, quality, consistency, cleanup; each
    /// step runs even when an earlier one reports problems.
    pub fn maintenance(&self, progress: &mut dyn FnMut(&Progress)) -> MaintenanceReport {
        let mut steps = Vec::new();
        let mut step = |name: &str, ok: bool, summary: String| {
            steps.push(MaintenanceStep {
                name: name.to_string(),
                ok,
                summary,
            });
        };

        let validation = self.validate(&[], &mut *progress);
        step(
            "validate",
            validation.valid,
            format!("{}/{} collections valid", validation.passed, validation.results.len()),
        );

        let backup = self.backup(&[], MAINTENANCE_REASON, &mut *progress);
        step(
            "backup",
            backup.failed.is_empty(),
            format!("{} snapshot(s) created, {} failed", backup.created.len(), backup.failed.len()),
        );

        let migration_status = self.migration_status(&[]);
        let behind = migration_status.iter().filter(|status| !status.up_to_date).count();
        step(
            "migration-status",
            migration_status.iter().all(|status| status.error.is_none()),
            format!("{behind} collection(s) behind their latest version"),
        );

        let options = QualityOptions {
            record_history: true,
            include_consistency: false,
        };
        let quality = match self.quality(&[], options, &mut *progress) {
            Ok(run) => {
                step(
                    "quality",
                    run.ok(),
                    format!(
                        "average completeness {:.2}%, {} alert(s)",
                        run.report.summary.average_completeness,
                        run.alerts.len()
                    ),
                );
                Some(run)
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "quality step failed");
                step("quality", false, format!("{err:#}"));
                None
            }
        };

        let consistency = self.consistency(&mut *progress);
        step(
            "consistency",
            consistency.all_passed(),
            format!("{}/{} checks passed", consistency.passed, consistency.checks.len()),
        );

        let cleanup = self.cleanup(None);
        step(
            "cleanup",
            cleanup.errors.is_empty(),
            format!("{} snapshot(s) removed", cleanup.removed),
        );

        let ok = steps.iter().all(|step| step.ok);
        MaintenanceReport {
            steps,
            validation,
            backup,
            migration_status,
            quality,
            consistency,
            cleanup,
            ok,
        }
    }
}

/// `migration-<from>-to-<to>` snapshot reasons name the version they preserve.
fn migration_origin(reason: &str) -> Option<SchemaVersion> {
    let (from, _) = reason.strip_prefix("migration-")?.split_once("-to-")?;
    SchemaVersion::parse(from).ok()
}
