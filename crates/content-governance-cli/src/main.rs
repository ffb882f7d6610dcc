use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use content_governance_api::{
    GovernanceApi, GovernanceConfig, MaintenanceReport, Progress, QualityOptions, ValidationReport,
};
use content_governance_core::{GovernanceError, SchemaVersion};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "cg")]
#[command(about = "Content governance for YAML data collections")]
struct Cli {
    /// YAML config file; relative paths inside it resolve against its directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `content_governance_api=debug`. Falls back to RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Validate(CollectionArgs),
    Stats(CollectionArgs),
    Backup(BackupArgs),
    Snapshots {
        #[command(subcommand)]
        command: Box<SnapshotCommand>,
    },
    Migrate {
        #[command(subcommand)]
        command: Box<MigrateCommand>,
    },
    Quality(QualityArgs),
    Trends(TrendsArgs),
    Consistency,
    Maintenance,
    Schema {
        #[command(subcommand)]
        command: Box<SchemaCommand>,
    },
}

#[derive(Debug, Args)]
struct CollectionArgs {
    /// Limit to these collections; defaults to every registered one.
    #[arg(long = "collection")]
    collections: Vec<String>,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[command(flatten)]
    target: CollectionArgs,
    #[arg(long, default_value = "manual")]
    reason: String,
}

#[derive(Debug, Subcommand)]
enum SnapshotCommand {
    List(SnapshotListArgs),
    Verify(SnapshotIdArgs),
    Restore(SnapshotIdArgs),
    Cleanup(SnapshotCleanupArgs),
}

#[derive(Debug, Args)]
struct SnapshotListArgs {
    #[arg(long)]
    collection: Option<String>,
}

#[derive(Debug, Args)]
struct SnapshotIdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct SnapshotCleanupArgs {
    /// Snapshots to keep per collection; defaults to `backup_retention`.
    #[arg(long)]
    keep: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum MigrateCommand {
    Status(CollectionArgs),
    Run(MigrateRunArgs),
}

#[derive(Debug, Args)]
struct MigrateRunArgs {
    /// Migrate one collection; without it every outdated collection moves to its latest version.
    #[arg(long)]
    collection: Option<String>,
    #[arg(long, requires = "collection", value_parser = parse_version)]
    target: Option<SchemaVersion>,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct QualityArgs {
    #[command(flatten)]
    target: CollectionArgs,
    /// Do not append this report to the metrics history.
    #[arg(long, default_value_t = false)]
    no_record: bool,
    #[arg(long, default_value_t = false)]
    with_consistency: bool,
}

#[derive(Debug, Args)]
struct TrendsArgs {
    #[arg(long)]
    window_days: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum SchemaCommand {
    List,
    Show(SchemaShowArgs),
}

#[derive(Debug, Args)]
struct SchemaShowArgs {
    #[arg(long)]
    collection: String,
}

/// Clean runs exit 0, data problems exit 1, anything that stopped the command exits 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Clean,
    Problems,
}

impl Status {
    fn from_clean(clean: bool) -> Self {
        if clean {
            Self::Clean
        } else {
            Self::Problems
        }
    }
}

fn parse_version(text: &str) -> Result<SchemaVersion, String> {
    SchemaVersion::parse(text).map_err(|err| err.to_string())
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn report_progress(event: &Progress) {
    let marker = if event.ok { "ok" } else { "FAIL" };
    eprintln!("[{}] {marker} {}: {}", event.operation, event.subject, event.detail);
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    match run(cli) {
        Ok(Status::Clean) => ExitCode::SUCCESS,
        Ok(Status::Problems) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn load_config(cli: &Cli) -> Result<GovernanceConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => GovernanceConfig::load(path)?,
        None => GovernanceConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir.as_ref() {
        config.data_dir.clone_from(data_dir);
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<Status> {
    let api = GovernanceApi::new(load_config(&cli)?)?;
    tracing::debug!(data_dir = %api.config().data_dir.display(), "governance api ready");
    match cli.command {
        Command::Validate(args) => run_validate(&api, &args),
        Command::Stats(args) => run_stats(&api, &args),
        Command::Backup(args) => run_backup(&api, &args),
        Command::Snapshots { command } => run_snapshots(&api, *command),
        Command::Migrate { command } => run_migrate(&api, *command),
        Command::Quality(args) => run_quality(&api, &args),
        Command::Trends(args) => run_trends(&api, &args),
        Command::Consistency => run_consistency(&api),
        Command::Maintenance => run_maintenance(&api),
        Command::Schema { command } => run_schema(&api, *command),
    }
}

fn validation_json(report: &ValidationReport, sample_limit: usize) -> Value {
    let results = report
        .results
        .iter()
        .map(|result| {
            let sample = result.sample_errors(sample_limit);
            serde_json::json!({
                "collection": result.collection,
                "valid": result.valid,
                "total_items": result.total_items,
                "error_count": result.errors.len(),
                "errors": sample.shown,
                "errors_omitted": sample.omitted,
                "warnings": result.warnings
            })
        })
        .collect::<Vec<_>>();
    serde_json::json!({
        "valid": report.valid,
        "passed": report.passed,
        "failed": report.failed,
        "results": results
    })
}

fn run_validate(api: &GovernanceApi, args: &CollectionArgs) -> Result<Status> {
    let report = api.validate(&args.collections, &mut report_progress);
    emit_json(validation_json(&report, api.config().error_sample_limit))?;
    Ok(Status::from_clean(report.valid))
}

fn run_stats(api: &GovernanceApi, args: &CollectionArgs) -> Result<Status> {
    let summary = api.stats(&args.collections);
    emit_json(serde_json::to_value(&summary)?)?;
    Ok(Status::from_clean(summary.failed.is_empty()))
}

fn run_backup(api: &GovernanceApi, args: &BackupArgs) -> Result<Status> {
    let summary = api.backup(&args.target.collections, &args.reason, &mut report_progress);
    emit_json(serde_json::to_value(&summary)?)?;
    Ok(Status::from_clean(summary.failed.is_empty()))
}

fn run_snapshots(api: &GovernanceApi, command: SnapshotCommand) -> Result<Status> {
    match command {
        SnapshotCommand::List(args) => {
            let snapshots = api.list_snapshots(args.collection.as_deref())?;
            emit_json(serde_json::json!({
                "count": snapshots.len(),
                "snapshots": snapshots
            }))?;
            Ok(Status::Clean)
        }
        SnapshotCommand::Verify(args) => {
            let verification = api.verify_snapshot(&args.id)?;
            emit_json(serde_json::to_value(&verification)?)?;
            Ok(Status::from_clean(verification.ok))
        }
        SnapshotCommand::Restore(args) => {
            let outcome = api.restore(&args.id)?;
            emit_json(serde_json::to_value(&outcome)?)?;
            Ok(Status::Clean)
        }
        SnapshotCommand::Cleanup(args) => {
            let report = api.cleanup(args.keep);
            for error in &report.errors {
                eprintln!("[cleanup] FAIL {error}");
            }
            emit_json(serde_json::to_value(&report)?)?;
            Ok(Status::from_clean(report.errors.is_empty()))
        }
    }
}

fn run_migrate(api: &GovernanceApi, command: MigrateCommand) -> Result<Status> {
    match command {
        MigrateCommand::Status(args) => {
            let statuses = api.migration_status(&args.collections);
            let clean = statuses.iter().all(|status| status.error.is_none());
            emit_json(serde_json::json!({ "collections": statuses }))?;
            Ok(Status::from_clean(clean))
        }
        MigrateCommand::Run(args) => match args.collection.as_deref() {
            Some(collection) => run_migrate_one(api, collection, args.target, args.dry_run),
            None => {
                let summary = api.migrate_all(args.dry_run, &mut report_progress);
                emit_json(serde_json::json!({
                    "dry_run": args.dry_run,
                    "migrated": summary.outcomes,
                    "failed": summary.failures
                }))?;
                Ok(Status::from_clean(summary.failures.is_empty()))
            }
        },
    }
}

fn run_migrate_one(
    api: &GovernanceApi,
    collection: &str,
    target: Option<SchemaVersion>,
    dry_run: bool,
) -> Result<Status> {
    match api.migrate(collection, target, dry_run) {
        Ok(outcome) => {
            emit_json(serde_json::to_value(&outcome)?)?;
            Ok(Status::Clean)
        }
        Err(err @ GovernanceError::Io(_)) => Err(err.into()),
        Err(err) => {
            let snapshot_id = match &err {
                GovernanceError::MigrationAborted { snapshot_id, .. } => snapshot_id.clone(),
                _ => None,
            };
            if let Some(id) = snapshot_id.as_deref() {
                eprintln!(
                    "[migrate] FAIL {collection}: restore with \
                     `cg snapshots restore --id {id}` if needed"
                );
            }
            emit_json(serde_json::json!({
                "collection": collection,
                "dry_run": dry_run,
                "migrated": false,
                "error": err.to_string(),
                "snapshot_id": snapshot_id
            }))?;
            Ok(Status::Problems)
        }
    }
}

fn run_quality(api: &GovernanceApi, args: &QualityArgs) -> Result<Status> {
    let options = QualityOptions {
        record_history: !args.no_record,
        include_consistency: args.with_consistency,
    };
    let run = api.quality(&args.target.collections, options, &mut report_progress)?;
    for alert in &run.alerts {
        eprintln!("[alert] {:?}: {}", alert.level, alert.message);
    }
    emit_json(serde_json::to_value(&run)?)?;
    Ok(Status::from_clean(run.ok()))
}

fn run_trends(api: &GovernanceApi, args: &TrendsArgs) -> Result<Status> {
    let trends = api.trends(args.window_days)?;
    emit_json(serde_json::to_value(&trends)?)?;
    Ok(Status::Clean)
}

fn run_consistency(api: &GovernanceApi) -> Result<Status> {
    let report = api.consistency(&mut report_progress);
    emit_json(serde_json::to_value(&report)?)?;
    Ok(Status::from_clean(report.all_passed()))
}

fn maintenance_json(report: &MaintenanceReport, sample_limit: usize) -> Result<Value> {
    let quality = report.quality.as_ref().map(|run| {
        serde_json::json!({
            "summary": run.report.summary,
            "alerts": run.alerts,
            "history_len": run.history_len
        })
    });
    Ok(serde_json::json!({
        "ok": report.ok,
        "steps": report.steps,
        "validation": validation_json(&report.validation, sample_limit),
        "backup": serde_json::to_value(&report.backup)?,
        "migration_status": report.migration_status,
        "quality": quality,
        "consistency": serde_json::to_value(&report.consistency)?,
        "cleanup": serde_json::to_value(&report.cleanup)?
    }))
}

fn run_maintenance(api: &GovernanceApi) -> Result<Status> {
    let report = api.maintenance(&mut report_progress);
    for step in &report.steps {
        let marker = if step.ok { "ok" } else { "FAIL" };
        eprintln!("[maintenance] {marker} {}: {}", step.name, step.summary);
    }
    emit_json(maintenance_json(&report, api.config().error_sample_limit)?)?;
    Ok(Status::from_clean(report.ok))
}

fn run_schema(api: &GovernanceApi, command: SchemaCommand) -> Result<Status> {
    match command {
        SchemaCommand::List => {
            let collections = api
                .registry()
                .names()
                .into_iter()
                .map(|name| {
                    let revisions = api.registry().revisions(&name);
                    serde_json::json!({ "collection": name, "revisions": revisions })
                })
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({ "collections": collections }))?;
        }
        SchemaCommand::Show(args) => {
            let revisions = api.schema_revisions(&args.collection);
            if revisions.is_empty() {
                return Err(anyhow!("no schema registered for `{}`", args.collection));
            }
            let revisions = revisions
                .into_iter()
                .map(|(version, schema)| {
                    serde_json::json!({ "version": version, "schema": schema })
                })
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "collection": args.collection,
                "revisions": revisions
            }))?;
        }
    }
    Ok(Status::Clean)
}
