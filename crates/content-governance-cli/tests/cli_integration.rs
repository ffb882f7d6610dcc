use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

const BOOKS: &str = concat!(
    "# Books I have read.\n",
    "\n",
    "- slug: dune\n",
    "  title: Dune\n",
    "  author: Frank Herbert\n",
    "  category: fiction\n",
    "- slug: cosmos\n",
    "  title: Cosmos\n",
    "  author: Carl Sagan\n",
    "  category: science\n",
    "  recommended_by: [ada]\n",
);
const PEOPLE: &str = "- slug: ada\n  name: Ada Lovelace\n";
const SKILLS: &str = "- slug: rust\n  name: Rust\n  level: advanced\n";
const PROJECTS: &str = "- slug: site\n  title: Site\n  description: This site\n  skills: [rust]\n";
const PROFILE: &str = "name: Ada\nemail: ada@example.com\n";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}-{}", std::process::id()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn write_file(path: &Path, contents: &str) {
    fs::write(path, contents)
        .unwrap_or_else(|err| panic!("failed to write {}: {err}", path.display()));
}

fn read_file(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()))
}

fn site_fixture(prefix: &str) -> PathBuf {
    let data_dir = unique_temp_dir(prefix);
    for (name, contents) in [
        ("books", BOOKS),
        ("people", PEOPLE),
        ("skills", SKILLS),
        ("projects", PROJECTS),
        ("profile", PROFILE),
    ] {
        write_file(&data_dir.join(format!("{name}.yaml")), contents);
    }
    data_dir
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn run_cg<I, S>(data_dir: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_cg"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute cg binary: {err}"))
}

fn parse_stdout(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not valid JSON: {err}\nstdout:\n{stdout}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn run_json<I, S>(data_dir: &Path, args: I, expected_code: i32) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_cg(data_dir, args);
    assert_eq!(
        output.status.code(),
        Some(expected_code),
        "unexpected exit status\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    parse_stdout(&output)
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_bool(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or_else(|| panic!("missing boolean field `{key}` in payload: {value}"))
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

#[test]
fn validate_reports_clean_site_with_contract_version() {
    let data_dir = site_fixture("cg-validate-clean");
    let output = run_cg(&data_dir, ["validate"]);
    assert_eq!(output.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[validate] ok books"), "stderr:\n{stderr}");

    let payload = parse_stdout(&output);
    assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    assert!(as_bool(&payload, "valid"));
    assert_eq!(as_array(&payload, "results").len(), 5);
}

#[test]
fn validate_caps_error_samples_and_exits_one() {
    let data_dir = site_fixture("cg-validate-errors");
    let mut books = String::new();
    for index in 0..8 {
        books.push_str(&format!("- slug: book-{index}\n  title: Untitled\n"));
    }
    write_file(&data_dir.join("books.yaml"), &books);

    let payload = run_json(&data_dir, ["validate", "--collection", "books"], 1);
    let result = &as_array(&payload, "results")[0];
    assert_eq!(result.get("error_count").and_then(Value::as_u64), Some(16));
    assert_eq!(as_array(result, "errors").len(), 5);
    assert_eq!(result.get("errors_omitted").and_then(Value::as_u64), Some(11));
}

#[test]
fn migrate_run_snapshots_and_restore_round_trip() {
    let data_dir = site_fixture("cg-migrate");

    let status = run_json(&data_dir, ["migrate", "status", "--collection", "books"], 0);
    let books = &as_array(&status, "collections")[0];
    assert_eq!(as_array(books, "pending_versions").len(), 2);

    let plan = run_json(&data_dir, ["migrate", "run", "--collection", "books", "--dry-run"], 0);
    assert!(as_bool(&plan, "dry_run"));
    assert!(!as_bool(&plan, "migrated"));
    assert_eq!(read_file(&data_dir.join("books.yaml")), BOOKS);

    let applied = run_json(&data_dir, ["migrate", "run", "--collection", "books"], 0);
    assert!(as_bool(&applied, "migrated"));
    assert_eq!(as_str(&applied, "to_version"), "1.1.0");
    let snapshot_id = as_str(&applied, "snapshot_id").to_string();
    assert!(read_file(&data_dir.join("books.yaml")).starts_with("# Books I have read.\n"));

    let listed = run_json(&data_dir, ["snapshots", "list", "--collection", "books"], 0);
    assert_eq!(as_array(&listed, "snapshots").len(), 1);

    let verified = run_json(&data_dir, ["snapshots", "verify", "--id", snapshot_id.as_str()], 0);
    assert!(as_bool(&verified, "ok"));

    let restored = run_json(&data_dir, ["snapshots", "restore", "--id", snapshot_id.as_str()], 0);
    assert_eq!(as_str(&restored, "version_marker"), "0.0.0");
    assert_eq!(read_file(&data_dir.join("books.yaml")), BOOKS);
}

#[test]
fn migrate_all_brings_every_collection_up_to_date() {
    let data_dir = site_fixture("cg-migrate-all");
    let summary = run_json(&data_dir, ["migrate", "run"], 0);
    let migrated = as_array(&summary, "migrated")
        .iter()
        .map(|outcome| as_str(outcome, "collection").to_string())
        .collect::<Vec<_>>();
    assert_eq!(migrated, vec!["books", "projects"]);

    let status = run_json(&data_dir, ["migrate", "status"], 0);
    assert!(as_array(&status, "collections").iter().all(|entry| as_bool(entry, "up_to_date")));
    assert!(read_file(&data_dir.join("projects.yaml")).contains("featured: false"));
}

#[test]
fn target_requires_a_collection() {
    let data_dir = site_fixture("cg-target");
    let output = run_cg(&data_dir, ["migrate", "run", "--target", "1.0.0"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn consistency_failures_exit_one() {
    let data_dir = site_fixture("cg-consistency");
    write_file(
        &data_dir.join("projects.yaml"),
        "- slug: site\n  title: Site\n  description: This site\n  status: paused\n",
    );
    let payload = run_json(&data_dir, ["consistency"], 1);
    let failed = as_array(&payload, "checks")
        .iter()
        .filter(|check| !as_bool(check, "passed"))
        .map(|check| as_str(check, "name").to_string())
        .collect::<Vec<_>>();
    assert_eq!(failed, vec!["project-statuses"]);
}

#[test]
fn quality_history_feeds_trends() {
    let data_dir = site_fixture("cg-quality");
    let first = run_cg(&data_dir, ["quality"]);
    assert!(matches!(first.status.code(), Some(0 | 1)));
    let report = parse_stdout(&first);
    assert_eq!(report.get("history_len").and_then(Value::as_u64), Some(1));

    let trends = run_json(&data_dir, ["trends"], 0);
    assert_eq!(as_str(&trends, "status"), "insufficient_data");

    let _ = run_cg(&data_dir, ["quality"]);
    let trends = run_json(&data_dir, ["trends"], 0);
    assert_eq!(as_str(&trends, "status"), "available");

    let skipped = run_cg(&data_dir, ["quality", "--no-record"]);
    assert_eq!(parse_stdout(&skipped).get("history_len"), Some(&Value::Null));
}

#[test]
fn maintenance_reports_every_step() {
    let data_dir = site_fixture("cg-maintenance");
    let output = run_cg(&data_dir, ["maintenance"]);
    let payload = parse_stdout(&output);
    let steps = as_array(&payload, "steps")
        .iter()
        .map(|step| as_str(step, "name").to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        steps,
        vec!["validate", "backup", "migration-status", "quality", "consistency", "cleanup"]
    );
    let code = if as_bool(&payload, "ok") { 0 } else { 1 };
    assert_eq!(output.status.code(), Some(code));

    let listed = run_json(&data_dir, ["snapshots", "list"], 0);
    assert_eq!(as_array(&listed, "snapshots").len(), 5);
}

#[test]
fn config_file_settings_apply_and_unknown_keys_fail() {
    let root = unique_temp_dir("cg-config");
    let data_dir = site_fixture("cg-config-data");
    let config_path = root.join("governance.yaml");
    write_file(
        &config_path,
        &format!("data_dir: {}\nbackup_retention: 1\n", path_str(&data_dir)),
    );
    let config_args = ["--config", path_str(&config_path)];

    for _ in 0..3 {
        let args = config_args.iter().chain(["backup", "--collection", "people"].iter());
        let output = run_cg(&data_dir, args);
        assert_eq!(output.status.code(), Some(0));
    }
    let cleanup = run_json(&data_dir, config_args.iter().chain(["snapshots", "cleanup"].iter()), 0);
    assert_eq!(cleanup.get("removed").and_then(Value::as_u64), Some(2));

    write_file(&config_path, "data_dri: typo\n");
    let output = run_cg(&data_dir, ["--config", path_str(&config_path), "validate"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn schema_show_lists_revisions() {
    let data_dir = site_fixture("cg-schema");
    let payload = run_json(&data_dir, ["schema", "show", "--collection", "books"], 0);
    let versions = as_array(&payload, "revisions")
        .iter()
        .map(|revision| as_str(revision, "version").to_string())
        .collect::<Vec<_>>();
    assert_eq!(versions, vec!["0.0.0", "1.0.0", "1.1.0"]);

    let missing = run_cg(&data_dir, ["schema", "show", "--collection", "recipes"]);
    assert_eq!(missing.status.code(), Some(2));
}

#[test]
fn stats_counts_records_and_flags_missing_collections() {
    let data_dir = site_fixture("cg-stats");
    fs::remove_file(data_dir.join("skills.yaml"))
        .unwrap_or_else(|err| panic!("failed to remove skills fixture: {err}"));
    let payload = run_json(&data_dir, ["stats"], 1);
    let books = as_array(&payload, "collections")
        .iter()
        .find(|stats| as_str(stats, "collection") == "books")
        .unwrap_or_else(|| panic!("books stats missing: {payload}"));
    assert_eq!(books.get("record_count").and_then(Value::as_u64), Some(2));
    let failed = as_array(&payload, "failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(as_str(&failed[0], "collection"), "skills");
}

#[test]
fn snapshot_cleanup_errors_exit_one() {
    let data_dir = site_fixture("cg-cleanup");
    let clean = run_json(&data_dir, ["snapshots", "cleanup", "--keep", "0"], 0);
    assert!(as_array(&clean, "errors").is_empty());

    write_file(&data_dir.join(".backups"), "not a directory\n");
    let output = run_cg(&data_dir, ["snapshots", "cleanup", "--keep", "0"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[cleanup] FAIL"), "stderr:\n{stderr}");
    let report = parse_stdout(&output);
    assert!(!as_array(&report, "errors").is_empty());
}
