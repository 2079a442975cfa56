//! CLI integration tests for the `fieldmig` binary.
//!
//! Every test works in its own temporary directory holding the database,
//! the migrations directory and the backups.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use fieldmig_storage::{Database, MetaStorage, StorageScope};
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Workspace {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        fs::create_dir_all(ws.migrations()).unwrap();
        ws
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("site.db")
    }

    fn migrations(&self) -> PathBuf {
        self.dir.path().join("migrations")
    }

    fn backups(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    /// A `fieldmig` command rooted in the workspace, pointed at its database.
    fn fieldmig(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("fieldmig");
        cmd.current_dir(self.dir.path())
            .env_remove("RUST_LOG")
            .env("FIELDMIG_DB", self.db());
        cmd
    }

    fn seed_titles(&self) {
        let db = Database::open(self.db(), "wp_").unwrap();
        db.install().unwrap();
        let site = db.main_site();
        let scope = StorageScope::new(db.connection(), &site, false);
        let meta = MetaStorage::posts();
        for (post, title) in [(1, "Hello"), (2, "World")] {
            meta.insert(&scope, post, "title", &json!(title), false).unwrap();
            meta.insert(&scope, post, "title", &json!("field_title"), true).unwrap();
        }
    }

    fn write_migration(&self, file: &str, body: &Value) {
        fs::write(self.migrations().join(file), body.to_string()).unwrap();
    }

    fn write_title_rename(&self) {
        self.write_migration(
            "2024_01_01_000000_rename_title.json",
            &json!({
                "name": "rename_title",
                "description": "Rename title to headline",
                "before": [{"key": "field_title", "name": "title"}],
                "after": [{"key": "field_title", "name": "headline"}],
                "name_changes": {"title": "headline"},
                "storage": [{"type": "post_meta"}]
            }),
        );
    }

    fn meta_keys(&self) -> Vec<String> {
        meta_keys(&self.db())
    }
}

fn meta_keys(db: &Path) -> Vec<String> {
    let conn = rusqlite::Connection::open(db).unwrap();
    let mut stmt = conn
        .prepare("SELECT DISTINCT meta_key FROM wp_postmeta ORDER BY meta_key")
        .unwrap();
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    keys
}

// ──────────────────────────────────────────────
// 1. Help and argument handling
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    cargo_bin_cmd!("fieldmig")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Custom field data migrations"));
}

#[test]
fn missing_database_is_an_error() {
    let ws = Workspace::new();
    ws.fieldmig()
        .env_remove("FIELDMIG_DB")
        .arg("status")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no database given"));
}

#[test]
fn json_errors_are_objects() {
    let ws = Workspace::new();
    let output = ws
        .fieldmig()
        .args(["--output", "json", "migrate", "--name", "nope"])
        .assert()
        .failure()
        .get_output()
        .clone();
    let err: Value = serde_json::from_slice(&output.stderr).expect("json error");
    assert!(err["error"].as_str().unwrap().contains("'nope' not found"));
}

// ──────────────────────────────────────────────
// 2. make
// ──────────────────────────────────────────────

#[test]
fn make_creates_a_stub() {
    let ws = Workspace::new();
    ws.fieldmig()
        .args(["make", "rename_title", "--description", "Rename title"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created migration:"));

    let files: Vec<PathBuf> = fs::read_dir(ws.migrations())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let stub: Value = serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
    assert_eq!(stub["name"], "rename_title");
    assert_eq!(stub["description"], "Rename title");
}

#[test]
fn make_rejects_bad_names() {
    let ws = Workspace::new();
    ws.fieldmig()
        .args(["make", "no spaces"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid migration name"));
}

// ──────────────────────────────────────────────
// 3. migrate / rollback / status
// ──────────────────────────────────────────────

#[test]
fn migrate_then_rollback() {
    let ws = Workspace::new();
    ws.seed_titles();
    ws.write_title_rename();

    ws.fieldmig()
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Migrated: rename_title"))
        .stdout(predicate::str::contains("post_meta: 4 row(s)"))
        .stdout(predicate::str::contains("name: \"title\" -> \"headline\" (2 row(s))"));
    assert_eq!(ws.meta_keys(), vec!["_headline", "headline"]);

    ws.fieldmig()
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to migrate."));

    ws.fieldmig()
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back: rename_title"));
    assert_eq!(ws.meta_keys(), vec!["_title", "title"]);

    ws.fieldmig()
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to roll back."));
}

#[test]
fn explicit_rerun_fails_with_history_error() {
    let ws = Workspace::new();
    ws.seed_titles();
    ws.write_title_rename();
    ws.fieldmig().arg("migrate").assert().success();

    ws.fieldmig()
        .args(["migrate", "--name", "rename_title"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Failed: rename_title"))
        .stdout(predicate::str::contains("already been run"));
}

#[test]
fn dry_run_leaves_the_database_alone() {
    let ws = Workspace::new();
    ws.seed_titles();
    ws.write_title_rename();

    ws.fieldmig()
        .args(["migrate", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run: rename_title"))
        .stdout(predicate::str::contains("post_meta: 4 row(s)"));
    assert_eq!(ws.meta_keys(), vec!["_title", "title"]);

    ws.fieldmig()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No migrations have run."))
        .stdout(predicate::str::contains("Pending: rename_title"));
}

#[test]
fn json_output_carries_the_result() {
    let ws = Workspace::new();
    ws.seed_titles();
    ws.write_title_rename();

    let output = ws
        .fieldmig()
        .args(["--output", "json", "migrate"])
        .assert()
        .success()
        .get_output()
        .clone();
    let doc: Value = serde_json::from_slice(&output.stdout).expect("json output");
    let run = &doc[0];
    assert_eq!(run["migration"], "rename_title");
    assert_eq!(run["kind"], "migrate");
    assert_eq!(run["result"]["success"], true);
    assert_eq!(run["result"]["storage_results"]["post_meta"], 4);
    assert_eq!(
        run["result"]["field_changes"]["field_title"]["changes"]["name"]["new_value"],
        "headline"
    );

    let status = ws
        .fieldmig()
        .args(["--output", "json", "status"])
        .assert()
        .success()
        .get_output()
        .clone();
    let doc: Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(doc["ran"][0]["name"], "rename_title");
    assert_eq!(doc["ran"][0]["batch"], 1);
    assert_eq!(doc["pending"], json!([]));
}

#[test]
fn invalid_migration_file_fails() {
    let ws = Workspace::new();
    ws.seed_titles();
    fs::write(ws.migrations().join("2024_01_01_000000_broken.json"), "{ not json").unwrap();
    ws.fieldmig()
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid migration file"));
}

#[test]
fn ignore_history_allows_reruns() {
    let ws = Workspace::new();
    ws.seed_titles();
    ws.write_title_rename();
    ws.fieldmig().args(["migrate", "--ignore-history"]).assert().success();
    ws.fieldmig()
        .args(["migrate", "--ignore-history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Migrated: rename_title"));

    ws.fieldmig()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending: rename_title"));
}

// ──────────────────────────────────────────────
// 4. Backups
// ──────────────────────────────────────────────

#[test]
fn backup_then_restore() {
    let ws = Workspace::new();
    ws.seed_titles();
    ws.write_title_rename();

    ws.fieldmig()
        .args(["migrate", "--backup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup written to"));
    assert_eq!(ws.meta_keys(), vec!["_headline", "headline"]);
    assert_eq!(fs::read_dir(ws.backups()).unwrap().count(), 1);

    ws.fieldmig()
        .arg("restore")
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored"));
    assert_eq!(ws.meta_keys(), vec!["_title", "title"]);
}

#[test]
fn restore_without_backups_fails() {
    let ws = Workspace::new();
    ws.fieldmig()
        .args(["restore", "--backup-dir", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not read backup directory"));
}
