pub(crate) mod make;
pub(crate) mod migrate;
pub(crate) mod restore;
pub(crate) mod rollback;
pub(crate) mod status;

use fieldmig_core::{MigrationResult, Migrator};
use fieldmig_storage::{Database, NullMigrationHistory};
use serde_json::Value;

use crate::render::{print_result_text, result_to_json, RunKind};
use crate::{backup, fail, Context, OutputFormat, RunArgs};

/// Migrator configured from the shared run flags.
pub(crate) fn build_migrator(ctx: &Context, run: &RunArgs) -> Migrator {
    let mut migrator = match Migrator::new(&ctx.config) {
        Ok(migrator) => migrator,
        Err(e) => fail(&e.to_string(), ctx),
    };
    if run.ignore_history {
        migrator = migrator.with_history(Box::new(NullMigrationHistory::new()));
    }
    migrator.set_dry_run(run.dry_run);
    migrator.set_multisite(run.network);
    migrator
}

/// Snapshot the database when `--backup` was given. Dry runs write
/// nothing and are never backed up.
pub(crate) fn backup_if_requested(ctx: &Context, db: &Database, run: &RunArgs) {
    if !run.backup || run.dry_run {
        return;
    }
    match backup::create_backup(db, &ctx.backup_path(run.backup_dir.clone())) {
        Ok(path) => {
            if !ctx.quiet && ctx.output == OutputFormat::Text {
                println!("Backup written to {}", path.display());
            }
        }
        Err(e) => fail(&e, ctx),
    }
}

/// Collects per-migration output; JSON mode prints one document at the end.
pub(crate) struct Report<'c> {
    ctx: &'c Context,
    entries: Vec<Value>,
}

impl<'c> Report<'c> {
    pub(crate) fn new(ctx: &'c Context) -> Self {
        Report {
            ctx,
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, name: &str, kind: RunKind, result: &MigrationResult) {
        match self.ctx.output {
            OutputFormat::Text => {
                if !self.ctx.quiet {
                    print_result_text(name, kind, result);
                }
            }
            OutputFormat::Json => self.entries.push(result_to_json(name, kind, result)),
        }
    }

    pub(crate) fn note(&self, message: &str) {
        if !self.ctx.quiet && self.ctx.output == OutputFormat::Text {
            println!("{}", message);
        }
    }

    pub(crate) fn finish(self) {
        if self.ctx.output == OutputFormat::Json {
            println!(
                "{}",
                serde_json::to_string_pretty(&Value::Array(self.entries))
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
    }
}
