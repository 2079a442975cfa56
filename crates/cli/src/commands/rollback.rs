use std::process;

use fieldmig_core::{MigrationFinder, RollbackSelection};
use tracing::info;

use super::{backup_if_requested, build_migrator, Report};
use crate::render::RunKind;
use crate::{fail, Context, RunArgs};

/// Roll back by name, by count of recent runs, or by last batch. Stops at
/// the first failure.
pub(crate) fn cmd_rollback(
    ctx: &Context,
    run: RunArgs,
    name: Option<&str>,
    steps: usize,
    batch: bool,
) {
    let finder = MigrationFinder::new(ctx.migrations_path(run.path.clone()));
    let mut db = ctx.open_database();
    let mut migrator = build_migrator(ctx, &run);

    let names: Vec<String> = match name {
        Some(name) => vec![name.to_string()],
        None => {
            if !migrator.history().is_tracking() {
                fail("--ignore-history needs --name: there is no history to choose from", ctx);
            }
            let selection = if batch {
                RollbackSelection::LastBatch
            } else {
                RollbackSelection::Steps(steps)
            };
            match migrator.rollback_candidates(&db, selection) {
                Ok(records) => records.into_iter().map(|r| r.name).collect(),
                Err(e) => fail(&e.to_string(), ctx),
            }
        }
    };

    let mut report = Report::new(ctx);
    if names.is_empty() {
        report.note("Nothing to roll back.");
        report.finish();
        return;
    }

    let mut migrations = Vec::with_capacity(names.len());
    for name in &names {
        match finder.find_by_name(name) {
            Ok(Some(migration)) => migrations.push(migration),
            Ok(None) => fail(
                &format!(
                    "migration '{}' not found in '{}'",
                    name,
                    finder.dir().display()
                ),
                ctx,
            ),
            Err(e) => fail(&e.to_string(), ctx),
        }
    }
    backup_if_requested(ctx, &db, &run);
    info!(count = migrations.len(), dry_run = run.dry_run, "rolling back migrations");

    for migration in &migrations {
        let result = migrator.rollback(&mut db, migration);
        report.add(migration.name(), RunKind::Rollback, &result);
        if !result.success() {
            report.finish();
            process::exit(1);
        }
    }
    report.finish();
}
