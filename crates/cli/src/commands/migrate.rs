use std::process;

use fieldmig_core::{Migration, MigrationFinder};
use tracing::info;

use super::{backup_if_requested, build_migrator, Report};
use crate::render::RunKind;
use crate::{fail, Context, RunArgs};

pub(crate) fn cmd_migrate(ctx: &Context, run: RunArgs, name: Option<&str>) {
    let finder = MigrationFinder::new(ctx.migrations_path(run.path.clone()));
    let migrations: Vec<Migration> = match name {
        Some(name) => match finder.find_by_name(name) {
            Ok(Some(migration)) => vec![migration],
            Ok(None) => fail(
                &format!("migration '{}' not found in '{}'", name, finder.dir().display()),
                ctx,
            ),
            Err(e) => fail(&e.to_string(), ctx),
        },
        None => match finder.find_migrations() {
            Ok(entries) => entries
                .values()
                .flat_map(|entry| entry.migrations().iter().cloned())
                .collect(),
            Err(e) => fail(&e.to_string(), ctx),
        },
    };

    let mut db = ctx.open_database();
    let mut migrator = build_migrator(ctx, &run);

    // An explicit name always runs, so history conflicts are reported.
    let pending: Vec<Migration> = if name.is_some() || !migrator.history().is_tracking() {
        migrations
    } else {
        let mut pending = Vec::new();
        for migration in migrations {
            match migrator.history().has_run(db.connection(), migration.name()) {
                Ok(true) => {}
                Ok(false) => pending.push(migration),
                Err(e) => fail(&e.to_string(), ctx),
            }
        }
        pending
    };

    let mut report = Report::new(ctx);
    if pending.is_empty() {
        report.note("Nothing to migrate.");
        report.finish();
        return;
    }
    backup_if_requested(ctx, &db, &run);
    info!(count = pending.len(), dry_run = run.dry_run, "running migrations");

    for migration in &pending {
        let result = migrator.run(&mut db, migration);
        report.add(migration.name(), RunKind::Migrate, &result);
        if !result.success() {
            report.finish();
            process::exit(1);
        }
    }
    report.finish();
}
