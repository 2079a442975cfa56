use std::path::PathBuf;

use fieldmig_core::MigrationFinder;
use serde_json::json;

use crate::{fail, Context, OutputFormat};

/// History records, followed by migration files that have not run yet.
pub(crate) fn cmd_status(ctx: &Context, path: Option<PathBuf>) {
    let db = ctx.open_database();
    let history = match ctx.config.history() {
        Ok(history) => history,
        Err(e) => fail(&e.to_string(), ctx),
    };
    let records = match history.all(db.connection()) {
        Ok(records) => records,
        Err(e) => fail(&e.to_string(), ctx),
    };

    let dir = ctx.migrations_path(path);
    let names: Vec<String> = if dir.is_dir() {
        match MigrationFinder::new(&dir).find_migrations() {
            Ok(entries) => entries
                .values()
                .flat_map(|entry| entry.migrations().iter().map(|m| m.name().to_string()))
                .collect(),
            Err(e) => fail(&e.to_string(), ctx),
        }
    } else {
        Vec::new()
    };
    let pending: Vec<&String> = names
        .iter()
        .filter(|name| !records.iter().any(|r| &r.name == *name))
        .collect();

    match ctx.output {
        OutputFormat::Json => {
            let doc = json!({ "ran": records, "pending": pending });
            println!(
                "{}",
                serde_json::to_string_pretty(&doc)
                    .unwrap_or_else(|e| format!("serialization error: {}", e))
            );
        }
        OutputFormat::Text => {
            if ctx.quiet {
                return;
            }
            if records.is_empty() {
                println!("No migrations have run.");
            } else {
                println!("{:<6} {:<26} Name", "Batch", "Run at");
                for record in &records {
                    println!("{:<6} {:<26} {}", record.batch, record.run_at, record.name);
                }
            }
            for name in &pending {
                println!("Pending: {}", name);
            }
        }
    }
}
