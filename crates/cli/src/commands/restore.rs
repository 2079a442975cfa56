use std::path::PathBuf;

use crate::backup::{latest_backup, restore_backup};
use crate::{fail, Context, OutputFormat};

pub(crate) fn cmd_restore(ctx: &Context, backup_dir: Option<PathBuf>, file: Option<PathBuf>) {
    let db_path = ctx.db_path();
    let backup = match file {
        Some(file) => file,
        None => match latest_backup(&ctx.backup_path(backup_dir)) {
            Ok(path) => path,
            Err(e) => fail(&e, ctx),
        },
    };
    if let Err(e) = restore_backup(&backup, db_path) {
        fail(&e, ctx);
    }
    match ctx.output {
        OutputFormat::Text => {
            if !ctx.quiet {
                println!("Restored {} to {}", backup.display(), db_path.display());
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "restored": backup.display().to_string(),
                    "database": db_path.display().to_string(),
                })
            );
        }
    }
}
