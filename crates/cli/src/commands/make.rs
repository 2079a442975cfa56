use std::path::PathBuf;

use fieldmig_core::write_stub;

use crate::{fail, Context, OutputFormat};

pub(crate) fn cmd_make(ctx: &Context, name: &str, path: Option<PathBuf>, description: &str) {
    let dir = ctx.migrations_path(path);
    let created = match write_stub(&dir, name, description) {
        Ok(created) => created,
        Err(e) => fail(&e.to_string(), ctx),
    };
    match ctx.output {
        OutputFormat::Text => {
            if !ctx.quiet {
                println!("Created migration: {}", created.display());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "created": created.display().to_string() }));
        }
    }
}
