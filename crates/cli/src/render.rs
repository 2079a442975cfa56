//! Human-readable and JSON rendering of migration results.

use fieldmig_core::{FieldChangeSummary, MigrationResult};
use serde_json::{json, Value};

/// What a reported run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunKind {
    Migrate,
    Rollback,
}

impl RunKind {
    fn verb(self) -> &'static str {
        match self {
            RunKind::Migrate => "Migrated",
            RunKind::Rollback => "Rolled back",
        }
    }
}

pub(crate) fn result_to_json(name: &str, kind: RunKind, result: &MigrationResult) -> Value {
    let kind = match kind {
        RunKind::Migrate => "migrate",
        RunKind::Rollback => "rollback",
    };
    json!({
        "migration": name,
        "kind": kind,
        "result": result,
    })
}

pub(crate) fn print_result_text(name: &str, kind: RunKind, result: &MigrationResult) {
    let status = if !result.success() {
        "Failed"
    } else if result.is_dry_run() {
        "Dry run"
    } else {
        kind.verb()
    };
    println!("{}: {}", status, name);
    if let Some(message) = result.message() {
        println!("  {}", message);
    }
    print_body(result, "  ");
    for (site_id, site) in result.site_results() {
        let status = if site.success() { "ok" } else { "failed" };
        println!("  site {} ({}):", site_id, status);
        if let Some(message) = site.message().filter(|_| !site.success()) {
            println!("    {}", message);
        }
        print_body(site, "    ");
    }
}

fn print_body(result: &MigrationResult, indent: &str) {
    for (storage_type, rows) in result.storage_results() {
        println!("{}{}: {} row(s)", indent, storage_type, rows);
    }
    for summary in result.field_changes().values() {
        print_field(summary, indent);
    }
}

fn print_field(summary: &FieldChangeSummary, indent: &str) {
    let label = if summary.key.is_empty() {
        summary.name.clone()
    } else {
        format!("{} ({})", summary.name, summary.key)
    };
    if summary.field_type.is_empty() {
        println!("{}{}", indent, label);
    } else {
        println!("{}{} [{}]", indent, label, summary.field_type);
    }
    for (property, change) in &summary.changes {
        println!(
            "{}  {}: {} -> {} ({} row(s))",
            indent, property, change.old_value, change.new_value, change.affected_rows
        );
    }
    let nested = format!("{}    ", indent);
    for sub in summary.sub_fields.values() {
        print_field(sub, &nested);
    }
}
