use serde_json::json;

use super::{expect_eq, Fixture, TestResult};
use crate::database::StorageScope;
use crate::traits::ValueUpdate;

pub(super) fn run_dry_run_tests<F>(factory: &F) -> Vec<TestResult>
where
    F: Fn() -> Fixture,
{
    vec![
        TestResult::from_result(
            "dry_run",
            "update_counts_without_writing",
            update_counts_without_writing(factory),
        ),
        TestResult::from_result(
            "dry_run",
            "delete_counts_without_writing",
            delete_counts_without_writing(factory),
        ),
        TestResult::from_result(
            "dry_run",
            "counts_match_real_run",
            counts_match_real_run(factory),
        ),
    ]
}

fn update_counts_without_writing<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("Hello"), false)?;
    let scope = StorageScope::new(fx.db.connection(), &site, true);
    let affected = fx
        .location
        .update(&scope, "title", "headline", ValueUpdate::Set(&json!("changed")), false)
        .map_err(|e| e.to_string())?;
    expect_eq("estimated rows", affected, 1)?;
    expect_eq("old name", fx.get(&site, "title", false)?, Some(json!("Hello")))?;
    expect_eq("new name", fx.get(&site, "headline", false)?, None)
}

fn delete_counts_without_writing<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("Hello"), false)?;
    let scope = StorageScope::new(fx.db.connection(), &site, true);
    let affected = fx
        .location
        .delete(&scope, "title", false)
        .map_err(|e| e.to_string())?;
    expect_eq("estimated rows", affected, 1)?;
    expect_eq("value", fx.get(&site, "title", false)?, Some(json!("Hello")))
}

fn counts_match_real_run<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("Hello"), false)?;
    let dry = StorageScope::new(fx.db.connection(), &site, true);
    let live = StorageScope::new(fx.db.connection(), &site, false);
    let estimated = fx
        .location
        .update(&dry, "title", "headline", ValueUpdate::Keep, false)
        .map_err(|e| e.to_string())?;
    let actual = fx
        .location
        .update(&live, "title", "headline", ValueUpdate::Keep, false)
        .map_err(|e| e.to_string())?;
    expect_eq("dry-run estimate", estimated, actual)
}
