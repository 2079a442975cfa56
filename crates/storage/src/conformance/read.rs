use serde_json::json;

use super::{expect_eq, Fixture, TestResult};
use crate::database::StorageScope;

pub(super) fn run_read_tests<F>(factory: &F) -> Vec<TestResult>
where
    F: Fn() -> Fixture,
{
    vec![
        TestResult::from_result("read", "missing_name_reads_none", missing_name_reads_none(factory)),
        TestResult::from_result("read", "reads_seeded_value", reads_seeded_value(factory)),
        TestResult::from_result(
            "read",
            "key_refs_are_a_separate_namespace",
            key_refs_are_a_separate_namespace(factory),
        ),
        TestResult::from_result("read", "match_value_filters", match_value_filters(factory)),
    ]
}

fn missing_name_reads_none<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    expect_eq("read of unknown name", fx.get(&site, "nothing_here", false)?, None)
}

fn reads_seeded_value<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("Hello"), false)?;
    expect_eq("read title", fx.get(&site, "title", false)?, Some(json!("Hello")))
}

fn key_refs_are_a_separate_namespace<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("field_title"), true)?;
    expect_eq("value record", fx.get(&site, "title", false)?, None)?;
    expect_eq(
        "key reference",
        fx.get(&site, "title", true)?,
        Some(json!("field_title")),
    )
}

fn match_value_filters<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("field_title"), true)?;
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    let hit = fx
        .location
        .read(&scope, "title", true, Some(&json!("field_title")))
        .map_err(|e| e.to_string())?;
    let miss = fx
        .location
        .read(&scope, "title", true, Some(&json!("field_other")))
        .map_err(|e| e.to_string())?;
    expect_eq("matching read", hit, Some(json!("field_title")))?;
    expect_eq("mismatching read", miss, None)
}
