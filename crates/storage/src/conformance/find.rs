use serde_json::json;

use super::{expect_eq, Fixture, TestResult};
use crate::database::StorageScope;
use crate::traits::FieldPattern;

pub(super) fn run_find_tests<F>(factory: &F) -> Vec<TestResult>
where
    F: Fn() -> Fixture,
{
    vec![
        TestResult::from_result("find", "finds_indexed_rows", finds_indexed_rows(factory)),
        TestResult::from_result("find", "skips_key_references", skips_key_references(factory)),
        TestResult::from_result("find", "empty_when_nothing_matches", empty_when_nothing_matches(factory)),
    ]
}

fn names(fx: &Fixture, base: &str) -> Result<Vec<String>, String> {
    let site = fx.site();
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    let pattern = FieldPattern::indexed(base, "_").map_err(|e| e.to_string())?;
    let mut found: Vec<String> = fx
        .location
        .find_fields(&scope, &pattern)
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|f| f.name)
        .collect();
    found.sort();
    Ok(found)
}

fn finds_indexed_rows<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    for name in ["team", "team_0", "team_0_member", "team_1", "team_1_member", "team_other", "teams_0"] {
        fx.put(&site, name, json!("v"), false)?;
    }
    expect_eq(
        "found names",
        names(&fx, "team")?,
        vec![
            "team_0".to_string(),
            "team_0_member".to_string(),
            "team_1".to_string(),
            "team_1_member".to_string(),
        ],
    )
}

fn skips_key_references<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "team_0_member", json!("field_member"), true)?;
    expect_eq("found names", names(&fx, "team")?, Vec::<String>::new())
}

fn empty_when_nothing_matches<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    expect_eq("found names", names(&fx, "team")?, Vec::<String>::new())
}
