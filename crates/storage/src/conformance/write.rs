use serde_json::{json, Value};

use super::{expect_eq, Fixture, TestResult};
use crate::database::StorageScope;
use crate::traits::ValueUpdate;

pub(super) fn run_write_tests<F>(factory: &F) -> Vec<TestResult>
where
    F: Fn() -> Fixture,
{
    vec![
        TestResult::from_result("write", "rename_moves_value", rename_moves_value(factory)),
        TestResult::from_result(
            "write",
            "set_replaces_key_reference",
            set_replaces_key_reference(factory),
        ),
        TestResult::from_result("write", "transform_rewrites_value", transform_rewrites_value(factory)),
        TestResult::from_result("write", "update_of_missing_name_is_zero", update_of_missing_name_is_zero(factory)),
        TestResult::from_result("write", "delete_removes_value", delete_removes_value(factory)),
        TestResult::from_result(
            "write",
            "delete_leaves_key_reference",
            delete_leaves_key_reference(factory),
        ),
    ]
}

fn rename_moves_value<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("Hello"), false)?;
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    let affected = fx
        .location
        .update(&scope, "title", "headline", ValueUpdate::Keep, false)
        .map_err(|e| e.to_string())?;
    expect_eq("affected rows", affected, 1)?;
    expect_eq("new name", fx.get(&site, "headline", false)?, Some(json!("Hello")))?;
    expect_eq("old name", fx.get(&site, "title", false)?, None)
}

fn set_replaces_key_reference<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("field_old"), true)?;
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    let new_key = json!("field_new");
    fx.location
        .update(&scope, "title", "title", ValueUpdate::Set(&new_key), true)
        .map_err(|e| e.to_string())?;
    expect_eq("key reference", fx.get(&site, "title", true)?, Some(new_key))
}

fn transform_rewrites_value<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "status", json!("draft"), false)?;
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    let upper = |v: &Value| json!(v.as_str().unwrap_or_default().to_uppercase());
    fx.location
        .update(&scope, "status", "state", ValueUpdate::Transform(&upper), false)
        .map_err(|e| e.to_string())?;
    expect_eq("transformed", fx.get(&site, "state", false)?, Some(json!("DRAFT")))
}

fn update_of_missing_name_is_zero<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    let affected = fx
        .location
        .update(&scope, "ghost", "spirit", ValueUpdate::Keep, false)
        .map_err(|e| e.to_string())?;
    expect_eq("affected rows", affected, 0)?;
    expect_eq("target", fx.get(&site, "spirit", false)?, None)
}

fn delete_removes_value<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("Hello"), false)?;
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    let affected = fx
        .location
        .delete(&scope, "title", false)
        .map_err(|e| e.to_string())?;
    expect_eq("affected rows", affected, 1)?;
    expect_eq("deleted", fx.get(&site, "title", false)?, None)
}

fn delete_leaves_key_reference<F: Fn() -> Fixture>(factory: &F) -> Result<(), String> {
    let fx = factory();
    let site = fx.site();
    fx.put(&site, "title", json!("Hello"), false)?;
    fx.put(&site, "title", json!("field_title"), true)?;
    let scope = StorageScope::new(fx.db.connection(), &site, false);
    fx.location
        .delete(&scope, "title", false)
        .map_err(|e| e.to_string())?;
    expect_eq("key reference", fx.get(&site, "title", true)?, Some(json!("field_title")))
}
