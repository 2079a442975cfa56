//! Runs the storage conformance suite against every key/value backend.

use fieldmig_storage::conformance::{run_conformance_suite, Fixture};
use fieldmig_storage::{Database, MetaStorage, OptionsStorage, StorageScope};
use serde_json::Value;

fn installed() -> Database {
    let db = Database::open_in_memory("wp_").expect("open database");
    db.install().expect("install schema");
    db
}

fn meta_fixture(meta: MetaStorage) -> Fixture {
    let seeder = meta.clone();
    Fixture {
        db: installed(),
        location: Box::new(meta),
        seed: Box::new(move |scope: &StorageScope<'_>, name: &str, value: &Value, is_key_ref: bool| {
            seeder.insert(scope, 1, name, value, is_key_ref).map(|_| ())
        }),
    }
}

fn options_fixture(options: OptionsStorage) -> Fixture {
    let seeder = options.clone();
    Fixture {
        db: installed(),
        location: Box::new(options),
        seed: Box::new(move |scope: &StorageScope<'_>, name: &str, value: &Value, is_key_ref: bool| {
            seeder.insert(scope, name, value, is_key_ref)
        }),
    }
}

#[test]
fn post_meta_conformance() {
    let report = run_conformance_suite(|| meta_fixture(MetaStorage::posts()));
    assert!(report.failed == 0, "{report}");
    assert!(report.total > 0);
}

#[test]
fn prefixed_post_meta_conformance() {
    let report = run_conformance_suite(|| meta_fixture(MetaStorage::posts().with_prefix("acf")));
    assert!(report.failed == 0, "{report}");
}

#[test]
fn term_meta_conformance() {
    let report = run_conformance_suite(|| meta_fixture(MetaStorage::terms()));
    assert!(report.failed == 0, "{report}");
}

#[test]
fn user_meta_conformance() {
    let report = run_conformance_suite(|| meta_fixture(MetaStorage::users()));
    assert!(report.failed == 0, "{report}");
}

#[test]
fn options_conformance() {
    let report = run_conformance_suite(|| options_fixture(OptionsStorage::new()));
    assert!(report.failed == 0, "{report}");
}

#[test]
fn unprefixed_options_conformance() {
    let report = run_conformance_suite(|| options_fixture(OptionsStorage::with_prefix("")));
    assert!(report.failed == 0, "{report}");
}
