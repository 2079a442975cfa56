//! Conformance test suite for key/value `StorageLocation` implementations.
//!
//! This module provides a backend-agnostic test suite that any key/value
//! storage location can run to verify it honours the contract the field
//! migrators rely on. The suite covers:
//!
//! - **Read**: missing names, key-reference namespace, `match_value` filtering
//! - **Write**: renames, key-reference replacement, per-row transforms, deletes
//! - **Find**: indexed repeater rows, sibling exclusion, logical names
//! - **Dry-run**: counts match a real run, nothing is written
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory producing a
//! fresh [`Fixture`] (an installed database, the location under test, and a
//! seeding hook) for each test:
//!
//! ```ignore
//! use fieldmig_storage::conformance::{run_conformance_suite, Fixture};
//!
//! #[test]
//! fn post_meta_conformance() {
//!     let report = run_conformance_suite(|| post_meta_fixture());
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod dry_run;
mod find;
mod read;
mod write;

use std::fmt;

use serde_json::Value;

use crate::database::{Database, StorageScope};
use crate::error::StorageError;
use crate::record::Site;
use crate::traits::StorageLocation;

/// Seeds one stored value (or key reference) under a logical name.
pub type Seeder = Box<dyn Fn(&StorageScope<'_>, &str, &Value, bool) -> Result<(), StorageError>>;

/// A storage location under test together with its database.
pub struct Fixture {
    pub db: Database,
    pub location: Box<dyn StorageLocation>,
    pub seed: Seeder,
}

impl Fixture {
    fn site(&self) -> Site {
        self.db.main_site()
    }

    fn put(&self, site: &Site, name: &str, value: Value, is_key_ref: bool) -> Result<(), String> {
        let scope = StorageScope::new(self.db.connection(), site, false);
        (self.seed)(&scope, name, &value, is_key_ref).map_err(|e| format!("seeding {name}: {e}"))
    }

    fn get(&self, site: &Site, name: &str, is_key_ref: bool) -> Result<Option<Value>, String> {
        let scope = StorageScope::new(self.db.connection(), site, false);
        self.location
            .read(&scope, name, is_key_ref, None)
            .map_err(|e| format!("read {name}: {e}"))
    }
}

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "read", "write", "find").
    pub category: String,
    /// Test name (e.g. "rename_moves_value").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: result.is_ok(),
            message: result.err(),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage location.
///
/// The `factory` function is called once per test to create a fresh
/// fixture, ensuring test isolation.
pub fn run_conformance_suite<F>(factory: F) -> ConformanceReport
where
    F: Fn() -> Fixture,
{
    let mut results = Vec::new();

    results.extend(read::run_read_tests(&factory));
    results.extend(write::run_write_tests(&factory));
    results.extend(find::run_find_tests(&factory));
    results.extend(dry_run::run_dry_run_tests(&factory));

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

fn expect_eq<T: PartialEq + fmt::Debug>(what: &str, actual: T, expected: T) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("{what}: expected {expected:?}, got {actual:?}"))
    }
}
