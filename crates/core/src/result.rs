//! Outcome of a migration run, aggregated from change events.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::events::{ChangeProperty, EventObserver, FieldChangeEvent, FieldRef, MigrationEvent};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    pub old_value: Value,
    pub new_value: Value,
    pub affected_rows: usize,
}

/// Ledger entry of one field (or materialized sub-field row).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChangeSummary {
    pub key: String,
    pub name: String,
    pub field_type: String,
    pub changes: IndexMap<ChangeProperty, PropertyChange>,
    /// Materialized rows keyed by their storage name before migration.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub sub_fields: IndexMap<String, FieldChangeSummary>,
}

impl FieldChangeSummary {
    fn new(field: &FieldRef) -> Self {
        FieldChangeSummary {
            key: field.key.clone(),
            name: field.name.clone(),
            field_type: field.field_type.clone(),
            changes: IndexMap::new(),
            sub_fields: IndexMap::new(),
        }
    }

    fn record(&mut self, event: &FieldChangeEvent) {
        self.changes
            .entry(event.property)
            .and_modify(|change| {
                change.new_value = event.new_value.clone();
                change.affected_rows += event.affected_rows;
            })
            .or_insert_with(|| PropertyChange {
                old_value: event.old_value.clone(),
                new_value: event.new_value.clone(),
                affected_rows: event.affected_rows,
            });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationResult {
    success: bool,
    message: Option<String>,
    dry_run: bool,
    storage_results: BTreeMap<String, usize>,
    field_changes: IndexMap<String, FieldChangeSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    site_results: BTreeMap<i64, MigrationResult>,
}

impl MigrationResult {
    pub fn new(dry_run: bool) -> Self {
        MigrationResult {
            success: true,
            message: None,
            dry_run,
            storage_results: BTreeMap::new(),
            field_changes: IndexMap::new(),
            site_results: BTreeMap::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Rows affected per storage type.
    pub fn storage_results(&self) -> &BTreeMap<String, usize> {
        &self.storage_results
    }

    pub fn field_changes(&self) -> &IndexMap<String, FieldChangeSummary> {
        &self.field_changes
    }

    pub fn site_results(&self) -> &BTreeMap<i64, MigrationResult> {
        &self.site_results
    }

    /// Rows affected across every storage type and site.
    pub fn total_count(&self) -> usize {
        self.storage_results.values().sum::<usize>()
            + self.site_results.values().map(MigrationResult::total_count).sum::<usize>()
    }

    pub(crate) fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.message = Some(message.into());
    }

    pub(crate) fn add_site_result(&mut self, site_id: i64, result: MigrationResult) {
        self.site_results.insert(site_id, result);
    }

    fn record_field_change(&mut self, event: &FieldChangeEvent) {
        match &event.parent {
            None => self
                .field_changes
                .entry(event.field.key.clone())
                .or_insert_with(|| FieldChangeSummary::new(&event.field))
                .record(event),
            Some(parent) => self
                .field_changes
                .entry(parent.key.clone())
                .or_insert_with(|| FieldChangeSummary::new(parent))
                .sub_fields
                .entry(event.field.name.clone())
                .or_insert_with(|| FieldChangeSummary::new(&event.field))
                .record(event),
        }
    }
}

impl EventObserver for MigrationResult {
    fn on_event(&mut self, event: &MigrationEvent) {
        match event {
            MigrationEvent::FieldChange(change) => self.record_field_change(change),
            MigrationEvent::RowsAffected { storage_type, rows } => {
                *self.storage_results.entry(storage_type.clone()).or_insert(0) += rows;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(key: &str, name: &str) -> FieldRef {
        FieldRef {
            key: key.into(),
            name: name.into(),
            field_type: "text".into(),
        }
    }

    fn change(field: FieldRef, parent: Option<FieldRef>, property: ChangeProperty, rows: usize) -> MigrationEvent {
        MigrationEvent::FieldChange(FieldChangeEvent {
            field,
            parent,
            property,
            old_value: json!("old"),
            new_value: json!("new"),
            storage_type: "post_meta".into(),
            affected_rows: rows,
        })
    }

    #[test]
    fn aggregates_rows_per_storage_type() {
        let mut result = MigrationResult::new(false);
        for (storage_type, rows) in [("post_meta", 2), ("options", 1), ("post_meta", 3)] {
            result.on_event(&MigrationEvent::RowsAffected {
                storage_type: storage_type.into(),
                rows,
            });
        }
        assert_eq!(result.storage_results()["post_meta"], 5);
        assert_eq!(result.storage_results()["options"], 1);
        assert_eq!(result.total_count(), 6);
    }

    #[test]
    fn ledger_groups_sub_fields_under_parent() {
        let mut result = MigrationResult::new(true);
        let team = field("field_team", "team");
        result.on_event(&change(team.clone(), None, ChangeProperty::Name, 2));
        result.on_event(&change(field("field_member", "team_0_member"), Some(team.clone()), ChangeProperty::Name, 1));
        result.on_event(&change(field("field_member", "team_1_member"), Some(team), ChangeProperty::Name, 1));

        let entry = &result.field_changes()["field_team"];
        assert_eq!(entry.changes[&ChangeProperty::Name].affected_rows, 2);
        let subs: Vec<&String> = entry.sub_fields.keys().collect();
        assert_eq!(subs, vec!["team_0_member", "team_1_member"]);
        assert!(result.is_dry_run());
    }

    #[test]
    fn repeated_property_accumulates_rows() {
        let mut result = MigrationResult::new(false);
        result.on_event(&change(field("field_t", "title"), None, ChangeProperty::Key, 2));
        result.on_event(&change(field("field_t", "title"), None, ChangeProperty::Key, 1));
        assert_eq!(result.field_changes()["field_t"].changes[&ChangeProperty::Key].affected_rows, 3);
    }

    #[test]
    fn site_totals_roll_up() {
        let mut parent = MigrationResult::new(false);
        let mut site = MigrationResult::new(false);
        site.on_event(&MigrationEvent::RowsAffected {
            storage_type: "post_meta".into(),
            rows: 4,
        });
        parent.add_site_result(2, site);
        assert_eq!(parent.total_count(), 4);
        parent.fail("boom");
        assert!(!parent.success());
        assert_eq!(parent.message(), Some("boom"));
    }
}
