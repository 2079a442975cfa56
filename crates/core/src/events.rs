//! Change events emitted by field migrators.
//!
//! Migrators report what they did only through events; results, logs and
//! any caller-supplied observers are all built from the same stream.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::field::Field;

/// Which aspect of a stored field changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeProperty {
    Key,
    Name,
    Value,
}

impl fmt::Display for ChangeProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeProperty::Key => write!(f, "key"),
            ChangeProperty::Name => write!(f, "name"),
            ChangeProperty::Value => write!(f, "value"),
        }
    }
}

/// Identity of a field as reported in events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRef {
    pub key: String,
    pub name: String,
    pub field_type: String,
}

impl FieldRef {
    pub fn of(field: &Field) -> Self {
        FieldRef {
            key: field.key().to_string(),
            name: field.full_name().to_string(),
            field_type: field.field_type().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChangeEvent {
    pub field: FieldRef,
    /// Set for materialized rows of a repeating parent.
    pub parent: Option<FieldRef>,
    pub property: ChangeProperty,
    pub old_value: Value,
    pub new_value: Value,
    pub storage_type: String,
    pub affected_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MigrationEvent {
    FieldChange(FieldChangeEvent),
    /// Rows written by one storage operation.
    RowsAffected { storage_type: String, rows: usize },
}

pub trait EventObserver {
    fn on_event(&mut self, event: &MigrationEvent);
}

/// Synchronous fan-out of events to the registered observers.
#[derive(Default)]
pub struct EventDispatcher<'o> {
    observers: Vec<&'o mut dyn EventObserver>,
}

impl<'o> EventDispatcher<'o> {
    pub fn new() -> Self {
        EventDispatcher {
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: &'o mut dyn EventObserver) {
        self.observers.push(observer);
    }

    pub fn clear_observers(&mut self) {
        self.observers.clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn dispatch(&mut self, event: &MigrationEvent) {
        for observer in self.observers.iter_mut() {
            observer.on_event(event);
        }
    }

    pub fn field_change(&mut self, event: FieldChangeEvent) {
        self.dispatch(&MigrationEvent::FieldChange(event));
    }

    pub fn rows_affected(&mut self, storage_type: &str, rows: usize) {
        self.dispatch(&MigrationEvent::RowsAffected {
            storage_type: storage_type.to_string(),
            rows,
        });
    }
}

/// Logs every event at debug level.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_event(&mut self, event: &MigrationEvent) {
        match event {
            MigrationEvent::FieldChange(change) => debug!(
                field = %change.field.name,
                parent = change.parent.as_ref().map(|p| p.name.as_str()).unwrap_or(""),
                property = %change.property,
                old = %change.old_value,
                new = %change.new_value,
                storage = %change.storage_type,
                rows = change.affected_rows,
                "field changed"
            ),
            MigrationEvent::RowsAffected { storage_type, rows } => {
                debug!(storage = %storage_type, rows, "rows affected")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<MigrationEvent>,
    }

    impl EventObserver for Recorder {
        fn on_event(&mut self, event: &MigrationEvent) {
            self.seen.push(event.clone());
        }
    }

    #[test]
    fn dispatch_reaches_every_observer() {
        let mut first = Recorder::default();
        let mut second = Recorder::default();
        {
            let mut dispatcher = EventDispatcher::new();
            dispatcher.add_observer(&mut first);
            dispatcher.add_observer(&mut second);
            assert_eq!(dispatcher.observer_count(), 2);
            dispatcher.rows_affected("post_meta", 3);
        }
        assert_eq!(first.seen.len(), 1);
        assert_eq!(second.seen, first.seen);
    }

    #[test]
    fn cleared_dispatcher_is_silent() {
        let mut recorder = Recorder::default();
        {
            let mut dispatcher = EventDispatcher::new();
            dispatcher.add_observer(&mut recorder);
            dispatcher.clear_observers();
            dispatcher.rows_affected("options", 1);
        }
        assert!(recorder.seen.is_empty());
    }

    #[test]
    fn property_labels() {
        assert_eq!(ChangeProperty::Key.to_string(), "key");
        assert_eq!(ChangeProperty::Value.to_string(), "value");
    }
}
