use fieldmig_storage::ValueUpdate;
use serde_json::Value;

use super::{FieldContext, FieldMigrator};
use crate::error::MigrationError;
use crate::events::{ChangeProperty, EventDispatcher, FieldChangeEvent, FieldRef};
use crate::field::{Field, FieldMapping};
use crate::migration::ValueTransformer;

/// Handles scalar and other single-record fields.
pub struct DefaultFieldMigrator;

/// Explicit storage names for one materialized row of a repeating parent.
#[derive(Debug, Clone, Copy)]
pub struct SubFieldRename<'s> {
    pub old_name: &'s str,
    pub new_name: &'s str,
    pub parent: &'s Field,
}

impl FieldMigrator for DefaultFieldMigrator {
    fn migrate_field(
        &self,
        mapping: &FieldMapping,
        ctx: &FieldContext<'_>,
        events: &mut EventDispatcher<'_>,
    ) -> Result<(), MigrationError> {
        self.migrate_field_data(mapping, ctx, events, None)
    }
}

impl DefaultFieldMigrator {
    /// Move the key reference and the value of one stored field.
    ///
    /// Without `sub`, the mapping's own full names are used. With `sub`,
    /// the given row names are used and key references are remapped
    /// through the migration's key map.
    pub fn migrate_field_data(
        &self,
        mapping: &FieldMapping,
        ctx: &FieldContext<'_>,
        events: &mut EventDispatcher<'_>,
        sub: Option<SubFieldRename<'_>>,
    ) -> Result<(), MigrationError> {
        let (old_name, new_name) = match sub {
            Some(s) => (s.old_name, s.new_name),
            None => (mapping.old_field().full_name(), mapping.new_field().full_name()),
        };
        let storage = ctx.storage;
        let storage_type = storage.storage_type().to_string();
        let parent = sub.map(|s| FieldRef::of(s.parent));
        let mut subject = match sub {
            Some(s) => FieldRef {
                key: String::new(),
                name: s.old_name.to_string(),
                field_type: String::new(),
            },
            None => FieldRef::of(mapping.old_field()),
        };

        if sub.is_some() || mapping.has_changed() {
            let expected = Value::String(mapping.old_field().key().to_string());
            let match_value = if sub.is_some() { None } else { Some(&expected) };
            if let Some(existing) = storage.read(ctx.scope, old_name, true, match_value)? {
                let old_ref = match &existing {
                    Value::String(key) => key.clone(),
                    other => other.to_string(),
                };
                let new_ref = match sub {
                    Some(_) => ctx.key_map.get(&old_ref).cloned().unwrap_or_else(|| old_ref.clone()),
                    None => mapping.new_field().key().to_string(),
                };
                if sub.is_some() {
                    subject.field_type = ctx
                        .old_fields
                        .get(&old_ref)
                        .map(|f| f.field_type().to_string())
                        .unwrap_or_default();
                    subject.key = old_ref.clone();
                }
                if old_name != new_name || old_ref != new_ref {
                    let new_key = Value::String(new_ref.clone());
                    let affected =
                        storage.update(ctx.scope, old_name, new_name, ValueUpdate::Set(&new_key), true)?;
                    if old_name != new_name {
                        storage.delete(ctx.scope, old_name, true)?;
                    }
                    events.rows_affected(&storage_type, affected);
                    if old_ref != new_ref {
                        events.field_change(FieldChangeEvent {
                            field: subject.clone(),
                            parent: parent.clone(),
                            property: ChangeProperty::Key,
                            old_value: Value::String(old_ref),
                            new_value: new_key,
                            storage_type: storage_type.clone(),
                            affected_rows: affected,
                        });
                    }
                }
            }
        }

        let sub_key = sub.and(Some(subject.key.as_str())).filter(|k| !k.is_empty());
        let transformer = self.transformer_for(ctx, old_name, new_name, sub_key);
        if old_name == new_name && transformer.is_none() {
            return Ok(());
        }
        let Some(old_value) = storage.read(ctx.scope, old_name, false, None)? else {
            return Ok(());
        };
        let update = match transformer {
            Some(transform) => ValueUpdate::Transform(transform.as_ref()),
            None => ValueUpdate::Keep,
        };
        let new_value = update.apply(&old_value);
        let affected = storage.update(ctx.scope, old_name, new_name, update, false)?;
        if old_name != new_name {
            storage.delete(ctx.scope, old_name, false)?;
        }
        events.rows_affected(&storage_type, affected);

        if old_name != new_name {
            events.field_change(FieldChangeEvent {
                field: subject.clone(),
                parent: parent.clone(),
                property: ChangeProperty::Name,
                old_value: Value::String(old_name.to_string()),
                new_value: Value::String(new_name.to_string()),
                storage_type: storage_type.clone(),
                affected_rows: affected,
            });
        }
        if transformer.is_some() {
            events.field_change(FieldChangeEvent {
                field: subject,
                parent,
                property: ChangeProperty::Value,
                old_value,
                new_value,
                storage_type,
                affected_rows: affected,
            });
        }
        Ok(())
    }

    /// Transformer registered for the old storage name, else the new one.
    /// Rows of repeating fields also match on the full names of the
    /// definition their key reference points at.
    fn transformer_for<'t>(
        &self,
        ctx: &FieldContext<'t>,
        old_name: &str,
        new_name: &str,
        sub_key: Option<&str>,
    ) -> Option<&'t ValueTransformer> {
        let direct = ctx
            .transformers
            .get(old_name)
            .or_else(|| ctx.transformers.get(new_name));
        let Some(old_key) = sub_key.filter(|_| direct.is_none()) else {
            return direct;
        };
        let old_full = ctx.old_fields.get(old_key).map(Field::full_name);
        let new_full = ctx
            .key_map
            .get(old_key)
            .and_then(|new_key| ctx.new_fields.get(new_key))
            .map(Field::full_name);
        old_full
            .and_then(|name| ctx.transformers.get(name))
            .or_else(|| new_full.and_then(|name| ctx.transformers.get(name)))
    }
}
