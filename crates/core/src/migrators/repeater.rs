use fieldmig_storage::FieldPattern;
use tracing::debug;

use super::{DefaultFieldMigrator, FieldContext, FieldMigrator, SubFieldRename};
use crate::error::MigrationError;
use crate::events::EventDispatcher;
use crate::field::FieldMapping;

/// Handles repeating and flexible-content fields.
///
/// The parent is migrated like any other field. When its mapping changed,
/// or a direct child was re-keyed or renamed, every materialized row stored as
/// `{base}{sep}{index}` or `{base}{sep}{index}{sep}{leaf}` is carried over
/// to the new base name.
pub struct RepeaterFieldMigrator {
    inner: DefaultFieldMigrator,
}

impl RepeaterFieldMigrator {
    pub fn new() -> Self {
        RepeaterFieldMigrator {
            inner: DefaultFieldMigrator,
        }
    }

    /// Cascade when the parent moved, or a direct child was re-keyed or
    /// renamed.
    fn needs_cascade(mapping: &FieldMapping, ctx: &FieldContext<'_>) -> bool {
        mapping.has_changed()
            || mapping.old_field().children().any(|child| {
                ctx.key_map.get(child.key()).is_some_and(|new_key| {
                    new_key != child.key()
                        || ctx
                            .new_fields
                            .get(new_key)
                            .is_some_and(|new| new.name() != child.name())
                })
            })
    }

    /// Storage name of `row` after migration: the parent prefix is rebased
    /// and the leaf follows its child mapping (`team_0_member` becomes
    /// `staff_0_person`). Deeper segments are kept as they are.
    fn row_name(mapping: &FieldMapping, row: &str, ctx: &FieldContext<'_>) -> String {
        let sep = ctx.separator;
        let rebased = mapping.convert_sub_field_name(row, sep);
        let prefix = format!("{}{}", mapping.old_field().full_name(), sep);
        let Some((index, tail)) = row.strip_prefix(&prefix).and_then(|rest| rest.split_once(sep)) else {
            return rebased;
        };
        let child = mapping
            .old_field()
            .children()
            .filter(|child| {
                tail == child.name()
                    || tail
                        .strip_prefix(child.name())
                        .is_some_and(|after| after.starts_with(sep))
            })
            .max_by_key(|child| child.name().len());
        let new_leaf = child.and_then(|child| {
            let new_key = ctx.key_map.get(child.key())?;
            ctx.new_fields.get(new_key).map(|new| (child.name(), new.name()))
        });
        match new_leaf {
            Some((old_leaf, new_leaf)) => format!(
                "{}{sep}{index}{sep}{new_leaf}{}",
                mapping.new_field().full_name(),
                &tail[old_leaf.len()..]
            ),
            None => rebased,
        }
    }
}

impl Default for RepeaterFieldMigrator {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMigrator for RepeaterFieldMigrator {
    fn migrate_field(
        &self,
        mapping: &FieldMapping,
        ctx: &FieldContext<'_>,
        events: &mut EventDispatcher<'_>,
    ) -> Result<(), MigrationError> {
        self.inner.migrate_field_data(mapping, ctx, events, None)?;
        if !Self::needs_cascade(mapping, ctx) {
            return Ok(());
        }

        let pattern = FieldPattern::indexed(mapping.old_field().full_name(), ctx.separator)?;
        let rows = ctx.storage.find_fields(ctx.scope, &pattern)?;
        debug!(
            field = %mapping.old_field().full_name(),
            storage = ctx.storage.storage_type(),
            rows = rows.len(),
            "cascading repeater rows"
        );

        for row in rows {
            let new_name = Self::row_name(mapping, &row.name, ctx);
            let sub = SubFieldRename {
                old_name: &row.name,
                new_name: &new_name,
                parent: mapping.old_field(),
            };
            self.inner.migrate_field_data(mapping, ctx, events, Some(sub))?;
        }
        Ok(())
    }
}
