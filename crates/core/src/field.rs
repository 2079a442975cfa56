//! Resolved field metadata and old→new field pairings.

use serde::Serialize;
use serde_json::{Map, Value};

/// Field type used when a definition does not name one.
pub const DEFAULT_FIELD_TYPE: &str = "text";

/// One field of a flattened field tree.
///
/// `full_name` is the storage name: ancestor names joined with the
/// configured separator. It is unique within one tree; `name` is not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    key: String,
    name: String,
    full_name: String,
    #[serde(rename = "type")]
    field_type: String,
    sub_fields: Vec<Field>,
    layouts: Vec<Layout>,
    #[serde(skip)]
    raw: Map<String, Value>,
}

/// A named variant of a flexible-content field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub key: Option<String>,
    pub name: String,
    pub sub_fields: Vec<Field>,
}

impl Field {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        full_name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Field {
            key: key.into(),
            name: name.into(),
            full_name: full_name.into(),
            field_type: field_type.into(),
            sub_fields: Vec::new(),
            layouts: Vec::new(),
            raw: Map::new(),
        }
    }

    pub fn with_raw(mut self, raw: Map<String, Value>) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_sub_fields(mut self, sub_fields: Vec<Field>) -> Self {
        self.sub_fields = sub_fields;
        self
    }

    pub fn with_layouts(mut self, layouts: Vec<Layout>) -> Self {
        self.layouts = layouts;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn field_type(&self) -> &str {
        &self.field_type
    }

    pub fn sub_fields(&self) -> &[Field] {
        &self.sub_fields
    }

    pub fn layouts(&self) -> &[Layout] {
        &self.layouts
    }

    /// The canonical definition this field was built from.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Whether the field materializes as indexed rows in storage.
    pub fn has_children(&self) -> bool {
        !self.sub_fields.is_empty() || self.layouts.iter().any(|l| !l.sub_fields.is_empty())
    }

    /// Direct sub-fields, including those of every layout.
    pub fn children(&self) -> impl Iterator<Item = &Field> {
        self.sub_fields
            .iter()
            .chain(self.layouts.iter().flat_map(|l| l.sub_fields.iter()))
    }

    pub fn child_keys(&self) -> impl Iterator<Item = &str> {
        self.children().map(|f| f.key.as_str())
    }
}

/// A claim that data stored for `old` belongs to `new` after migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMapping {
    old: Field,
    new: Field,
}

impl FieldMapping {
    pub fn new(old: Field, new: Field) -> Self {
        FieldMapping { old, new }
    }

    pub fn old_field(&self) -> &Field {
        &self.old
    }

    pub fn new_field(&self) -> &Field {
        &self.new
    }

    /// Type of the data as it is currently stored.
    pub fn field_type(&self) -> &str {
        self.old.field_type()
    }

    pub fn has_key_changed(&self) -> bool {
        self.old.key != self.new.key
    }

    pub fn has_name_changed(&self) -> bool {
        self.old.full_name != self.new.full_name
    }

    pub fn has_changed(&self) -> bool {
        self.has_key_changed() || self.has_name_changed()
    }

    /// Rebase an indexed storage name (`team_0_member`) from the old
    /// field's full name onto the new one (`staff_0_member`). Names outside
    /// the old field's namespace come back unchanged.
    pub fn convert_sub_field_name(&self, name: &str, separator: &str) -> String {
        let prefix = format!("{}{}", self.old.full_name, separator);
        match name.strip_prefix(&prefix) {
            Some(rest) => format!("{}{}{}", self.new.full_name, separator, rest),
            None => name.to_string(),
        }
    }
}
