//! Reconciles an old field tree with a new one.
//!
//! Both trees are flattened into `key → Field` maps (preserving definition
//! order), then paired in three passes. Each pass removes the fields it
//! pairs from consideration by the later ones:
//!
//! 1. identical full names;
//! 2. explicit renames, looked up by full name, then by bare name;
//! 3. path similarity between fields sharing a leaf name (or the leaf's
//!    declared rename), scored by matching path segments from the end.
//!
//! Old fields left over have no counterpart and are not migrated.

use std::collections::BTreeMap;

use fieldmig_storage::{EmbeddedRewrite, KeyTarget};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ResolveError;
use crate::field::{Field, FieldMapping, Layout, DEFAULT_FIELD_TYPE};
use crate::migration::Migration;
use crate::resolver::{FieldResolvers, ResolveContext};

/// Flattened field map in definition order (parents before children).
pub type FieldMap = IndexMap<String, Field>;

/// Snapshot of one resolved migration. Recomputed on every run.
#[derive(Debug)]
pub struct ResolvedMigration<'m> {
    migration: &'m Migration,
    old_fields: FieldMap,
    new_fields: FieldMap,
    field_mappings: Vec<FieldMapping>,
}

impl<'m> ResolvedMigration<'m> {
    pub fn migration(&self) -> &'m Migration {
        self.migration
    }

    pub fn old_fields(&self) -> &FieldMap {
        &self.old_fields
    }

    pub fn new_fields(&self) -> &FieldMap {
        &self.new_fields
    }

    pub fn field_mappings(&self) -> &[FieldMapping] {
        &self.field_mappings
    }

    /// Old definition key → new definition key for every mapped field.
    pub fn key_map(&self) -> BTreeMap<String, String> {
        self.field_mappings
            .iter()
            .map(|m| (m.old_field().key().to_string(), m.new_field().key().to_string()))
            .collect()
    }

    /// Rewrite instructions for backends that embed field data in documents.
    pub fn embedded_rewrite(&self, separator: &str) -> EmbeddedRewrite {
        let mut rewrite = EmbeddedRewrite {
            separator: separator.to_string(),
            ..Default::default()
        };
        for mapping in self.field_mappings.iter().filter(|m| m.has_changed()) {
            let (old, new) = (mapping.old_field(), mapping.new_field());
            rewrite.keys.insert(
                old.key().to_string(),
                KeyTarget {
                    old_name: old.full_name().to_string(),
                    new_key: new.key().to_string(),
                    new_name: new.full_name().to_string(),
                },
            );
            if old.has_children() && mapping.has_name_changed() {
                rewrite
                    .prefix_renames
                    .push((old.full_name().to_string(), new.full_name().to_string()));
            }
        }
        rewrite
    }
}

pub struct MappingsResolver {
    resolvers: FieldResolvers,
    separator: String,
}

impl MappingsResolver {
    pub fn new(resolvers: FieldResolvers, separator: impl Into<String>) -> Self {
        MappingsResolver {
            resolvers,
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn resolvers_mut(&mut self) -> &mut FieldResolvers {
        &mut self.resolvers
    }

    pub fn resolve<'m>(&self, migration: &'m Migration) -> Result<ResolvedMigration<'m>, ResolveError> {
        let empty = Value::Array(Vec::new());
        let old_fields = self.flatten(migration.old_fields().unwrap_or(&empty))?;
        let new_fields = self.flatten(migration.new_fields().unwrap_or(&empty))?;
        let field_mappings = self.match_fields(&old_fields, &new_fields, migration.name_changes());
        debug!(
            migration = migration.name(),
            old = old_fields.len(),
            new = new_fields.len(),
            mappings = field_mappings.len(),
            "resolved field mappings"
        );
        Ok(ResolvedMigration {
            migration,
            old_fields,
            new_fields,
            field_mappings,
        })
    }

    /// Flatten one field tree with a fresh key-allocation context.
    pub fn flatten(&self, fields: &Value) -> Result<FieldMap, ResolveError> {
        let mut ctx = ResolveContext::new();
        let mut out = FieldMap::new();
        self.flatten_collection(fields, None, &mut ctx, &mut out)?;
        Ok(out)
    }

    fn flatten_collection(
        &self,
        input: &Value,
        parent_full_name: Option<&str>,
        ctx: &mut ResolveContext,
        out: &mut FieldMap,
    ) -> Result<Vec<Field>, ResolveError> {
        let mut fields = Vec::new();
        for member in self.resolvers.resolve_collection(input)? {
            let canonical = self.resolvers.resolve_field(&member, ctx)?;
            fields.push(self.build_field(canonical, parent_full_name, ctx, out)?);
        }
        Ok(fields)
    }

    fn build_field(
        &self,
        canonical: Map<String, Value>,
        parent_full_name: Option<&str>,
        ctx: &mut ResolveContext,
        out: &mut FieldMap,
    ) -> Result<Field, ResolveError> {
        let key = non_empty_str(&canonical, "key").ok_or(ResolveError::MissingIdentity("key"))?;
        let name = non_empty_str(&canonical, "name").ok_or(ResolveError::MissingIdentity("name"))?;
        let field_type = non_empty_str(&canonical, "type").unwrap_or_else(|| DEFAULT_FIELD_TYPE.to_string());
        let full_name = match parent_full_name {
            Some(parent) => format!("{parent}{}{name}", self.separator),
            None => name.clone(),
        };
        ctx.claim(&key)?;

        // Reserve the parent's slot so it precedes its children.
        out.insert(key.clone(), Field::new(&key, &name, &full_name, &field_type));

        ctx.push_parent(&key);
        let children = self.build_children(&canonical, &key, &full_name, ctx, out);
        ctx.pop_parent();
        let (sub_fields, layouts) = children?;

        let field = Field::new(key.clone(), name, full_name, field_type)
            .with_sub_fields(sub_fields)
            .with_layouts(layouts)
            .with_raw(canonical);
        out.insert(key, field.clone());
        Ok(field)
    }

    fn build_children(
        &self,
        canonical: &Map<String, Value>,
        key: &str,
        full_name: &str,
        ctx: &mut ResolveContext,
        out: &mut FieldMap,
    ) -> Result<(Vec<Field>, Vec<Layout>), ResolveError> {
        let sub_fields = match canonical.get("sub_fields") {
            None | Some(Value::Null) => Vec::new(),
            Some(sub) => self.flatten_collection(sub, Some(full_name), ctx, out)?,
        };

        let raw_layouts: Vec<&Value> = match canonical.get("layouts") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(Value::Object(map)) => map.values().collect(),
            _ => Vec::new(),
        };
        let mut layouts = Vec::with_capacity(raw_layouts.len());
        for raw in raw_layouts {
            let name = raw
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ResolveError::InvalidLayout {
                    field: key.to_string(),
                    reason: "layout has no name".to_string(),
                })?;
            let prefix = format!("{full_name}{}{name}", self.separator);
            let layout_key = raw
                .get("key")
                .and_then(Value::as_str)
                .filter(|k| !k.is_empty())
                .map(str::to_string);
            // Each layout derives builder keys in its own namespace.
            let layout_parent = layout_key.clone().unwrap_or_else(|| format!("{key}_{name}"));
            let sub_fields = match raw.get("sub_fields") {
                None | Some(Value::Null) => Vec::new(),
                Some(sub) => {
                    ctx.push_parent(&layout_parent);
                    let flattened = self.flatten_collection(sub, Some(&prefix), ctx, out);
                    ctx.pop_parent();
                    flattened?
                }
            };
            layouts.push(Layout {
                key: layout_key,
                name: name.to_string(),
                sub_fields,
            });
        }
        Ok((sub_fields, layouts))
    }

    /// Pair old fields with new fields.
    pub fn match_fields(
        &self,
        old_fields: &FieldMap,
        new_fields: &FieldMap,
        name_changes: &IndexMap<String, String>,
    ) -> Vec<FieldMapping> {
        let mut old_left: Vec<&Field> = old_fields.values().collect();
        let mut new_left: Vec<&Field> = new_fields.values().collect();
        let mut mappings = Vec::new();

        // Pass 1: identical full names.
        old_left.retain(|old| {
            match new_left.iter().position(|new| new.full_name() == old.full_name()) {
                Some(pos) => {
                    mappings.push(FieldMapping::new((*old).clone(), new_left.remove(pos).clone()));
                    false
                }
                None => true,
            }
        });

        // Pass 2: explicit renames.
        old_left.retain(|old| {
            let by_full_name = name_changes.get(old.full_name()).and_then(|target| {
                new_left.iter().position(|new| new.full_name() == target)
            });
            let pos = by_full_name.or_else(|| {
                let target = name_changes.get(old.name())?;
                self.best_candidate(old, target, &new_left)
            });
            match pos {
                Some(pos) => {
                    mappings.push(FieldMapping::new((*old).clone(), new_left.remove(pos).clone()));
                    false
                }
                None => true,
            }
        });

        // Pass 3: path similarity.
        for old in old_left {
            let leaf = name_changes.get(old.name()).map(String::as_str).unwrap_or(old.name());
            if let Some(pos) = self.best_candidate(old, leaf, &new_left) {
                mappings.push(FieldMapping::new(old.clone(), new_left.remove(pos).clone()));
            } else {
                debug!(field = old.full_name(), "no counterpart, field not migrated");
            }
        }

        mappings
    }

    /// Index of the first highest-scoring new field named `leaf`, scoring
    /// the old path with its leaf replaced by `leaf`.
    fn best_candidate(&self, old: &Field, leaf: &str, candidates: &[&Field]) -> Option<usize> {
        let parent = old
            .full_name()
            .strip_suffix(old.name())
            .unwrap_or_default();
        let old_path = format!("{parent}{leaf}");
        let mut best: Option<(usize, usize)> = None;
        for (pos, new) in candidates.iter().enumerate() {
            if new.name() != leaf {
                continue;
            }
            let score = self.path_similarity(&old_path, new.full_name());
            if score > 0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((pos, score));
            }
        }
        best.map(|(pos, _)| pos)
    }

    /// Number of equal path segments counted from the end.
    pub fn path_similarity(&self, a: &str, b: &str) -> usize {
        let sep = self.separator.as_str();
        a.rsplit(sep)
            .zip(b.rsplit(sep))
            .take_while(|(x, y)| x == y)
            .count()
    }
}

fn non_empty_str(map: &Map<String, Value>, field: &str) -> Option<String> {
    map.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> MappingsResolver {
        MappingsResolver::new(FieldResolvers::new(), "_")
    }

    fn pairs(mappings: &[FieldMapping]) -> Vec<(String, String)> {
        mappings
            .iter()
            .map(|m| (m.old_field().full_name().to_string(), m.new_field().full_name().to_string()))
            .collect()
    }

    // ── Flattening ───────────────────────────────────────────────────────────

    #[test]
    fn flattens_nested_structures_with_full_names() {
        let fields = json!([
            {"key": "field_title", "name": "title"},
            {"key": "field_team", "name": "team", "type": "repeater", "sub_fields": [
                {"key": "field_member", "name": "member"},
                {"key": "field_role", "name": "role"}
            ]},
            {"key": "field_content", "name": "content", "type": "flexible_content", "layouts": [
                {"key": "layout_hero", "name": "hero", "sub_fields": [
                    {"key": "field_heading", "name": "heading"}
                ]}
            ]}
        ]);
        let flat = resolver().flatten(&fields).unwrap();
        let names: Vec<&str> = flat.values().map(Field::full_name).collect();
        assert_eq!(
            names,
            vec!["title", "team", "team_member", "team_role", "content", "content_hero_heading"]
        );
        assert_eq!(flat["field_team"].sub_fields().len(), 2);
        assert_eq!(flat["field_content"].layouts()[0].name, "hero");
        assert_eq!(flat["field_title"].field_type(), "text");
    }

    #[test]
    fn flattens_field_groups_and_builder_fields() {
        let group = json!({"key": "group_company", "title": "Company", "fields": [
            {"label": "Company Name"},
            {"label": "Address", "type": "group", "sub_fields": [{"label": "Street"}]}
        ]});
        let flat = resolver().flatten(&group).unwrap();
        let names: Vec<&str> = flat.values().map(Field::full_name).collect();
        assert_eq!(names, vec!["company_name", "address", "address_street"]);
        assert!(flat.keys().all(|k| k.starts_with("field_")));
    }

    #[test]
    fn duplicate_keys_within_one_tree_fail() {
        let fields = json!([
            {"key": "field_1", "name": "a"},
            {"key": "field_1", "name": "b"}
        ]);
        assert!(matches!(resolver().flatten(&fields), Err(ResolveError::DuplicateKey(_))));
    }

    #[test]
    fn old_and_new_trees_may_share_keys() {
        let migration = Migration::new("m")
            .before(json!([{"key": "field_1", "name": "a"}]))
            .after(json!([{"key": "field_1", "name": "b"}]))
            .rename("a", "b");
        let resolved = resolver().resolve(&migration).unwrap();
        assert_eq!(pairs(resolved.field_mappings()), vec![("a".into(), "b".into())]);
    }

    #[test]
    fn layouts_derive_builder_keys_separately() {
        let fields = json!([{"key": "field_fc", "name": "content", "type": "flexible_content", "layouts": [
            {"name": "hero", "sub_fields": [{"label": "Heading"}]},
            {"name": "cta", "sub_fields": [{"label": "Heading"}]}
        ]}]);
        let flat = resolver().flatten(&fields).unwrap();
        let names: Vec<&str> = flat.values().map(Field::full_name).collect();
        assert_eq!(names, vec!["content", "content_hero_heading", "content_cta_heading"]);
        assert_eq!(flat.len(), 3);

        let again = resolver().flatten(&fields).unwrap();
        assert_eq!(
            flat.keys().collect::<Vec<_>>(),
            again.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn layout_without_name_is_rejected() {
        let fields = json!([{"key": "field_fc", "name": "fc", "layouts": [{"key": "l1"}]}]);
        assert!(matches!(resolver().flatten(&fields), Err(ResolveError::InvalidLayout { .. })));
    }

    // ── Matching ─────────────────────────────────────────────────────────────

    #[test]
    fn exact_full_name_match_wins_over_rename() {
        let migration = Migration::new("m")
            .before(json!([{"key": "field_a", "name": "a"}]))
            .after(json!([{"key": "field_a2", "name": "a"}, {"key": "field_b", "name": "b"}]))
            .rename("a", "b");
        let resolved = resolver().resolve(&migration).unwrap();
        assert_eq!(pairs(resolved.field_mappings()), vec![("a".into(), "a".into())]);
    }

    #[test]
    fn explicit_rename_by_full_name_then_bare_name() {
        let migration = Migration::new("m")
            .before(json!([
                {"key": "field_t", "name": "title"},
                {"key": "field_g", "name": "group", "sub_fields": [{"key": "field_s", "name": "street"}]}
            ]))
            .after(json!([
                {"key": "field_t", "name": "headline"},
                {"key": "field_g", "name": "group", "sub_fields": [{"key": "field_s", "name": "road"}]}
            ]))
            .rename("title", "headline")
            .rename("group_street", "group_road");
        let resolved = resolver().resolve(&migration).unwrap();
        let mut got = pairs(resolved.field_mappings());
        got.sort();
        assert_eq!(
            got,
            vec![
                ("group".into(), "group".into()),
                ("group_street".into(), "group_road".into()),
                ("title".into(), "headline".into()),
            ]
        );
    }

    #[test]
    fn moved_fields_match_by_path_similarity() {
        let migration = Migration::new("m")
            .before(json!([
                {"key": "field_team", "name": "team", "type": "repeater", "sub_fields": [
                    {"key": "field_member", "name": "member"}
                ]}
            ]))
            .after(json!([
                {"key": "field_staff", "name": "staff", "type": "repeater", "sub_fields": [
                    {"key": "field_member", "name": "member"}
                ]}
            ]))
            .rename("team", "staff");
        let resolved = resolver().resolve(&migration).unwrap();
        assert_eq!(
            pairs(resolved.field_mappings()),
            vec![("team".into(), "staff".into()), ("team_member".into(), "staff_member".into())]
        );
    }

    #[test]
    fn fuzzy_prefers_longest_common_suffix_then_first() {
        let migration = Migration::new("m")
            .before(json!([
                {"key": "o1", "name": "a", "sub_fields": [
                    {"key": "o2", "name": "b", "sub_fields": [{"key": "o3", "name": "c"}]}
                ]}
            ]))
            .after(json!([
                {"key": "n1", "name": "x", "sub_fields": [{"key": "n2", "name": "c"}]},
                {"key": "n3", "name": "y", "sub_fields": [
                    {"key": "n4", "name": "b", "sub_fields": [{"key": "n5", "name": "c"}]}
                ]}
            ]));
        let resolved = resolver().resolve(&migration).unwrap();
        let mapping = resolved
            .field_mappings()
            .iter()
            .find(|m| m.old_field().key() == "o3")
            .unwrap();
        assert_eq!(mapping.new_field().full_name(), "y_b_c");
    }

    #[test]
    fn fuzzy_tie_goes_to_first_new_field() {
        let resolver = resolver();
        let old: FieldMap = resolver
            .flatten(&json!([{"key": "o", "name": "g", "sub_fields": [{"key": "o1", "name": "v"}]}]))
            .unwrap();
        let new: FieldMap = resolver
            .flatten(&json!([
                {"key": "p", "name": "h", "sub_fields": [{"key": "p1", "name": "v"}]},
                {"key": "q", "name": "k", "sub_fields": [{"key": "q1", "name": "v"}]}
            ]))
            .unwrap();
        let mappings = resolver.match_fields(&old, &new, &IndexMap::new());
        assert_eq!(pairs(&mappings), vec![("g_v".into(), "h_v".into())]);
    }

    #[test]
    fn unmatched_fields_are_dropped() {
        let migration = Migration::new("m")
            .before(json!([{"key": "field_a", "name": "a"}, {"key": "field_gone", "name": "gone"}]))
            .after(json!([{"key": "field_a", "name": "a"}]));
        let resolved = resolver().resolve(&migration).unwrap();
        assert_eq!(pairs(resolved.field_mappings()), vec![("a".into(), "a".into())]);
    }

    #[test]
    fn similarity_counts_from_the_end() {
        let r = resolver();
        assert_eq!(r.path_similarity("team_member", "staff_member"), 1);
        assert_eq!(r.path_similarity("a_b_c", "x_b_c"), 2);
        assert_eq!(r.path_similarity("a_b", "a_c"), 0);

        let wide = MappingsResolver::new(FieldResolvers::new(), "__");
        assert_eq!(wide.path_similarity("team__first_name", "staff__first_name"), 1);
        assert_eq!(wide.path_similarity("a__b__c", "x__b__c"), 2);
    }

    #[test]
    fn key_map_and_embedded_rewrite() {
        let migration = Migration::new("m")
            .before(json!([
                {"key": "field_title", "name": "title"},
                {"key": "field_team", "name": "team", "type": "repeater", "sub_fields": [
                    {"key": "field_member", "name": "member"}
                ]}
            ]))
            .after(json!([
                {"key": "field_title", "name": "title"},
                {"key": "field_staff", "name": "staff", "type": "repeater", "sub_fields": [
                    {"key": "field_member", "name": "member"}
                ]}
            ]))
            .rename("team", "staff");
        let resolved = resolver().resolve(&migration).unwrap();
        assert_eq!(resolved.key_map()["field_team"], "field_staff");

        let rewrite = resolved.embedded_rewrite("_");
        assert!(!rewrite.keys.contains_key("field_title"));
        assert_eq!(rewrite.keys["field_team"].new_name, "staff");
        assert_eq!(rewrite.prefix_renames, vec![("team".to_string(), "staff".to_string())]);
    }
}
