//! Field data embedded as block attributes inside post content.
//!
//! Blocks are serialized as HTML comments:
//!
//! ```text
//! <!-- wp:acf/hero {"name":"acf/hero","data":{"title":"Hi","_title":"field_abc"}} /-->
//! ```
//!
//! The `data` object uses the same flat naming convention as the meta
//! tables, so key references and indexed repeater rows can be rewritten in
//! place. Nothing here is key/value shaped: the per-field operations are
//! no-ops and all work happens in [`StorageLocation::rewrite_embedded`].

use std::collections::HashMap;

use regex::Regex;
use rusqlite::params;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::database::{validate_identifier, StorageScope};
use crate::error::StorageError;
use crate::record::FoundField;
use crate::traits::{EmbeddedRewrite, FieldPattern, StorageLocation, ValueUpdate, KEY_REF_PREFIX};

/// Nesting depth after which embedded structures are left untouched.
pub const DEFAULT_MAX_DEPTH: usize = 10;

const BLOCK_COMMENT: &str = r"(?s)<!--\s+wp:(acf/[a-z0-9_-]+)\s+(\{.*?\})\s+(/?)-->";

#[derive(Debug, Clone)]
pub struct BlocksStorage {
    max_depth: usize,
}

impl Default for BlocksStorage {
    fn default() -> Self {
        BlocksStorage {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

struct Rules<'r> {
    rewrite: &'r EmbeddedRewrite,
    prefixes: Vec<(Regex, &'r str, &'r str)>,
}

impl<'r> Rules<'r> {
    fn new(rewrite: &'r EmbeddedRewrite) -> Result<Self, StorageError> {
        let sep = regex::escape(&rewrite.separator);
        let mut prefixes = Vec::with_capacity(rewrite.prefix_renames.len());
        for (old, new) in &rewrite.prefix_renames {
            let re = Regex::new(&format!(r"^{}{sep}\d+(?:{sep}.*)?$", regex::escape(old)))
                .map_err(|e| StorageError::Backend(format!("invalid rename pattern: {e}")))?;
            prefixes.push((re, old.as_str(), new.as_str()));
        }
        Ok(Rules { rewrite, prefixes })
    }
}

impl BlocksStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        BlocksStorage { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Create a post holding `content`. Returns the post id.
    pub fn insert_post(
        &self,
        scope: &StorageScope<'_>,
        title: &str,
        content: &str,
    ) -> Result<i64, StorageError> {
        let table = posts_table(scope)?;
        scope.conn().execute(
            &format!("INSERT INTO {table} (post_title, post_content) VALUES (?1, ?2)"),
            params![title, content],
        )?;
        Ok(scope.conn().last_insert_rowid())
    }

    pub fn post_content(&self, scope: &StorageScope<'_>, post_id: i64) -> Result<String, StorageError> {
        let table = posts_table(scope)?;
        Ok(scope.conn().query_row(
            &format!("SELECT post_content FROM {table} WHERE ID = ?1"),
            params![post_id],
            |row| row.get(0),
        )?)
    }

    /// Rewrite every field block in `content`. Returns the new content and
    /// the number of blocks that changed; unchanged blocks stay byte-identical.
    pub fn rewrite_content(
        &self,
        content: &str,
        rewrite: &EmbeddedRewrite,
    ) -> Result<(String, usize), StorageError> {
        let rules = Rules::new(rewrite)?;
        let block = Regex::new(BLOCK_COMMENT)
            .map_err(|e| StorageError::Backend(format!("invalid block pattern: {e}")))?;

        let mut out = String::with_capacity(content.len());
        let mut last = 0;
        let mut changed = 0;
        for caps in block.captures_iter(content) {
            let (Some(whole), Some(name), Some(attrs)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                continue;
            };
            let Some(rewritten) = self.rewrite_attributes(attrs.as_str(), &rules) else {
                continue;
            };
            out.push_str(&content[last..whole.start()]);
            let closer = if caps.get(3).is_some_and(|m| !m.as_str().is_empty()) {
                "/-->"
            } else {
                "-->"
            };
            out.push_str(&format!("<!-- wp:{} {} {}", name.as_str(), rewritten, closer));
            last = whole.end();
            changed += 1;
        }
        out.push_str(&content[last..]);
        Ok((out, changed))
    }

    fn rewrite_attributes(&self, json: &str, rules: &Rules<'_>) -> Option<String> {
        let mut attrs: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "skipping block with unparsable attributes");
                return None;
            }
        };
        let Some(Value::Object(data)) = attrs.get_mut("data") else {
            return None;
        };
        if !self.rewrite_data(data, rules, 1) {
            return None;
        }
        serde_json::to_string(&attrs).ok().map(|s| escape_block_attributes(&s))
    }

    fn rewrite_data(&self, map: &mut Map<String, Value>, rules: &Rules<'_>, depth: usize) -> bool {
        if depth > self.max_depth {
            warn!(depth, "block data nested too deeply, not rewritten");
            return false;
        }
        let mut changed = false;
        let mut renames: HashMap<String, String> = HashMap::new();

        for (entry, value) in map.iter_mut() {
            let Some(actual) = entry.strip_prefix(KEY_REF_PREFIX) else {
                continue;
            };
            let Some(target) = value.as_str().and_then(|key| rules.rewrite.keys.get(key)) else {
                continue;
            };
            if value.as_str() != Some(target.new_key.as_str()) {
                *value = Value::String(target.new_key.clone());
                changed = true;
            }
            if actual == target.old_name && target.new_name != target.old_name {
                renames.insert(actual.to_string(), target.new_name.clone());
                renames.insert(entry.clone(), format!("{KEY_REF_PREFIX}{}", target.new_name));
            }
        }

        for entry in map.keys() {
            if renames.contains_key(entry) {
                continue;
            }
            let (marker, rest) = match entry.strip_prefix(KEY_REF_PREFIX) {
                Some(rest) => (KEY_REF_PREFIX, rest),
                None => ("", entry.as_str()),
            };
            if let Some((_, old, new)) = rules.prefixes.iter().find(|(re, _, _)| re.is_match(rest)) {
                renames.insert(entry.clone(), format!("{marker}{new}{}", &rest[old.len()..]));
            }
        }

        if !renames.is_empty() {
            changed = true;
            let previous = std::mem::take(map);
            for (entry, value) in previous {
                let entry = renames.remove(&entry).unwrap_or(entry);
                map.insert(entry, value);
            }
        }

        for value in map.values_mut() {
            match value {
                Value::Object(inner) => changed |= self.rewrite_data(inner, rules, depth + 1),
                Value::Array(items) => {
                    for item in items {
                        if let Value::Object(inner) = item {
                            changed |= self.rewrite_data(inner, rules, depth + 1);
                        }
                    }
                }
                _ => {}
            }
        }
        changed
    }
}

fn posts_table(scope: &StorageScope<'_>) -> Result<String, StorageError> {
    let table = scope.site().table("posts");
    validate_identifier(&table)?;
    Ok(table)
}

/// Escape sequences that would end or confuse the surrounding HTML comment.
fn escape_block_attributes(json: &str) -> String {
    json.replace("--", "\\u002d\\u002d")
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

impl StorageLocation for BlocksStorage {
    fn storage_type(&self) -> &str {
        "blocks"
    }

    fn read(
        &self,
        _scope: &StorageScope<'_>,
        _name: &str,
        _is_key_ref: bool,
        _match_value: Option<&Value>,
    ) -> Result<Option<Value>, StorageError> {
        Ok(None)
    }

    fn update(
        &self,
        _scope: &StorageScope<'_>,
        _old_name: &str,
        _new_name: &str,
        _update: ValueUpdate<'_>,
        _is_key_ref: bool,
    ) -> Result<usize, StorageError> {
        Ok(0)
    }

    fn delete(
        &self,
        _scope: &StorageScope<'_>,
        _name: &str,
        _is_key_ref: bool,
    ) -> Result<usize, StorageError> {
        Ok(0)
    }

    fn find_fields(
        &self,
        _scope: &StorageScope<'_>,
        _pattern: &FieldPattern,
    ) -> Result<Vec<FoundField>, StorageError> {
        Ok(Vec::new())
    }

    fn rewrite_embedded(
        &self,
        scope: &StorageScope<'_>,
        rewrite: &EmbeddedRewrite,
    ) -> Result<usize, StorageError> {
        if rewrite.is_empty() {
            return Ok(0);
        }
        let table = posts_table(scope)?;
        let conn = scope.conn();
        let posts = {
            let mut stmt = conn.prepare(&format!(
                "SELECT ID, post_content FROM {table} WHERE post_content LIKE '%<!-- wp:acf/%' ORDER BY ID"
            ))?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut total = 0;
        for (id, content) in posts {
            let (updated, changed) = self.rewrite_content(&content, rewrite)?;
            if changed == 0 {
                continue;
            }
            total += changed;
            if !scope.is_dry_run() {
                conn.execute(
                    &format!("UPDATE {table} SET post_content = ?1 WHERE ID = ?2"),
                    params![updated, id],
                )?;
            }
            debug!(post_id = id, blocks = changed, "rewrote embedded field blocks");
        }
        Ok(total)
    }
}
