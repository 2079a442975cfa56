//! Normalization of raw field definitions.
//!
//! Raw definitions come in several shapes (canonical maps, builder-style
//! objects, field-group wrappers). Two ordered registries turn them into
//! canonical form: collection resolvers unwrap a container into its member
//! definitions, type resolvers normalize a single definition into a map with
//! at least `key`, `name` and `type`. The first resolver whose `supports`
//! accepts an input wins; user-registered resolvers are consulted before the
//! built-in ones.

mod defaults;

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{ResolveError, ResolveStage};

pub use defaults::{
    derive_field_key, snake_case, BuilderFieldResolver, DefaultFieldCollectionResolver,
    DefaultFieldResolver, FieldGroupResolver,
};

/// Unwraps a container of field definitions.
pub trait CollectionResolver {
    fn supports(&self, input: &Value) -> bool;
    fn resolve(&self, input: &Value) -> Result<Vec<Value>, ResolveError>;
}

/// Normalizes one field definition into canonical map form.
pub trait FieldTypeResolver {
    fn supports(&self, input: &Value) -> bool;
    fn resolve(
        &self,
        input: &Value,
        ctx: &mut ResolveContext,
    ) -> Result<Map<String, Value>, ResolveError>;
}

/// Key-allocation context for resolving one field tree.
///
/// A fresh context is used for every tree, so the old and the new structure
/// of a migration may reuse the same keys while one tree may not.
#[derive(Debug, Default)]
pub struct ResolveContext {
    claimed: HashSet<String>,
    parents: Vec<String>,
}

impl ResolveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of the field whose sub-fields are being resolved.
    pub fn parent_key(&self) -> Option<&str> {
        self.parents.last().map(String::as_str)
    }

    pub fn push_parent(&mut self, key: &str) {
        self.parents.push(key.to_string());
    }

    pub fn pop_parent(&mut self) {
        self.parents.pop();
    }

    /// Record `key` as used in this tree.
    pub fn claim(&mut self, key: &str) -> Result<(), ResolveError> {
        if self.claimed.insert(key.to_string()) {
            Ok(())
        } else {
            Err(ResolveError::DuplicateKey(key.to_string()))
        }
    }

    pub fn is_claimed(&self, key: &str) -> bool {
        self.claimed.contains(key)
    }
}

/// The two resolver registries.
pub struct FieldResolvers {
    user_collections: Vec<Box<dyn CollectionResolver>>,
    user_types: Vec<Box<dyn FieldTypeResolver>>,
    default_collections: Vec<Box<dyn CollectionResolver>>,
    default_types: Vec<Box<dyn FieldTypeResolver>>,
}

impl Default for FieldResolvers {
    fn default() -> Self {
        FieldResolvers {
            user_collections: Vec::new(),
            user_types: Vec::new(),
            default_collections: vec![
                Box::new(FieldGroupResolver),
                Box::new(DefaultFieldCollectionResolver),
            ],
            default_types: vec![Box::new(DefaultFieldResolver), Box::new(BuilderFieldResolver)],
        }
    }
}

impl FieldResolvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registries without the built-in resolvers.
    pub fn empty() -> Self {
        FieldResolvers {
            user_collections: Vec::new(),
            user_types: Vec::new(),
            default_collections: Vec::new(),
            default_types: Vec::new(),
        }
    }

    /// Register a collection resolver ahead of the built-in ones.
    pub fn register_collection_resolver(&mut self, resolver: impl CollectionResolver + 'static) {
        self.user_collections.push(Box::new(resolver));
    }

    /// Register a type resolver ahead of the built-in ones.
    pub fn register_type_resolver(&mut self, resolver: impl FieldTypeResolver + 'static) {
        self.user_types.push(Box::new(resolver));
    }

    pub fn resolve_collection(&self, input: &Value) -> Result<Vec<Value>, ResolveError> {
        let resolver = self
            .user_collections
            .iter()
            .chain(self.default_collections.iter())
            .find(|r| r.supports(input))
            .ok_or_else(|| ResolveError::Unresolvable {
                stage: ResolveStage::Collection,
                input_type: value_kind(input),
            })?;
        resolver.resolve(input)
    }

    pub fn resolve_field(
        &self,
        input: &Value,
        ctx: &mut ResolveContext,
    ) -> Result<Map<String, Value>, ResolveError> {
        let resolver = self
            .user_types
            .iter()
            .chain(self.default_types.iter())
            .find(|r| r.supports(input))
            .ok_or_else(|| ResolveError::Unresolvable {
                stage: ResolveStage::Field,
                input_type: value_kind(input),
            })?;
        resolver.resolve(input, ctx)
    }
}

/// Textual type of a raw value, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
