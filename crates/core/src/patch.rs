//! Patch - Partial updates applied to stored documents
//!
//! A patch is an ordered list of field operations. `AddToSet` appends a
//! value to an array field only when it is absent; `Pull` removes every
//! occurrence. These two carry the id bookkeeping of array-linked
//! associations.

use serde_json::Value;

use crate::document::AttributeMap;

/// Single field operation
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Set a field to a value, creating it when absent
    Set(String, Value),
    /// Remove a field entirely
    Unset(String),
    /// Remove every occurrence of a value from an array field
    Pull(String, Value),
    /// Append a value to an array field unless already present
    AddToSet(String, Value),
}

/// Ordered list of field operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set operation
    pub fn set<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.ops.push(PatchOp::Set(field.to_string(), value.into()));
        self
    }

    /// Add an unset operation
    pub fn unset(mut self, field: &str) -> Self {
        self.ops.push(PatchOp::Unset(field.to_string()));
        self
    }

    /// Add a pull operation
    pub fn pull<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.ops.push(PatchOp::Pull(field.to_string(), value.into()));
        self
    }

    /// Add an add-to-set operation
    pub fn add_to_set<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.ops
            .push(PatchOp::AddToSet(field.to_string(), value.into()));
        self
    }

    /// Check whether the patch carries any operation
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations in insertion order
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// Apply every operation to an attribute map, in order
    pub fn apply(&self, attrs: &mut AttributeMap) {
        for op in &self.ops {
            match op {
                PatchOp::Set(field, value) => {
                    attrs.insert(field.clone(), value.clone());
                }
                PatchOp::Unset(field) => {
                    attrs.remove(field);
                }
                PatchOp::Pull(field, value) => {
                    if let Some(Value::Array(items)) = attrs.get_mut(field) {
                        items.retain(|item| item != value);
                    }
                }
                PatchOp::AddToSet(field, value) => {
                    let entry = attrs
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(items) = entry {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
            }
        }
    }
}
