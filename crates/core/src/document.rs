//! Document Trait - Base definition for mapped documents
//!
//! Defines the fundamental Document trait with identity, collection
//! metadata, attribute serialization, and validation, plus the per-instance
//! cache that association proxies store their loaded targets in.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{OdmError, OdmResult};
use crate::inflect;

/// Attribute-map form of a document, as stored and queried
pub type AttributeMap = serde_json::Map<String, Value>;

/// Field name documents keep their identifier under
pub const ID_FIELD: &str = "id";

/// Field name type-tagged documents keep their variant name under
pub const TYPE_FIELD: &str = "_type";

/// Unique document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Attribute-value form of the identifier
    pub fn to_value(&self) -> Value {
        Value::String(self.0.to_string())
    }

    /// Parse an identifier out of an attribute value
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(|s| s.parse().ok())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier stored in an attribute map, if any
pub fn attribute_id(attrs: &AttributeMap) -> Option<DocumentId> {
    attrs.get(ID_FIELD).and_then(DocumentId::from_value)
}

/// Accumulated field-level validation failures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<(String, String)>,
}

impl ValidationErrors {
    /// Create an empty error set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an error set with a single failure
    pub fn of(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a failure against a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push((field.into(), message.into()));
    }

    /// Check whether any failure was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded failures
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate over `(field, message)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(f, m)| (f.as_str(), m.as_str()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", field, message)?;
            first = false;
        }
        Ok(())
    }
}

/// Cached target state of one association on one document instance
#[derive(Debug, Clone, Default)]
pub struct CachedTarget {
    loaded: bool,
    docs: Vec<AttributeMap>,
}

impl CachedTarget {
    /// Check whether the target has been materialized
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Cached documents, loaded and pending alike
    pub fn docs(&self) -> &[AttributeMap] {
        &self.docs
    }

    /// Replace the cache with a materialized target
    pub fn set_loaded(&mut self, docs: Vec<AttributeMap>) {
        self.loaded = true;
        self.docs = docs;
    }

    /// Add a document to the cached target
    pub fn push(&mut self, doc: AttributeMap) {
        self.docs.push(doc);
    }

    /// Forget everything; the next read fetches again
    pub fn reset(&mut self) {
        self.loaded = false;
        self.docs.clear();
    }

    /// Cached documents that have not been persisted yet
    pub fn unpersisted(&self) -> Vec<AttributeMap> {
        self.docs
            .iter()
            .filter(|doc| attribute_id(doc).is_none())
            .cloned()
            .collect()
    }

    /// Drop fetched documents, keeping only unpersisted ones
    pub fn keep_unpersisted(&mut self) {
        self.loaded = false;
        self.docs.retain(|doc| attribute_id(doc).is_none());
    }

    /// Swap one cached document for its just-persisted form
    pub fn replace_doc(&mut self, index: usize, doc: AttributeMap) {
        if index < self.docs.len() {
            self.docs[index] = doc;
        }
    }
}

/// Per-instance cache of association targets, keyed by association name
///
/// Lives on the document struct behind `#[serde(skip)]`; cache state never
/// participates in document equality or persistence.
#[derive(Debug, Clone, Default)]
pub struct AssociationCache {
    entries: HashMap<String, CachedTarget>,
}

impl AssociationCache {
    /// Cached state for an association, creating an empty entry on demand
    pub fn entry(&mut self, name: &str) -> &mut CachedTarget {
        self.entries.entry(name.to_string()).or_default()
    }

    /// Cached state for an association, if any was recorded
    pub fn get(&self, name: &str) -> Option<&CachedTarget> {
        self.entries.get(name)
    }

    /// Forget one association's cached target
    pub fn reset(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.reset();
        }
    }

    /// Forget every cached target
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl PartialEq for AssociationCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for AssociationCache {}

/// Core trait for mapped documents
pub trait Document:
    Clone + Default + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Type name for this document ("List")
    fn document_name() -> &'static str;

    /// Get the identifier for this document instance
    fn id(&self) -> Option<DocumentId>;

    /// Set the identifier for this document instance
    fn set_id(&mut self, id: DocumentId);

    /// Association cache carried by this instance
    fn association_state(&self) -> &AssociationCache;

    /// Mutable association cache carried by this instance
    fn association_state_mut(&mut self) -> &mut AssociationCache;

    /// Collection this document type is stored in ("lists")
    fn collection_name() -> String {
        inflect::collection_for(Self::document_name())
    }

    /// Check if this document type is stored inline in its owner
    fn embeddable() -> bool {
        false
    }

    /// Type tag for this instance; polymorphic documents return their
    /// variant name
    fn document_type(&self) -> &'static str {
        Self::document_name()
    }

    /// Validate the document before persistence
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }

    /// Check if this instance has been assigned an identifier
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }

    /// Convert the document to its attribute-map form
    ///
    /// An unassigned identifier is omitted from the map rather than stored
    /// as null.
    fn to_attributes(&self) -> OdmResult<AttributeMap> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                if map.get(ID_FIELD).is_some_and(Value::is_null) {
                    map.remove(ID_FIELD);
                }
                Ok(map)
            }
            other => Err(OdmError::configuration(format!(
                "document '{}' must serialize to an object, got {}",
                Self::document_name(),
                other
            ))),
        }
    }

    /// Build a document instance from its attribute-map form
    fn from_attributes(attrs: AttributeMap) -> OdmResult<Self>
    where
        Self: Sized,
    {
        Ok(serde_json::from_value(Value::Object(attrs))?)
    }
}
