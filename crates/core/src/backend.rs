//! Storage Backend - Collection-level persistence contract
//!
//! Backends store documents as attribute maps grouped into named
//! collections. All calls are synchronous and block until the backend
//! answers. The in-memory backend keeps insertion order per collection,
//! which gives unordered reads a stable natural order.

use dashmap::DashMap;

use crate::criteria::Criteria;
use crate::document::{attribute_id, AttributeMap, DocumentId};
use crate::error::OdmResult;
use crate::patch::Patch;

/// Collection-level storage operations
pub trait StorageBackend: Send + Sync {
    /// Fetch documents matching the criteria, sorted and windowed
    fn find(&self, collection: &str, criteria: &Criteria) -> OdmResult<Vec<AttributeMap>>;

    /// Count documents matching the criteria, ignoring any window
    fn count(&self, collection: &str, criteria: &Criteria) -> OdmResult<usize>;

    /// Add a new document to a collection
    fn insert(&self, collection: &str, doc: AttributeMap) -> OdmResult<()>;

    /// Overwrite the document with the given id; false when absent
    fn replace(&self, collection: &str, id: &DocumentId, doc: AttributeMap) -> OdmResult<bool>;

    /// Remove documents matching the criteria, returning how many
    fn delete(&self, collection: &str, criteria: &Criteria) -> OdmResult<usize>;

    /// Apply a patch to documents matching the criteria, returning how many
    fn modify(&self, collection: &str, criteria: &Criteria, patch: &Patch) -> OdmResult<usize>;

    /// Remove a collection and everything in it
    fn drop_collection(&self, collection: &str) -> OdmResult<()>;
}

/// In-memory storage engine used in tests and examples
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: DashMap<String, Vec<AttributeMap>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn find(&self, collection: &str, criteria: &Criteria) -> OdmResult<Vec<AttributeMap>> {
        let docs = self
            .collections
            .get(collection)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        let found = criteria.apply(docs);
        tracing::debug!(collection, found = found.len(), "find");
        Ok(found)
    }

    fn count(&self, collection: &str, criteria: &Criteria) -> OdmResult<usize> {
        let count = self
            .collections
            .get(collection)
            .map(|entry| entry.iter().filter(|doc| criteria.matches(doc)).count())
            .unwrap_or(0);
        Ok(count)
    }

    fn insert(&self, collection: &str, doc: AttributeMap) -> OdmResult<()> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        tracing::debug!(collection, "insert");
        Ok(())
    }

    fn replace(&self, collection: &str, id: &DocumentId, doc: AttributeMap) -> OdmResult<bool> {
        let mut entry = match self.collections.get_mut(collection) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        match entry.iter_mut().find(|stored| attribute_id(stored) == Some(*id)) {
            Some(stored) => {
                *stored = doc;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, collection: &str, criteria: &Criteria) -> OdmResult<usize> {
        let mut entry = match self.collections.get_mut(collection) {
            Some(entry) => entry,
            None => return Ok(0),
        };
        let before = entry.len();
        entry.retain(|doc| !criteria.matches(doc));
        let removed = before - entry.len();
        tracing::debug!(collection, removed, "delete");
        Ok(removed)
    }

    fn modify(&self, collection: &str, criteria: &Criteria, patch: &Patch) -> OdmResult<usize> {
        let mut entry = match self.collections.get_mut(collection) {
            Some(entry) => entry,
            None => return Ok(0),
        };
        let mut touched = 0;
        for doc in entry.iter_mut() {
            if criteria.matches(doc) {
                patch.apply(doc);
                touched += 1;
            }
        }
        tracing::debug!(collection, touched, "modify");
        Ok(touched)
    }

    fn drop_collection(&self, collection: &str) -> OdmResult<()> {
        self.collections.remove(collection);
        Ok(())
    }
}
