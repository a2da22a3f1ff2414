//! Document Store - Typed access to a storage backend
//!
//! `DocumentStore` is a cheaply clonable handle over a shared backend.
//! `Collection` is its typed view for one document type: criteria go in,
//! hydrated documents come out, and `save` runs validation before the
//! upsert.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::backend::{MemoryBackend, StorageBackend};
use crate::criteria::{Criteria, Page};
use crate::document::{AttributeMap, Document, DocumentId, ID_FIELD};
use crate::error::{OdmError, OdmResult};
use crate::patch::Patch;

/// Handle to a storage backend shared across the application
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn StorageBackend>,
}

impl DocumentStore {
    /// Wrap an existing backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Create a store over a fresh in-memory backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Raw backend access for attribute-map level operations
    pub fn backend(&self) -> &dyn StorageBackend {
        &*self.backend
    }

    /// Typed view of one document type's collection
    pub fn collection<D: Document>(&self) -> Collection<'_, D> {
        Collection {
            backend: &*self.backend,
            name: D::collection_name(),
            _marker: PhantomData,
        }
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

/// Typed view of one collection
pub struct Collection<'a, D: Document> {
    backend: &'a dyn StorageBackend,
    name: String,
    _marker: PhantomData<D>,
}

impl<'a, D: Document> Collection<'a, D> {
    /// Collection name this view reads and writes
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch documents matching the criteria
    pub fn find(&self, criteria: Criteria) -> OdmResult<Vec<D>> {
        let maps = self.backend.find(&self.name, &criteria)?;
        maps.into_iter().map(D::from_attributes).collect()
    }

    /// Fetch every document in the collection
    pub fn all(&self) -> OdmResult<Vec<D>> {
        self.find(Criteria::new())
    }

    /// Fetch the first document matching the criteria
    pub fn first(&self, criteria: Criteria) -> OdmResult<Option<D>> {
        Ok(self.find(criteria.limit(1))?.into_iter().next())
    }

    /// Fetch the first matching document or fail with not-found
    pub fn first_or_fail(&self, criteria: Criteria) -> OdmResult<D> {
        self.first(criteria)?
            .ok_or_else(|| OdmError::not_found(&self.name))
    }

    /// Fetch a document by id
    pub fn find_by_id(&self, id: &DocumentId) -> OdmResult<Option<D>> {
        self.first(Criteria::new().where_eq(ID_FIELD, id.to_value()))
    }

    /// Fetch a document by id or fail with not-found
    pub fn find_by_id_or_fail(&self, id: &DocumentId) -> OdmResult<D> {
        self.find_by_id(id)?
            .ok_or_else(|| OdmError::not_found(&self.name))
    }

    /// Count documents matching the criteria
    pub fn count(&self, criteria: Criteria) -> OdmResult<usize> {
        self.backend.count(&self.name, &criteria)
    }

    /// Check whether a document with the given id is stored
    pub fn exists(&self, id: &DocumentId) -> OdmResult<bool> {
        Ok(self
            .count(Criteria::new().where_eq(ID_FIELD, id.to_value()))?
            > 0)
    }

    /// Fetch one page of matching documents with totals
    pub fn paginate(
        &self,
        criteria: Criteria,
        per_page: usize,
        page: usize,
    ) -> OdmResult<Page<D>> {
        let total_entries = self.count(criteria.clone())?;
        let items = self.find(criteria.paginate(per_page, page))?;
        Ok(Page::new(items, total_entries, page, per_page))
    }

    /// Validate and upsert; false when validation rejects the document
    ///
    /// A fresh identifier is assigned before the first insert.
    pub fn save(&self, doc: &mut D) -> OdmResult<bool> {
        match doc.validate() {
            Ok(()) => {
                self.upsert(doc)?;
                Ok(true)
            }
            Err(errors) => {
                tracing::debug!(collection = %self.name, %errors, "validation failed, not saved");
                Ok(false)
            }
        }
    }

    /// Validate and upsert; validation failure becomes an error
    pub fn save_or_fail(&self, doc: &mut D) -> OdmResult<()> {
        doc.validate()?;
        self.upsert(doc)
    }

    /// Remove documents matching the criteria, returning how many
    pub fn delete(&self, criteria: Criteria) -> OdmResult<usize> {
        self.backend.delete(&self.name, &criteria)
    }

    /// Remove a document by id; false when absent
    pub fn delete_by_id(&self, id: &DocumentId) -> OdmResult<bool> {
        Ok(self
            .delete(Criteria::new().where_eq(ID_FIELD, id.to_value()))?
            > 0)
    }

    /// Apply a patch to documents matching the criteria
    pub fn modify(&self, criteria: Criteria, patch: Patch) -> OdmResult<usize> {
        self.backend.modify(&self.name, &criteria, &patch)
    }

    /// Fetch matching documents in raw attribute-map form
    pub fn find_maps(&self, criteria: Criteria) -> OdmResult<Vec<AttributeMap>> {
        self.backend.find(&self.name, &criteria)
    }

    fn upsert(&self, doc: &mut D) -> OdmResult<()> {
        let id = match doc.id() {
            Some(id) => id,
            None => {
                let id = DocumentId::new();
                doc.set_id(id);
                id
            }
        };
        let attrs = doc.to_attributes()?;
        if !self.backend.replace(&self.name, &id, attrs.clone())? {
            self.backend.insert(&self.name, attrs)?;
        }
        Ok(())
    }
}
