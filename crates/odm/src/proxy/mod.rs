//! Association Proxy - Lazily loaded handle for one association on one
//! owner
//!
//! A proxy borrows its owner exclusively and materializes the target
//! collection on first read, caching it on the owner so repeated reads and
//! repeated proxy constructions cost nothing. Mutations keep the cache
//! honest: a full write caches the new target, appends and creates drop
//! the fetched state so the next read refetches, and unsaved members built
//! through the proxy ride along until they are persisted.
//!
//! Scoped reads (`all`, `first`, `find`, `count`, `paginate`, and the
//! attribute finders) are narrower queries answered per call; they neither
//! consult nor disturb the cached target.

mod embedded;
pub(crate) mod linkage;

use std::marker::PhantomData;

use serde_json::Value;

use folio_core::criteria::{Criteria, Page};
use folio_core::document::{
    attribute_id, AttributeMap, CachedTarget, Document, DocumentId, ID_FIELD,
};
use folio_core::error::{OdmError, OdmResult};
use folio_core::store::DocumentStore;

use crate::cascade;
use crate::definition::{AssociationDefinition, Associations, ProxyVariant};

/// Lazily loaded, mutation-aware handle for one collection association
#[derive(Debug)]
pub struct Many<'a, O: Associations, T: Associations> {
    owner: &'a mut O,
    definition: &'static AssociationDefinition,
    store: DocumentStore,
    _target: PhantomData<T>,
}

impl<'a, O: Associations, T: Associations> Many<'a, O, T> {
    /// Open the named association on an owner instance
    ///
    /// Fails with a configuration error when the owner does not declare
    /// the association or the declaration does not fit the target type.
    pub fn new(owner: &'a mut O, name: &str, store: &DocumentStore) -> OdmResult<Self> {
        let definition = O::association(name).ok_or_else(|| {
            OdmError::configuration(format!(
                "'{}' has no association named '{}'",
                O::document_name(),
                name
            ))
        })?;
        definition.validate::<O, T>()?;
        Ok(Self {
            owner,
            definition,
            store: store.clone(),
            _target: PhantomData,
        })
    }

    /// Declaration this proxy operates under
    pub fn definition(&self) -> &AssociationDefinition {
        self.definition
    }

    /// Check whether the target is materialized in the owner's cache
    pub fn loaded(&self) -> bool {
        self.owner
            .association_state()
            .get(&self.definition.name)
            .map(CachedTarget::is_loaded)
            .unwrap_or(false)
    }

    /// Forget all cached state, including unsaved members
    pub fn reset(&mut self) {
        self.cache_entry().reset();
    }

    /// The target collection, loading it on first call
    ///
    /// A fetch that reports the backend's not-found is swallowed: the
    /// proxy drops its fetched state and answers with whatever unsaved
    /// members it still holds, usually none. Other storage errors
    /// propagate.
    pub fn read(&mut self) -> OdmResult<Vec<T>> {
        let maps = if self.loaded() {
            self.cached_docs()
        } else {
            self.load()?
        };
        maps.into_iter().map(T::from_attributes).collect()
    }

    /// Replace the whole target collection and persist the new linkage
    ///
    /// The new target is cached as loaded, so reading back does not go to
    /// storage.
    pub fn write(&mut self, docs: Vec<T>) -> OdmResult<Vec<T>> {
        let stored = if self.definition.variant.is_embedded() {
            self.embedded_replace(docs)?
        } else {
            self.linkage_replace(docs)?
        };
        self.cache_entry().set_loaded(stored);
        self.read()
    }

    /// Drop fetched state and read again
    ///
    /// Members built through the proxy but not yet persisted survive the
    /// round trip.
    pub fn reload(&mut self) -> OdmResult<Vec<T>> {
        self.cache_entry().keep_unpersisted();
        self.read()
    }

    /// Append one member, persisting linkage by variant rules
    ///
    /// An unsaved owner or member is persisted first. In id-array
    /// variants a member that is already linked is a silent no-op, so no
    /// id ever appears twice.
    pub fn push(&mut self, doc: &mut T) -> OdmResult<()> {
        if self.definition.variant.is_embedded() {
            self.embedded_push(doc)?;
        } else {
            self.linkage_append(doc)?;
        }
        self.soft_reset();
        Ok(())
    }

    /// Append several members in order
    pub fn concat(&mut self, docs: &mut [T]) -> OdmResult<()> {
        for doc in docs.iter_mut() {
            self.push(doc)?;
        }
        Ok(())
    }

    /// Instantiate a member with linkage pre-set, without persisting it
    ///
    /// The member joins the cached target and is picked up by the next
    /// owner save when the association autosaves.
    pub fn build(&mut self, attrs: Value) -> OdmResult<T> {
        let doc = self.new_member(attrs)?;
        let map = doc.to_attributes()?;
        self.cache_entry().push(map);
        Ok(doc)
    }

    /// Create and persist a member; validation failure hands back the
    /// unsaved document and leaves the cache untouched
    pub fn create(&mut self, attrs: Value) -> OdmResult<T> {
        self.create_impl(attrs, false)
    }

    /// Create and persist a member; validation failure is an error and
    /// the cache stays untouched
    pub fn create_or_fail(&mut self, attrs: Value) -> OdmResult<T> {
        self.create_impl(attrs, true)
    }

    /// Members matching narrower criteria, fetched per call
    pub fn all(&self, criteria: Criteria) -> OdmResult<Vec<T>> {
        let maps = self.scoped_fetch(criteria)?;
        maps.into_iter().map(T::from_attributes).collect()
    }

    /// First member under the given criteria
    pub fn first(&self, criteria: Criteria) -> OdmResult<Option<T>> {
        Ok(self.all(criteria.limit(1))?.into_iter().next())
    }

    /// Last member under the given criteria
    ///
    /// With sort keys the order is inverted and the first match taken;
    /// without, the tail of the natural order is answered.
    pub fn last(&self, criteria: Criteria) -> OdmResult<Option<T>> {
        if criteria.has_order() {
            Ok(self
                .all(criteria.invert_order().limit(1))?
                .into_iter()
                .next())
        } else {
            Ok(self.all(criteria)?.pop())
        }
    }

    /// Count members without materializing them
    ///
    /// The owner-side id array answers an unconditioned count directly,
    /// with no storage call.
    pub fn count(&self, criteria: Criteria) -> OdmResult<usize> {
        if self.definition.variant.is_embedded() {
            let docs = self.embedded_docs()?;
            return Ok(docs.iter().filter(|doc| criteria.matches(doc)).count());
        }
        if self.definition.variant == ProxyVariant::InArray && !criteria.has_conditions() {
            let attrs = self.owner.to_attributes()?;
            return Ok(self.definition.stored_ids(&attrs).len());
        }
        match self.member_scope()? {
            Some(scope) => self
                .store
                .backend()
                .count(&self.definition.target_collection, &scope.merge(criteria)),
            None => Ok(0),
        }
    }

    /// Check whether the association has no members
    pub fn is_empty(&self) -> OdmResult<bool> {
        Ok(self.count(Criteria::new())? == 0)
    }

    /// Member with the given id; ids outside the association answer None
    pub fn find(&self, id: &DocumentId) -> OdmResult<Option<T>> {
        self.first(Criteria::new().where_eq(ID_FIELD, id.to_value()))
    }

    /// Member with the given id, or a not-found error
    pub fn find_or_fail(&self, id: &DocumentId) -> OdmResult<T> {
        self.find(id)?
            .ok_or_else(|| OdmError::not_found(&self.definition.target_collection))
    }

    /// Members with the given ids; ids outside the association are
    /// silently dropped
    pub fn find_many(&self, ids: &[DocumentId]) -> OdmResult<Vec<T>> {
        let values: Vec<Value> = ids.iter().map(DocumentId::to_value).collect();
        self.all(Criteria::new().where_in(ID_FIELD, values))
    }

    /// First member whose attributes equal the given ones
    pub fn find_by(&self, attrs: Value) -> OdmResult<Option<T>> {
        let map = object_attrs(attrs)?;
        self.first(Criteria::new().where_all(&map))
    }

    /// First member with the given attributes, or a not-found error
    pub fn find_by_or_fail(&self, attrs: Value) -> OdmResult<T> {
        self.find_by(attrs)?
            .ok_or_else(|| OdmError::not_found(&self.definition.target_collection))
    }

    /// First member with the given attributes, created when absent
    pub fn find_or_create_by(&mut self, attrs: Value) -> OdmResult<T> {
        if let Some(found) = self.find_by(attrs.clone())? {
            return Ok(found);
        }
        self.create(attrs)
    }

    /// One page of members with totals
    pub fn paginate(&self, criteria: Criteria, per_page: usize, page: usize) -> OdmResult<Page<T>> {
        let total_entries = self.count(criteria.clone())?;
        let items = self.all(criteria.paginate(per_page, page))?;
        Ok(Page::new(items, total_entries, page, per_page))
    }

    /// Destroy every member, running each member's own cascades
    pub fn destroy_all(&mut self) -> OdmResult<usize> {
        self.destroy_matching(Criteria::new())
    }

    /// Destroy members matching the criteria, with their cascades
    pub fn destroy_matching(&mut self, criteria: Criteria) -> OdmResult<usize> {
        self.reject_embedded("destroy_all")?;
        let maps = self.scoped_fetch(criteria)?;
        let removed: Vec<DocumentId> = maps.iter().filter_map(attribute_id).collect();
        let count = maps.len();
        for map in maps {
            let doc = T::from_attributes(map)?;
            cascade::destroy_document(&self.store, doc)?;
        }
        self.prune_owner_ids(&removed)?;
        self.soft_reset();
        Ok(count)
    }

    /// Remove every member at the storage level, skipping cascades
    pub fn delete_all(&mut self) -> OdmResult<usize> {
        self.delete_matching(Criteria::new())
    }

    /// Remove members matching the criteria at the storage level
    pub fn delete_matching(&mut self, criteria: Criteria) -> OdmResult<usize> {
        self.reject_embedded("delete_all")?;
        let count = match self.definition.variant {
            ProxyVariant::InArray => {
                let maps = self.scoped_fetch(criteria)?;
                let removed: Vec<DocumentId> = maps.iter().filter_map(attribute_id).collect();
                let values: Vec<Value> = removed.iter().map(DocumentId::to_value).collect();
                let count = self.store.backend().delete(
                    &self.definition.target_collection,
                    &Criteria::new().where_in(ID_FIELD, values),
                )?;
                self.prune_owner_ids(&removed)?;
                count
            }
            _ => match self.member_scope()? {
                Some(scope) => self
                    .store
                    .backend()
                    .delete(&self.definition.target_collection, &scope.merge(criteria))?,
                None => 0,
            },
        };
        self.soft_reset();
        Ok(count)
    }

    /// Unlink every member, keeping the member documents
    pub fn nullify(&mut self) -> OdmResult<usize> {
        self.reject_embedded("nullify")?;
        let count = match (self.definition.variant, self.owner.id()) {
            (ProxyVariant::InArray, _) => self.clear_owner_ids()?,
            (_, Some(owner_id)) => match (
                self.member_scope()?,
                linkage::release_patch(self.definition, &owner_id),
            ) {
                (Some(scope), Some(patch)) => self.store.backend().modify(
                    &self.definition.target_collection,
                    &scope,
                    &patch,
                )?,
                _ => 0,
            },
            (_, None) => 0,
        };
        self.soft_reset();
        Ok(count)
    }

    fn create_impl(&mut self, attrs: Value, bang: bool) -> OdmResult<T> {
        if self.definition.variant.is_embedded() {
            return Err(OdmError::unsupported(
                "create",
                self.definition.variant.name(),
            ));
        }
        self.ensure_owner_saved()?;
        let mut doc = self.new_member(attrs)?;

        if let Err(errors) = doc.validate() {
            if bang {
                return Err(errors.into());
            }
            tracing::debug!(
                association = %self.definition.name,
                %errors,
                "member failed validation, returned unsaved"
            );
            return Ok(doc);
        }
        self.store.collection::<T>().save_or_fail(&mut doc)?;

        if self.definition.variant == ProxyVariant::InArray {
            let id = doc
                .id()
                .ok_or_else(|| OdmError::storage("member id missing after save"))?;
            self.record_owner_id(&id)?;
        }
        self.soft_reset();
        Ok(doc)
    }

    /// Instantiate a member from default attributes, the given ones, and
    /// the association linkage
    fn new_member(&self, attrs: Value) -> OdmResult<T> {
        let mut map = T::default().to_attributes()?;
        for (field, value) in object_attrs(attrs)? {
            map.insert(field, value);
        }
        if let Some(owner_id) = self.owner.id() {
            linkage::establish_in_map(
                self.definition,
                &owner_id,
                self.owner.document_type(),
                &mut map,
            );
        }
        T::from_attributes(map)
    }

    fn load(&mut self) -> OdmResult<Vec<AttributeMap>> {
        match self.find_target() {
            Ok(mut fetched) => {
                let entry = self.cache_entry();
                fetched.extend(entry.unpersisted());
                entry.set_loaded(fetched.clone());
                Ok(fetched)
            }
            Err(err) if err.is_not_found() => {
                tracing::debug!(
                    association = %self.definition.name,
                    "target fetch reported not-found, cache dropped"
                );
                let entry = self.cache_entry();
                entry.keep_unpersisted();
                Ok(entry.docs().to_vec())
            }
            Err(err) => Err(err),
        }
    }

    fn find_target(&self) -> OdmResult<Vec<AttributeMap>> {
        if self.definition.variant.is_embedded() {
            return self.embedded_docs();
        }
        match self.member_scope()? {
            Some(scope) => self
                .store
                .backend()
                .find(&self.definition.target_collection, &scope),
            None => Ok(Vec::new()),
        }
    }

    fn scoped_fetch(&self, criteria: Criteria) -> OdmResult<Vec<AttributeMap>> {
        if self.definition.variant.is_embedded() {
            return Ok(criteria.apply(self.embedded_docs()?));
        }
        match self.member_scope()? {
            Some(scope) => self
                .store
                .backend()
                .find(&self.definition.target_collection, &scope.merge(criteria)),
            None => Ok(Vec::new()),
        }
    }

    /// Criteria selecting this owner's members; None while the owner has
    /// no id, and therefore no persisted members
    fn member_scope(&self) -> OdmResult<Option<Criteria>> {
        let owner_id = match self.owner.id() {
            Some(id) => id,
            None => return Ok(None),
        };
        let attrs = self.owner.to_attributes()?;
        Ok(Some(self.definition.scope(
            &owner_id,
            self.owner.document_type(),
            &attrs,
        )))
    }

    fn cached_docs(&self) -> Vec<AttributeMap> {
        self.owner
            .association_state()
            .get(&self.definition.name)
            .map(|entry| entry.docs().to_vec())
            .unwrap_or_default()
    }

    fn cache_entry(&mut self) -> &mut CachedTarget {
        self.owner
            .association_state_mut()
            .entry(&self.definition.name)
    }

    /// Drop fetched state, keeping unsaved members
    fn soft_reset(&mut self) {
        self.cache_entry().keep_unpersisted();
    }

    fn reject_embedded(&self, operation: &str) -> OdmResult<()> {
        if self.definition.variant.is_embedded() {
            return Err(OdmError::unsupported(
                operation,
                self.definition.variant.name(),
            ));
        }
        Ok(())
    }

    pub(crate) fn ensure_owner_saved(&mut self) -> OdmResult<DocumentId> {
        if let Some(id) = self.owner.id() {
            return Ok(id);
        }
        self.store.collection::<O>().save_or_fail(self.owner)?;
        self.owner
            .id()
            .ok_or_else(|| OdmError::storage("owner id missing after save"))
    }

    /// Rewrite the owner through its attribute map, preserving cache state
    ///
    /// The cache is restored even when the rebuild fails.
    pub(crate) fn update_owner(
        &mut self,
        mutate: impl FnOnce(&mut AttributeMap),
    ) -> OdmResult<()> {
        let mut attrs = self.owner.to_attributes()?;
        mutate(&mut attrs);
        let cache = std::mem::take(self.owner.association_state_mut());
        let outcome = O::from_attributes(attrs).map(|rebuilt| *self.owner = rebuilt);
        *self.owner.association_state_mut() = cache;
        outcome
    }

    pub(crate) fn persist_owner(&mut self) -> OdmResult<()> {
        self.store.collection::<O>().save_or_fail(self.owner)
    }

    fn prune_owner_ids(&mut self, removed: &[DocumentId]) -> OdmResult<()> {
        let field = match self.definition.in_array_field.clone() {
            Some(field) if !removed.is_empty() => field,
            _ => return Ok(()),
        };
        let gone: Vec<Value> = removed.iter().map(DocumentId::to_value).collect();
        self.update_owner(|attrs| {
            if let Some(Value::Array(ids)) = attrs.get_mut(&field) {
                ids.retain(|id| !gone.contains(id));
            }
        })?;
        self.persist_owner()
    }

    fn clear_owner_ids(&mut self) -> OdmResult<usize> {
        let field = match self.definition.in_array_field.clone() {
            Some(field) => field,
            None => return Ok(0),
        };
        let attrs = self.owner.to_attributes()?;
        let count = self.definition.stored_ids(&attrs).len();
        if count == 0 {
            return Ok(0);
        }
        self.update_owner(|attrs| {
            attrs.insert(field.clone(), Value::Array(Vec::new()));
        })?;
        self.persist_owner()?;
        Ok(count)
    }

    pub(crate) fn record_owner_id(&mut self, id: &DocumentId) -> OdmResult<bool> {
        let field = match self.definition.in_array_field.clone() {
            Some(field) => field,
            None => return Ok(false),
        };
        let attrs = self.owner.to_attributes()?;
        if self.definition.stored_ids(&attrs).contains(&id.to_value()) {
            tracing::debug!(
                association = %self.definition.name,
                member = %id,
                "member already linked, append skipped"
            );
            return Ok(false);
        }
        let value = id.to_value();
        self.update_owner(|attrs| {
            let entry = attrs
                .entry(field.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(ids) = entry {
                if !ids.contains(&value) {
                    ids.push(value.clone());
                }
            }
        })?;
        self.persist_owner()?;
        Ok(true)
    }
}

pub(crate) fn object_attrs(value: Value) -> OdmResult<AttributeMap> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(OdmError::configuration(format!(
            "attributes must be a JSON object, got {}",
            other
        ))),
    }
}
