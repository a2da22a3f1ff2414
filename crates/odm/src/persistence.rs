//! Document Persistence - Saving owners together with their associations
//!
//! `DocumentOps` is the instance-level surface: save runs the document's
//! own persistence first and then each autosaving association's runner,
//! so members built through a proxy are persisted and linked in the same
//! call that saves their owner. Destroy hands off to the cascade pass
//! declared on the document's associations.

use serde_json::Value;

use folio_core::document::{
    attribute_id, AssociationCache, AttributeMap, CachedTarget, Document, DocumentId, ID_FIELD,
    TYPE_FIELD,
};
use folio_core::error::{OdmError, OdmResult};
use folio_core::store::DocumentStore;

use crate::cascade;
use crate::definition::{AssociationDefinition, Associations, ProxyVariant};
use crate::proxy::{linkage, Many};

/// Persistence and lifecycle operations for association-bearing documents
pub trait DocumentOps: Associations {
    /// Save the document, then autosave its associations
    ///
    /// Answers false when the document itself fails validation; members
    /// that fail validation stay cached unsaved without failing the owner.
    fn save(&mut self, store: &DocumentStore) -> OdmResult<bool>;

    /// Save the document and its associations, treating validation
    /// failure as an error
    fn save_or_fail(&mut self, store: &DocumentStore) -> OdmResult<()>;

    /// Run dependent-policy cascades, then remove the document
    fn destroy(self, store: &DocumentStore) -> OdmResult<()>;

    /// Refetch the document's stored form, dropping cached associations
    fn reload(&mut self, store: &DocumentStore) -> OdmResult<()>;

    /// Open an association proxy on this instance
    fn many<T: Associations>(
        &mut self,
        name: &str,
        store: &DocumentStore,
    ) -> OdmResult<Many<'_, Self, T>>
    where
        Self: Sized;
}

impl<D: Associations> DocumentOps for D {
    fn save(&mut self, store: &DocumentStore) -> OdmResult<bool> {
        if !store.collection::<D>().save(self)? {
            return Ok(false);
        }
        run_autosave(store, self)?;
        Ok(true)
    }

    fn save_or_fail(&mut self, store: &DocumentStore) -> OdmResult<()> {
        store.collection::<D>().save_or_fail(self)?;
        run_autosave(store, self)
    }

    fn destroy(self, store: &DocumentStore) -> OdmResult<()> {
        cascade::destroy_document(store, self)
    }

    fn reload(&mut self, store: &DocumentStore) -> OdmResult<()> {
        let id = self
            .id()
            .ok_or_else(|| OdmError::not_found(D::collection_name()))?;
        *self = store.collection::<D>().find_by_id_or_fail(&id)?;
        Ok(())
    }

    fn many<T: Associations>(
        &mut self,
        name: &str,
        store: &DocumentStore,
    ) -> OdmResult<Many<'_, D, T>> {
        Many::new(self, name, store)
    }
}

/// Run every autosaving association's runner over the saved document
///
/// Owner-side changes made by the runners, id arrays and inline member
/// arrays, are written back and the document saved again.
fn run_autosave<D: Associations>(store: &DocumentStore, doc: &mut D) -> OdmResult<()> {
    if D::associations().is_empty() {
        return Ok(());
    }
    let mut attrs = doc.to_attributes()?;
    let mut cache = std::mem::take(doc.association_state_mut());

    let mut changed = false;
    let mut outcome = Ok(());
    for def in D::associations() {
        if !def.autosave {
            continue;
        }
        match (def.autosave_run)(store, def, &mut attrs, &mut cache) {
            Ok(dirty) => changed |= dirty,
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }
    if outcome.is_ok() && changed {
        outcome = (|| {
            *doc = D::from_attributes(attrs)?;
            store.collection::<D>().save_or_fail(doc)
        })();
    }
    *doc.association_state_mut() = cache;
    outcome
}

/// Autosave runner for one association, monomorphized over its target
///
/// Persists cached members that have no identifier yet, stamping linkage
/// by variant, and reports whether the owner's own attributes changed.
/// Embedded variants sync the cached target into the owner's inline
/// array instead.
pub(crate) fn autosave_members<T: Associations>(
    store: &DocumentStore,
    def: &AssociationDefinition,
    owner_attrs: &mut AttributeMap,
    cache: &mut AssociationCache,
) -> OdmResult<bool> {
    if def.variant.is_embedded() {
        return sync_embedded(def, owner_attrs, cache);
    }

    let owner_id = match attribute_id(owner_attrs) {
        Some(id) => id,
        None => return Ok(false),
    };
    let owner_type = owner_attrs
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .unwrap_or(def.owner_name)
        .to_string();

    let pending = cache
        .get(&def.name)
        .is_some_and(|entry| !entry.unpersisted().is_empty());
    if !pending {
        return Ok(false);
    }

    let entry = cache.entry(&def.name);
    let mut changed = false;
    for index in 0..entry.docs().len() {
        if attribute_id(&entry.docs()[index]).is_some() {
            continue;
        }
        let mut map = entry.docs()[index].clone();
        linkage::establish_in_map(def, &owner_id, &owner_type, &mut map);
        let mut doc = T::from_attributes(map)?;
        if !store.collection::<T>().save(&mut doc)? {
            tracing::debug!(
                association = %def.name,
                "pending member failed validation, left unsaved"
            );
            continue;
        }
        entry.replace_doc(index, doc.to_attributes()?);
        if def.variant == ProxyVariant::InArray {
            if let Some(id) = doc.id() {
                changed |= record_id_in_array(owner_attrs, def, &id);
            }
        }
    }
    Ok(changed)
}

/// Sync the embedded cache into the owner's inline array
///
/// A loaded cache holds the full target and rewrites the array. An
/// unloaded cache can still hold built members; those are appended
/// behind the stored ones, which stay in place.
fn sync_embedded(
    def: &AssociationDefinition,
    owner_attrs: &mut AttributeMap,
    cache: &mut AssociationCache,
) -> OdmResult<bool> {
    let loaded = cache.get(&def.name).is_some_and(CachedTarget::is_loaded);
    if !loaded {
        return Ok(append_pending_embedded(def, owner_attrs, cache));
    }

    let entry = cache.entry(&def.name);
    let mut docs = entry.docs().to_vec();
    for (index, map) in docs.iter_mut().enumerate() {
        if attribute_id(map).is_none() {
            map.insert(ID_FIELD.to_string(), DocumentId::new().to_value());
            entry.replace_doc(index, map.clone());
        }
    }

    let inline = Value::Array(docs.into_iter().map(Value::Object).collect());
    if owner_attrs.get(&def.name) == Some(&inline) {
        return Ok(false);
    }
    owner_attrs.insert(def.name.clone(), inline);
    Ok(true)
}

/// Assign ids to built embedded members and push them onto the stored
/// inline array without loading it
fn append_pending_embedded(
    def: &AssociationDefinition,
    owner_attrs: &mut AttributeMap,
    cache: &mut AssociationCache,
) -> bool {
    let pending = cache
        .get(&def.name)
        .is_some_and(|entry| !entry.unpersisted().is_empty());
    if !pending {
        return false;
    }

    let entry = cache.entry(&def.name);
    let mut changed = false;
    for index in 0..entry.docs().len() {
        if attribute_id(&entry.docs()[index]).is_some() {
            continue;
        }
        let mut map = entry.docs()[index].clone();
        map.insert(ID_FIELD.to_string(), DocumentId::new().to_value());
        entry.replace_doc(index, map.clone());

        let inline = owner_attrs
            .entry(def.name.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = inline {
            items.push(Value::Object(map));
            changed = true;
        }
    }
    changed
}

fn record_id_in_array(
    owner_attrs: &mut AttributeMap,
    def: &AssociationDefinition,
    id: &DocumentId,
) -> bool {
    let field = match &def.in_array_field {
        Some(field) => field.clone(),
        None => return false,
    };
    let value = id.to_value();
    let entry = owner_attrs
        .entry(field)
        .or_insert_with(|| Value::Array(Vec::new()));
    match entry {
        Value::Array(ids) if !ids.contains(&value) => {
            ids.push(value);
            true
        }
        _ => false,
    }
}
