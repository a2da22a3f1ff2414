//! Cascade Lifecycle - Dependent policies applied before owner deletion
//!
//! When a document is destroyed, its association declarations run in
//! declaration order before the owner row is removed, while the owner id
//! still resolves members. `Destroy` loads each member and destroys it
//! with its own cascades; `DeleteAll` removes members at the storage
//! level; `Nullify` clears the linkage and keeps the members.

use folio_core::criteria::Criteria;
use folio_core::document::{attribute_id, AttributeMap, Document, TYPE_FIELD};
use folio_core::error::OdmResult;
use folio_core::store::DocumentStore;

use crate::definition::{AssociationDefinition, Associations, DependentPolicy};
use crate::proxy::linkage;

/// Apply one association's dependent policy for an owner about to be
/// deleted, returning how many members were affected
///
/// Embedded members are skipped: they live inside the owner document and
/// disappear with it.
pub(crate) fn run_policy<T: Associations>(
    store: &DocumentStore,
    def: &AssociationDefinition,
    owner_attrs: &AttributeMap,
) -> OdmResult<usize> {
    if def.variant.is_embedded() || def.dependent == DependentPolicy::None {
        return Ok(0);
    }
    let owner_id = match attribute_id(owner_attrs) {
        Some(id) => id,
        // An unsaved owner cannot have members linked in storage.
        None => return Ok(0),
    };
    let owner_type = owner_attrs
        .get(TYPE_FIELD)
        .and_then(serde_json::Value::as_str)
        .unwrap_or(def.owner_name);
    let scope = def.scope(&owner_id, owner_type, owner_attrs);

    let affected = match def.dependent {
        DependentPolicy::None => 0,
        DependentPolicy::Destroy => destroy_matching::<T>(store, scope)?,
        DependentPolicy::DeleteAll => store.backend().delete(&def.target_collection, &scope)?,
        DependentPolicy::Nullify => match linkage::release_patch(def, &owner_id) {
            Some(patch) => store.backend().modify(&def.target_collection, &scope, &patch)?,
            // Id-array linkage lives on the owner being deleted.
            None => 0,
        },
    };
    if affected > 0 {
        tracing::debug!(
            association = %def.name,
            policy = def.dependent.name(),
            affected,
            "dependent policy applied"
        );
    }
    Ok(affected)
}

/// Destroy every document matching the criteria, one by one with hooks
pub(crate) fn destroy_matching<T: Associations>(
    store: &DocumentStore,
    criteria: Criteria,
) -> OdmResult<usize> {
    let maps = store.backend().find(&T::collection_name(), &criteria)?;
    let count = maps.len();
    for map in maps {
        let doc = T::from_attributes(map)?;
        destroy_document(store, doc)?;
    }
    Ok(count)
}

/// Run every dependent policy for a document, then remove it from storage
pub(crate) fn destroy_document<T: Associations>(store: &DocumentStore, doc: T) -> OdmResult<()> {
    let attrs = doc.to_attributes()?;
    for def in T::associations() {
        (def.cascade)(store, def, &attrs)?;
    }
    if let Some(id) = doc.id() {
        store.collection::<T>().delete_by_id(&id)?;
    }
    Ok(())
}
