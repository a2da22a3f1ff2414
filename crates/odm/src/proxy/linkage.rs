//! Linkage Mechanics - How each association variant records membership
//!
//! Query-backed variants store the relationship on one side or the other:
//! a foreign key on the target, role fields on the target, an owner-id
//! array on the target, or a target-id array on the owner. The functions
//! here translate append and replace into the writes each variant needs,
//! and produce the patch that severs a member's linkage without deleting
//! it.

use serde_json::Value;

use folio_core::document::{AttributeMap, Document, DocumentId, ID_FIELD};
use folio_core::error::{OdmError, OdmResult};
use folio_core::patch::Patch;
use folio_core::Criteria;

use crate::definition::{AssociationDefinition, Associations, ProxyVariant};
use crate::proxy::Many;

/// Stamp an owner's linkage fields into a member's attribute map
///
/// Owner-side and embedded variants carry no member-side fields, so the
/// map is left alone.
pub(crate) fn establish_in_map(
    def: &AssociationDefinition,
    owner_id: &DocumentId,
    owner_type: &str,
    map: &mut AttributeMap,
) {
    match def.variant {
        ProxyVariant::ForeignKey | ProxyVariant::Polymorphic => {
            if let Some(fk) = &def.foreign_key {
                map.insert(fk.clone(), owner_id.to_value());
            }
        }
        ProxyVariant::InverseRole => {
            if let Some(fk) = &def.foreign_key {
                map.insert(fk.clone(), owner_id.to_value());
            }
            if let Some(role_type) = &def.role_type_field {
                map.insert(role_type.clone(), Value::String(owner_type.to_string()));
            }
        }
        ProxyVariant::InForeignArray => {
            if let Some(field) = &def.from_array_field {
                let entry = map
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(ids) = entry {
                    let value = owner_id.to_value();
                    if !ids.contains(&value) {
                        ids.push(value);
                    }
                }
            }
        }
        ProxyVariant::InArray | ProxyVariant::Embedded | ProxyVariant::EmbeddedPolymorphic => {}
    }
}

/// Patch that removes an owner's linkage from matching members
///
/// None when the variant keeps no member-side linkage to remove.
pub(crate) fn release_patch(def: &AssociationDefinition, owner_id: &DocumentId) -> Option<Patch> {
    match def.variant {
        ProxyVariant::ForeignKey | ProxyVariant::Polymorphic => {
            def.foreign_key.as_ref().map(|fk| Patch::new().unset(fk))
        }
        ProxyVariant::InverseRole => {
            let mut patch = Patch::new();
            let mut fields = false;
            if let Some(fk) = &def.foreign_key {
                patch = patch.unset(fk);
                fields = true;
            }
            if let Some(role_type) = &def.role_type_field {
                patch = patch.unset(role_type);
                fields = true;
            }
            fields.then_some(patch)
        }
        ProxyVariant::InForeignArray => def
            .from_array_field
            .as_ref()
            .map(|field| Patch::new().pull(field, owner_id.to_value())),
        ProxyVariant::InArray | ProxyVariant::Embedded | ProxyVariant::EmbeddedPolymorphic => None,
    }
}

fn array_contains(map: &AttributeMap, field: &str, value: &Value) -> bool {
    map.get(field)
        .and_then(Value::as_array)
        .is_some_and(|ids| ids.contains(value))
}

impl<'a, O: Associations, T: Associations> Many<'a, O, T> {
    /// Persist one member's linkage to a saved owner
    pub(crate) fn linkage_append(&mut self, doc: &mut T) -> OdmResult<()> {
        let owner_id = self.ensure_owner_saved()?;
        self.attach(&owner_id, doc)
    }

    /// Overwrite the stored relationship with a new member set
    ///
    /// Old members are unlinked first, then each new member is linked and
    /// persisted. Members appearing twice keep a single linkage. Returns
    /// the stored attribute form of the new target.
    pub(crate) fn linkage_replace(&mut self, docs: Vec<T>) -> OdmResult<Vec<AttributeMap>> {
        let owner_id = self.ensure_owner_saved()?;

        if self.definition.variant == ProxyVariant::InArray {
            return self.rewrite_owner_array(docs);
        }

        if let (Some(scope), Some(patch)) = (
            self.member_scope()?,
            release_patch(self.definition, &owner_id),
        ) {
            self.store
                .backend()
                .modify(&self.definition.target_collection, &scope, &patch)?;
        }

        let mut stored = Vec::with_capacity(docs.len());
        let mut seen: Vec<DocumentId> = Vec::new();
        for mut doc in docs {
            if let Some(id) = doc.id() {
                if seen.contains(&id) {
                    tracing::debug!(
                        association = %self.definition.name,
                        member = %id,
                        "member listed twice, linked once"
                    );
                    continue;
                }
            }
            self.attach(&owner_id, &mut doc)?;
            if let Some(id) = doc.id() {
                seen.push(id);
            }
            stored.push(doc.to_attributes()?);
        }
        Ok(stored)
    }

    fn attach(&mut self, owner_id: &DocumentId, doc: &mut T) -> OdmResult<()> {
        match self.definition.variant {
            ProxyVariant::ForeignKey | ProxyVariant::Polymorphic | ProxyVariant::InverseRole => {
                self.stamp_and_save(owner_id, doc)
            }
            ProxyVariant::InForeignArray => self.adopt_into_foreign_array(owner_id, doc),
            ProxyVariant::InArray => {
                if !doc.is_persisted() {
                    self.store.collection::<T>().save_or_fail(doc)?;
                }
                let id = doc
                    .id()
                    .ok_or_else(|| OdmError::storage("member id missing after save"))?;
                self.record_owner_id(&id)?;
                Ok(())
            }
            ProxyVariant::Embedded | ProxyVariant::EmbeddedPolymorphic => Err(
                OdmError::unsupported("append", self.definition.variant.name()),
            ),
        }
    }

    /// Write the owner's linkage fields onto the member and save it
    fn stamp_and_save(&mut self, owner_id: &DocumentId, doc: &mut T) -> OdmResult<()> {
        let mut map = doc.to_attributes()?;
        establish_in_map(
            self.definition,
            owner_id,
            self.owner.document_type(),
            &mut map,
        );
        *doc = T::from_attributes(map)?;
        self.store.collection::<T>().save_or_fail(doc)
    }

    /// Record the owner's id in the member's owner-id array
    ///
    /// An unsaved member is persisted, carrying the array with it. A
    /// member already listing the owner is left alone.
    fn adopt_into_foreign_array(&mut self, owner_id: &DocumentId, doc: &mut T) -> OdmResult<()> {
        let field = match self.definition.from_array_field.clone() {
            Some(field) => field,
            None => {
                return Err(OdmError::configuration(format!(
                    "association '{}' is missing its owner-id array field",
                    self.definition.name
                )))
            }
        };

        let mut map = doc.to_attributes()?;
        if array_contains(&map, &field, &owner_id.to_value()) {
            tracing::debug!(
                association = %self.definition.name,
                owner = %owner_id,
                "owner already listed on member"
            );
        } else {
            establish_in_map(
                self.definition,
                owner_id,
                self.owner.document_type(),
                &mut map,
            );
            *doc = T::from_attributes(map)?;
        }

        if !doc.is_persisted() {
            return self.store.collection::<T>().save_or_fail(doc);
        }
        let id = doc
            .id()
            .ok_or_else(|| OdmError::storage("member id missing after save"))?;
        let patch = Patch::new().add_to_set(&field, owner_id.to_value());
        self.store.backend().modify(
            &self.definition.target_collection,
            &Criteria::new().where_eq(ID_FIELD, id.to_value()),
            &patch,
        )?;
        Ok(())
    }

    /// Replace the owner's target-id array wholesale
    fn rewrite_owner_array(&mut self, docs: Vec<T>) -> OdmResult<Vec<AttributeMap>> {
        let field = match self.definition.in_array_field.clone() {
            Some(field) => field,
            None => {
                return Err(OdmError::configuration(format!(
                    "association '{}' is missing its target-id array field",
                    self.definition.name
                )))
            }
        };

        let mut stored = Vec::with_capacity(docs.len());
        let mut seen: Vec<DocumentId> = Vec::new();
        let mut ids: Vec<Value> = Vec::new();
        for mut doc in docs {
            if !doc.is_persisted() {
                self.store.collection::<T>().save_or_fail(&mut doc)?;
            }
            let id = doc
                .id()
                .ok_or_else(|| OdmError::storage("member id missing after save"))?;
            if seen.contains(&id) {
                tracing::debug!(
                    association = %self.definition.name,
                    member = %id,
                    "member listed twice, linked once"
                );
                continue;
            }
            seen.push(id);
            ids.push(id.to_value());
            stored.push(doc.to_attributes()?);
        }

        self.update_owner(|attrs| {
            attrs.insert(field, Value::Array(ids));
        })?;
        self.persist_owner()?;
        Ok(stored)
    }
}
