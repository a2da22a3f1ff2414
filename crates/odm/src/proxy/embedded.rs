//! Embedded Targets - Members stored inline in the owner document
//!
//! Embedded associations keep their members as an array of maps under the
//! association's own field on the owner. Reads parse that array, writes
//! rewrite it in memory, and persistence rides the owner's save. Members
//! are assigned an identifier the moment they are embedded so later loads
//! can tell them apart from pending ones.

use serde_json::Value;

use folio_core::document::{attribute_id, AttributeMap, Document, DocumentId};
use folio_core::error::{OdmError, OdmResult};

use crate::definition::Associations;
use crate::proxy::Many;

impl<'a, O: Associations, T: Associations> Many<'a, O, T> {
    /// Member maps stored inline under the association's field
    pub(crate) fn embedded_docs(&self) -> OdmResult<Vec<AttributeMap>> {
        let attrs = self.owner.to_attributes()?;
        let docs = match attrs.get(&self.definition.name) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map.clone()),
                    other => Err(OdmError::configuration(format!(
                        "embedded member of '{}' must be an object, got {}",
                        self.definition.name, other
                    ))),
                })
                .collect::<OdmResult<Vec<_>>>()?,
            _ => Vec::new(),
        };
        Ok(docs)
    }

    /// Replace the inline member array; the change rides the next owner
    /// save
    pub(crate) fn embedded_replace(&mut self, docs: Vec<T>) -> OdmResult<Vec<AttributeMap>> {
        let mut stored: Vec<AttributeMap> = Vec::with_capacity(docs.len());
        let mut seen: Vec<DocumentId> = Vec::new();
        for mut doc in docs {
            let id = ensure_member_id(&mut doc);
            if seen.contains(&id) {
                tracing::debug!(
                    association = %self.definition.name,
                    member = %id,
                    "member listed twice, embedded once"
                );
                continue;
            }
            seen.push(id);
            stored.push(doc.to_attributes()?);
        }

        let name = self.definition.name.clone();
        let inline: Vec<Value> = stored.iter().cloned().map(Value::Object).collect();
        self.update_owner(|attrs| {
            attrs.insert(name, Value::Array(inline));
        })?;
        Ok(stored)
    }

    /// Append one member to the inline array
    ///
    /// A member already embedded, by identifier, is a silent no-op.
    pub(crate) fn embedded_push(&mut self, doc: &mut T) -> OdmResult<()> {
        let id = ensure_member_id(doc);
        let present = self
            .embedded_docs()?
            .iter()
            .any(|map| attribute_id(map) == Some(id));
        if present {
            tracing::debug!(
                association = %self.definition.name,
                member = %id,
                "member already embedded, append skipped"
            );
            return Ok(());
        }

        let map = doc.to_attributes()?;
        let name = self.definition.name.clone();
        self.update_owner(|attrs| {
            let entry = attrs.entry(name).or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = entry {
                items.push(Value::Object(map));
            }
        })
    }
}

/// Embedded members get their identifier at embed time
fn ensure_member_id<T: Document>(doc: &mut T) -> DocumentId {
    match doc.id() {
        Some(id) => id,
        None => {
            let id = DocumentId::new();
            doc.set_id(id);
            id
        }
    }
}
