//! Association Metadata System - Declaration and variant selection
//!
//! An association is declared once per owner type and resolved to a proxy
//! variant at build time. The variant decides where the linkage lives:
//! a foreign key on the target, a role key pair on the target, an id array
//! on either side, or inline storage in the owner document.

use folio_core::criteria::Criteria;
use folio_core::document::{AssociationCache, AttributeMap, Document, DocumentId, ID_FIELD};
use folio_core::error::{OdmError, OdmResult};
use folio_core::inflect;
use folio_core::store::DocumentStore;

use crate::cascade;
use crate::persistence;

/// Erased cascade runner captured at declaration time
pub type CascadeFn =
    fn(&DocumentStore, &AssociationDefinition, &AttributeMap) -> OdmResult<usize>;

/// Erased autosave runner captured at declaration time
pub type AutosaveFn = fn(
    &DocumentStore,
    &AssociationDefinition,
    &mut AttributeMap,
    &mut AssociationCache,
) -> OdmResult<bool>;

/// Proxy variant an association declaration resolves to
///
/// Selection is priority ordered and the first matching branch wins, so
/// contradictory declarations stay deterministic instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyVariant {
    /// Type-tagged targets stored inline in the owner document
    EmbeddedPolymorphic,
    /// Targets stored inline in the owner document
    Embedded,
    /// Type-tagged targets in one shared collection, linked by foreign key
    Polymorphic,
    /// Targets carry a named role id and role type pair
    InverseRole,
    /// Targets carry an array of owner ids
    InForeignArray,
    /// The owner carries an array of target ids
    InArray,
    /// Targets carry the owner's foreign key
    ForeignKey,
}

impl ProxyVariant {
    /// Returns true if members live inside the owner document
    pub fn is_embedded(self) -> bool {
        matches!(self, Self::Embedded | Self::EmbeddedPolymorphic)
    }

    /// Returns true if the linkage is an id array on either side
    pub fn is_array_backed(self) -> bool {
        matches!(self, Self::InForeignArray | Self::InArray)
    }

    /// Returns true if members carry a type tag
    pub fn is_polymorphic(self) -> bool {
        matches!(self, Self::Polymorphic | Self::EmbeddedPolymorphic)
    }

    /// Stable name used in logs and error messages
    pub fn name(self) -> &'static str {
        match self {
            Self::EmbeddedPolymorphic => "embedded_polymorphic",
            Self::Embedded => "embedded",
            Self::Polymorphic => "polymorphic",
            Self::InverseRole => "inverse_role",
            Self::InForeignArray => "in_foreign_array",
            Self::InArray => "in_array",
            Self::ForeignKey => "foreign_key",
        }
    }
}

/// What happens to members when their owner is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependentPolicy {
    /// Leave members untouched
    #[default]
    None,
    /// Destroy members one by one, running their own cascades
    ///
    /// Mutually destructive policies between two types can recurse; cycles
    /// are not detected.
    Destroy,
    /// Remove members at the storage level, skipping their cascades
    DeleteAll,
    /// Clear the linkage, keeping members
    Nullify,
}

impl DependentPolicy {
    /// Stable name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Destroy => "destroy",
            Self::DeleteAll => "delete_all",
            Self::Nullify => "nullify",
        }
    }
}

/// Immutable metadata for one collection association
///
/// Built once per owner type and shared by every owner instance. The
/// erased cascade and autosave runners are monomorphized for the target
/// type when the declaration is built, so destroying an owner walks this
/// list without any global registry.
#[derive(Debug, Clone)]
pub struct AssociationDefinition {
    /// Association name on the owner ("lists")
    pub name: String,

    /// Owner document type name
    pub owner_name: &'static str,

    /// Target document type name, defaulted from the association name
    pub target_name: String,

    /// Collection the target type is stored in
    pub target_collection: String,

    /// Variant resolved from the declaration, fixed at build time
    pub variant: ProxyVariant,

    /// Field on the target carrying the owner id, for key-linked variants
    pub foreign_key: Option<String>,

    /// Field on the target carrying the owner type, for role-linked variants
    pub role_type_field: Option<String>,

    /// Array field on the owner holding target ids
    pub in_array_field: Option<String>,

    /// Array field on the target holding owner ids
    pub from_array_field: Option<String>,

    /// Lifecycle rule applied when the owner is destroyed
    pub dependent: DependentPolicy,

    /// Whether owner saves persist cached unsaved members
    pub autosave: bool,

    pub(crate) cascade: CascadeFn,
    pub(crate) autosave_run: AutosaveFn,
}

impl AssociationDefinition {
    /// Start declaring a collection association
    pub fn many(name: &str) -> AssociationBuilder {
        AssociationBuilder::new(name)
    }

    /// Criteria selecting this association's members in target storage
    ///
    /// Embedded variants have no storage scope; their members live in the
    /// owner document.
    pub fn scope(
        &self,
        owner_id: &DocumentId,
        owner_type: &str,
        owner_attrs: &AttributeMap,
    ) -> Criteria {
        match self.variant {
            ProxyVariant::ForeignKey | ProxyVariant::Polymorphic => Criteria::new().where_eq(
                self.foreign_key.as_deref().unwrap_or_default(),
                owner_id.to_value(),
            ),
            ProxyVariant::InverseRole => Criteria::new()
                .where_eq(
                    self.foreign_key.as_deref().unwrap_or_default(),
                    owner_id.to_value(),
                )
                .where_eq(
                    self.role_type_field.as_deref().unwrap_or_default(),
                    owner_type,
                ),
            ProxyVariant::InForeignArray => Criteria::new().where_eq(
                self.from_array_field.as_deref().unwrap_or_default(),
                owner_id.to_value(),
            ),
            ProxyVariant::InArray => {
                Criteria::new().where_in(ID_FIELD, self.stored_ids(owner_attrs))
            }
            ProxyVariant::Embedded | ProxyVariant::EmbeddedPolymorphic => Criteria::new(),
        }
    }

    /// Target ids recorded in the owner's id array
    pub fn stored_ids(&self, owner_attrs: &AttributeMap) -> Vec<serde_json::Value> {
        let field = match self.in_array_field.as_deref() {
            Some(field) => field,
            None => return Vec::new(),
        };
        owner_attrs
            .get(field)
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Check the declaration against the owner and target types it is
    /// opened with
    pub fn validate<O: Document, T: Document>(&self) -> OdmResult<()> {
        if O::document_name() != self.owner_name {
            return Err(OdmError::configuration(format!(
                "association '{}' belongs to '{}' but was opened on '{}'",
                self.name,
                self.owner_name,
                O::document_name()
            )));
        }
        if T::document_name() != self.target_name {
            return Err(OdmError::configuration(format!(
                "association '{}' targets '{}' but was opened as '{}'",
                self.name,
                self.target_name,
                T::document_name()
            )));
        }
        if T::embeddable() != self.variant.is_embedded() {
            return Err(OdmError::configuration(format!(
                "association '{}' resolved to the '{}' variant, which does not fit \
                 an {} target type",
                self.name,
                self.variant.name(),
                if T::embeddable() { "embeddable" } else { "independently stored" },
            )));
        }
        Ok(())
    }
}

/// Builder for association declarations
#[derive(Debug, Clone)]
pub struct AssociationBuilder {
    name: String,
    class_name: Option<String>,
    embedded: bool,
    polymorphic: bool,
    as_role: Option<String>,
    in_array_field: Option<String>,
    from_array_field: Option<String>,
    foreign_key: Option<String>,
    dependent: DependentPolicy,
    autosave: bool,
}

impl AssociationBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class_name: None,
            embedded: false,
            polymorphic: false,
            as_role: None,
            in_array_field: None,
            from_array_field: None,
            foreign_key: None,
            dependent: DependentPolicy::None,
            autosave: true,
        }
    }

    /// Override the target type name instead of deriving it from the
    /// association name
    pub fn class_name(mut self, name: &str) -> Self {
        self.class_name = Some(name.to_string());
        self
    }

    /// Store members inline in the owner document
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Tag members with their type so one collection can hold several
    /// target types
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    /// Link members through a named role: targets carry `<role>_id` and
    /// `<role>_type`
    pub fn as_role(mut self, role: &str) -> Self {
        self.as_role = Some(role.to_string());
        self
    }

    /// Link members through an array of owner ids on the target
    pub fn from_array(mut self, field: &str) -> Self {
        self.from_array_field = Some(field.to_string());
        self
    }

    /// Link members through an array of target ids on the owner
    pub fn in_array(mut self, field: &str) -> Self {
        self.in_array_field = Some(field.to_string());
        self
    }

    /// Override the foreign key field stored on targets
    pub fn foreign_key(mut self, field: &str) -> Self {
        self.foreign_key = Some(field.to_string());
        self
    }

    /// Set the lifecycle rule applied when the owner is destroyed
    pub fn dependent(mut self, policy: DependentPolicy) -> Self {
        self.dependent = policy;
        self
    }

    /// Control whether owner saves persist cached unsaved members
    pub fn autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    /// Resolve the variant and freeze the declaration for an owner and
    /// target type
    pub fn build<O: Document, T: Associations>(self) -> AssociationDefinition {
        let variant = self.select_variant();
        let target_name = self
            .class_name
            .clone()
            .unwrap_or_else(|| inflect::target_type_for(&self.name));

        let (foreign_key, role_type_field) = match variant {
            ProxyVariant::ForeignKey | ProxyVariant::Polymorphic => (
                Some(
                    self.foreign_key
                        .clone()
                        .unwrap_or_else(|| inflect::foreign_key_for(O::document_name())),
                ),
                None,
            ),
            ProxyVariant::InverseRole => {
                let role = self.as_role.as_deref().unwrap_or_default();
                (
                    Some(format!("{}_id", role)),
                    Some(format!("{}_type", role)),
                )
            }
            _ => (None, None),
        };

        AssociationDefinition {
            name: self.name,
            owner_name: O::document_name(),
            target_name,
            target_collection: T::collection_name(),
            variant,
            foreign_key,
            role_type_field,
            in_array_field: self.in_array_field,
            from_array_field: self.from_array_field,
            dependent: self.dependent,
            autosave: self.autosave,
            cascade: cascade::run_policy::<T>,
            autosave_run: persistence::autosave_members::<T>,
        }
    }

    fn select_variant(&self) -> ProxyVariant {
        if self.embedded && self.polymorphic {
            ProxyVariant::EmbeddedPolymorphic
        } else if self.embedded {
            ProxyVariant::Embedded
        } else if self.polymorphic {
            ProxyVariant::Polymorphic
        } else if self.as_role.is_some() {
            ProxyVariant::InverseRole
        } else if self.from_array_field.is_some() {
            ProxyVariant::InForeignArray
        } else if self.in_array_field.is_some() {
            ProxyVariant::InArray
        } else {
            ProxyVariant::ForeignKey
        }
    }
}

/// Association declarations carried by a document type
///
/// The returned slice is the owner's cascade order: policies run in
/// declaration order when the owner is destroyed.
pub trait Associations: Document {
    /// Declared collection associations, in declaration order
    fn associations() -> &'static [AssociationDefinition] {
        &[]
    }

    /// Look up a declaration by association name
    fn association(name: &str) -> Option<&'static AssociationDefinition> {
        Self::associations().iter().find(|def| def.name == name)
    }
}
