//! # folio-core: Document and Storage Foundations for folio
//!
//! This crate provides the collaborators the folio document mapper is
//! built on: the Document trait with identity and attribute
//! serialization, criteria for narrowing and ordering collections,
//! partial-update patches, the storage backend contract with an
//! in-memory engine, and the typed document store.

pub mod backend;
pub mod criteria;
pub mod document;
pub mod error;
pub mod inflect;
pub mod patch;
pub mod store;

// Re-export core traits and types
pub use backend::{MemoryBackend, StorageBackend};
pub use criteria::{CompareOp, Condition, Criteria, OrderClause, OrderDirection, Page};
pub use document::{
    attribute_id, AssociationCache, AttributeMap, CachedTarget, Document, DocumentId,
    ValidationErrors, ID_FIELD, TYPE_FIELD,
};
pub use error::{OdmError, OdmResult};
pub use patch::{Patch, PatchOp};
pub use store::{Collection, DocumentStore};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
