//! # folio-odm: Association mapping for folio documents
//!
//! Declares collection associations on document types and serves them
//! through lazily loaded, mutation-aware proxies. A declaration resolves
//! to one of seven variants at build time, each with its own linkage
//! mechanics, and carries its dependent policy and autosave behavior with
//! it, so a document's association list is also its cascade order.
//!
//! ## Quick start
//!
//! ```ignore
//! static DEFS: Lazy<Vec<AssociationDefinition>> = Lazy::new(|| {
//!     vec![AssociationDefinition::many("tickets")
//!         .dependent(DependentPolicy::Destroy)
//!         .build::<Project, Ticket>()]
//! });
//!
//! impl Associations for Project {
//!     fn associations() -> &'static [AssociationDefinition] {
//!         DEFS.as_slice()
//!     }
//! }
//!
//! let mut tickets = project.many::<Ticket>("tickets", &store)?;
//! tickets.create(json!({"title": "fix pagination"}))?;
//! ```

mod cascade;
pub mod definition;
pub mod persistence;
pub mod proxy;

pub use definition::{
    AssociationBuilder, AssociationDefinition, Associations, DependentPolicy, ProxyVariant,
};
pub use persistence::DocumentOps;
pub use proxy::Many;

/// Version of the folio-odm crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
