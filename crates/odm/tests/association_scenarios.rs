//! Target-id-array associations: the owner document carries the array of
//! member ids and every linkage change rewrites that array.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

use folio_core::backend::{MemoryBackend, StorageBackend};
use folio_core::document::AssociationCache;
use folio_core::{
    AttributeMap, Criteria, Document, DocumentId, DocumentStore, OdmResult, Patch,
    ValidationErrors,
};
use folio_odm::{AssociationDefinition, Associations, DocumentOps};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    name: String,
    #[serde(default)]
    list_ids: Vec<DocumentId>,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for User {
    fn document_name() -> &'static str {
        "User"
    }

    fn id(&self) -> Option<DocumentId> {
        self.id
    }

    fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }

    fn association_state(&self) -> &AssociationCache {
        &self.associations
    }

    fn association_state_mut(&mut self) -> &mut AssociationCache {
        &mut self.associations
    }
}

static USER_DEFS: Lazy<Vec<AssociationDefinition>> = Lazy::new(|| {
    vec![AssociationDefinition::many("lists")
        .in_array("list_ids")
        .build::<User, List>()]
});

impl Associations for User {
    fn associations() -> &'static [AssociationDefinition] {
        USER_DEFS.as_slice()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct List {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    name: String,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for List {
    fn document_name() -> &'static str {
        "List"
    }

    fn id(&self) -> Option<DocumentId> {
        self.id
    }

    fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }

    fn association_state(&self) -> &AssociationCache {
        &self.associations
    }

    fn association_state_mut(&mut self) -> &mut AssociationCache {
        &mut self.associations
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        if self.name.is_empty() {
            return Err(ValidationErrors::of("name", "can't be blank"));
        }
        Ok(())
    }
}

impl Associations for List {}

/// Backend double that tallies count calls so tests can tell whether an
/// operation consulted storage or answered from the owner document.
struct CountAuditBackend {
    inner: MemoryBackend,
    count_calls: AtomicUsize,
}

impl CountAuditBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            count_calls: AtomicUsize::new(0),
        }
    }

    fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }
}

impl StorageBackend for CountAuditBackend {
    fn find(&self, collection: &str, criteria: &Criteria) -> OdmResult<Vec<AttributeMap>> {
        self.inner.find(collection, criteria)
    }

    fn count(&self, collection: &str, criteria: &Criteria) -> OdmResult<usize> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.count(collection, criteria)
    }

    fn insert(&self, collection: &str, doc: AttributeMap) -> OdmResult<()> {
        self.inner.insert(collection, doc)
    }

    fn replace(&self, collection: &str, id: &DocumentId, doc: AttributeMap) -> OdmResult<bool> {
        self.inner.replace(collection, id, doc)
    }

    fn delete(&self, collection: &str, criteria: &Criteria) -> OdmResult<usize> {
        self.inner.delete(collection, criteria)
    }

    fn modify(&self, collection: &str, criteria: &Criteria, patch: &Patch) -> OdmResult<usize> {
        self.inner.modify(collection, criteria, patch)
    }

    fn drop_collection(&self, collection: &str) -> OdmResult<()> {
        self.inner.drop_collection(collection)
    }
}

fn saved_user(store: &DocumentStore) -> User {
    let mut user = User {
        name: "John".into(),
        ..Default::default()
    };
    store.collection::<User>().save_or_fail(&mut user).unwrap();
    user
}

fn saved_list(store: &DocumentStore, name: &str) -> List {
    let mut list = List {
        name: name.into(),
        ..Default::default()
    };
    store.collection::<List>().save_or_fail(&mut list).unwrap();
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pushing_the_same_member_twice_links_once() {
        let store = DocumentStore::in_memory();
        let mut user = saved_user(&store);
        let mut list = saved_list(&store, "Foo");
        let list_id = list.id.unwrap();

        let mut lists = user.many::<List>("lists", &store).unwrap();
        lists.push(&mut list).unwrap();
        lists.push(&mut list).unwrap();

        assert_eq!(lists.count(Criteria::new()).unwrap(), 1);
        drop(lists);
        assert_eq!(user.list_ids, vec![list_id]);
    }

    #[test]
    fn test_written_members_survive_save_and_reload_in_order() {
        let store = DocumentStore::in_memory();
        let mut user = saved_user(&store);

        let written = user
            .many::<List>("lists", &store)
            .unwrap()
            .write(vec![
                List {
                    name: "a".into(),
                    ..Default::default()
                },
                List {
                    name: "b".into(),
                    ..Default::default()
                },
            ])
            .unwrap();
        let written_ids: Vec<DocumentId> = written.iter().filter_map(|l| l.id).collect();
        assert_eq!(written_ids.len(), 2);

        user.save(&store).unwrap();
        user.reload(&store).unwrap();
        assert_eq!(user.list_ids, written_ids);

        let read_ids: Vec<DocumentId> = user
            .many::<List>("lists", &store)
            .unwrap()
            .read()
            .unwrap()
            .iter()
            .filter_map(|l| l.id)
            .collect();
        assert_eq!(read_ids, written_ids);
    }

    #[test]
    fn test_failed_create_leaves_the_association_untouched() {
        let store = DocumentStore::in_memory();
        let mut user = saved_user(&store);
        {
            let mut lists = user.many::<List>("lists", &store).unwrap();
            lists.create_or_fail(json!({"name": "Foo"})).unwrap();

            let err = lists.create_or_fail(json!({})).unwrap_err();
            assert!(err.is_validation());
            assert_eq!(lists.count(Criteria::new()).unwrap(), 1);
        }
        assert_eq!(user.list_ids.len(), 1);
        assert_eq!(store.collection::<List>().all().unwrap().len(), 1);
    }

    #[test]
    fn test_destroy_all_removes_member_documents() {
        let store = DocumentStore::in_memory();
        let mut user = saved_user(&store);
        {
            let mut lists = user.many::<List>("lists", &store).unwrap();
            lists.create_or_fail(json!({"name": "Foo"})).unwrap();
            lists.create_or_fail(json!({"name": "Bar"})).unwrap();

            assert_eq!(lists.destroy_all().unwrap(), 2);
            assert_eq!(lists.count(Criteria::new()).unwrap(), 0);
        }
        assert_eq!(user.list_ids, vec![]);
        assert_eq!(store.collection::<List>().all().unwrap().len(), 0);
    }

    #[test]
    fn test_destroy_matching_prunes_only_matching_ids() {
        let store = DocumentStore::in_memory();
        let mut user = saved_user(&store);

        let mut lists = user.many::<List>("lists", &store).unwrap();
        lists.create_or_fail(json!({"name": "Foo"})).unwrap();
        let bar = lists.create_or_fail(json!({"name": "Bar"})).unwrap();

        let removed = lists
            .destroy_matching(Criteria::new().where_eq("name", "Foo"))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(lists.count(Criteria::new()).unwrap(), 1);
        drop(lists);
        assert_eq!(user.list_ids, vec![bar.id.unwrap()]);
    }

    #[test]
    fn test_nullify_clears_linkage_but_keeps_documents() {
        let store = DocumentStore::in_memory();
        let mut user = saved_user(&store);
        {
            let mut lists = user.many::<List>("lists", &store).unwrap();
            lists.create_or_fail(json!({"name": "Foo"})).unwrap();
            lists.create_or_fail(json!({"name": "Bar"})).unwrap();

            lists.nullify().unwrap();
            assert_eq!(lists.count(Criteria::new()).unwrap(), 0);
        }
        assert_eq!(user.list_ids, vec![]);
        assert_eq!(store.collection::<List>().all().unwrap().len(), 2);
    }

    #[test]
    fn test_plain_count_reads_the_owner_array_not_storage() {
        let backend = Arc::new(CountAuditBackend::new());
        let store = DocumentStore::new(backend.clone());
        let mut user = saved_user(&store);

        let mut lists = user.many::<List>("lists", &store).unwrap();
        lists.create_or_fail(json!({"name": "Foo"})).unwrap();
        lists.create_or_fail(json!({"name": "Bar"})).unwrap();

        let calls_before = backend.count_calls();
        assert_eq!(lists.count(Criteria::new()).unwrap(), 2);
        assert_eq!(backend.count_calls(), calls_before);

        assert_eq!(
            lists
                .count(Criteria::new().where_eq("name", "Foo"))
                .unwrap(),
            1
        );
        assert_eq!(backend.count_calls(), calls_before + 1);
    }

    #[test]
    fn test_replacing_the_array_keeps_old_members_on_disk() {
        let store = DocumentStore::in_memory();
        let mut user = saved_user(&store);
        let old = saved_list(&store, "Old");
        let new = saved_list(&store, "New");

        {
            let mut lists = user.many::<List>("lists", &store).unwrap();
            lists.write(vec![old.clone()]).unwrap();
            lists.write(vec![new.clone()]).unwrap();
            assert_eq!(lists.read().unwrap(), vec![new.clone()]);
        }
        assert_eq!(user.list_ids, vec![new.id.unwrap()]);
        assert_eq!(store.collection::<List>().all().unwrap().len(), 2);
    }
}
