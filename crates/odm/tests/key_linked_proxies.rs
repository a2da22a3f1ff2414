//! Key-linked associations: members carry the owner's id in a foreign key
//! field, optionally joined by a role or type tag.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

use folio_core::document::AssociationCache;
use folio_core::{Criteria, Document, DocumentId, DocumentStore, ValidationErrors};
use folio_odm::{AssociationDefinition, Associations, DocumentOps};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Blog {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    title: String,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for Blog {
    fn document_name() -> &'static str {
        "Blog"
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

static BLOG_DEFS: Lazy<Vec<AssociationDefinition>> =
    Lazy::new(|| vec![AssociationDefinition::many("articles").build::<Blog, Article>()]);

impl Associations for Blog {
    fn associations() -> &'static [AssociationDefinition] {
        BLOG_DEFS.as_slice()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Article {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    headline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    blog_id: Option<DocumentId>,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for Article {
    fn document_name() -> &'static str {
        "Article"
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
        if self.headline.is_empty() {
            return Err(ValidationErrors::of("headline", "can't be blank"));
        }
        Ok(())
    }
}

impl Associations for Article {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Page {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    slug: String,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for Page {
    fn document_name() -> &'static str {
        "Page"
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

static PAGE_DEFS: Lazy<Vec<AssociationDefinition>> = Lazy::new(|| {
    vec![AssociationDefinition::many("notes")
        .as_role("annotatable")
        .build::<Page, Note>()]
});

impl Associations for Page {
    fn associations() -> &'static [AssociationDefinition] {
        PAGE_DEFS.as_slice()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Essay {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    slug: String,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for Essay {
    fn document_name() -> &'static str {
        "Essay"
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

static ESSAY_DEFS: Lazy<Vec<AssociationDefinition>> = Lazy::new(|| {
    vec![AssociationDefinition::many("notes")
        .as_role("annotatable")
        .build::<Essay, Note>()]
});

impl Associations for Essay {
    fn associations() -> &'static [AssociationDefinition] {
        ESSAY_DEFS.as_slice()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Note {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotatable_id: Option<DocumentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotatable_type: Option<String>,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for Note {
    fn document_name() -> &'static str {
        "Note"
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

impl Associations for Note {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Feed {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    name: String,
    #[serde(skip)]
    associations: AssociationCache,
}

impl Document for Feed {
    fn document_name() -> &'static str {
        "Feed"
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

static FEED_DEFS: Lazy<Vec<AssociationDefinition>> = Lazy::new(|| {
    vec![AssociationDefinition::many("attachments")
        .polymorphic()
        .build::<Feed, Attachment>()]
});

impl Associations for Feed {
    fn associations() -> &'static [AssociationDefinition] {
        FEED_DEFS.as_slice()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    feed_id: Option<DocumentId>,
    #[serde(flatten)]
    kind: AttachmentKind,
    #[serde(skip)]
    associations: AssociationCache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type")]
enum AttachmentKind {
    Photo { width: i64 },
    Clip { seconds: i64 },
}

impl Default for Attachment {
    fn default() -> Self {
        Self {
            id: None,
            feed_id: None,
            kind: AttachmentKind::Photo { width: 0 },
            associations: AssociationCache::default(),
        }
    }
}

impl Document for Attachment {
    fn document_name() -> &'static str {
        "Attachment"
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

    fn document_type(&self) -> &'static str {
        match self.kind {
            AttachmentKind::Photo { .. } => "Photo",
            AttachmentKind::Clip { .. } => "Clip",
        }
    }
}

impl Associations for Attachment {}

fn saved<D: Document>(store: &DocumentStore, mut doc: D) -> D {
    store.collection::<D>().save_or_fail(&mut doc).unwrap();
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stamps_the_foreign_key() {
        let store = DocumentStore::in_memory();
        let mut blog = saved(
            &store,
            Blog {
                title: "Engineering".into(),
                ..Default::default()
            },
        );
        let blog_id = blog.id.unwrap();

        let created = blog
            .many::<Article>("articles", &store)
            .unwrap()
            .create_or_fail(json!({"headline": "Hello"}))
            .unwrap();
        assert_eq!(created.blog_id, Some(blog_id));

        let stored = store
            .collection::<Article>()
            .find_by_id_or_fail(&created.id.unwrap())
            .unwrap();
        assert_eq!(stored.blog_id, Some(blog_id));
    }

    #[test]
    fn test_reads_scope_to_the_owning_key() {
        let store = DocumentStore::in_memory();
        let mut ours = saved(
            &store,
            Blog {
                title: "Ours".into(),
                ..Default::default()
            },
        );
        let mut theirs = saved(
            &store,
            Blog {
                title: "Theirs".into(),
                ..Default::default()
            },
        );

        let mine = ours
            .many::<Article>("articles", &store)
            .unwrap()
            .create_or_fail(json!({"headline": "Mine"}))
            .unwrap();
        theirs
            .many::<Article>("articles", &store)
            .unwrap()
            .create_or_fail(json!({"headline": "Yours"}))
            .unwrap();

        let mut articles = ours.many::<Article>("articles", &store).unwrap();
        assert_eq!(articles.read().unwrap(), vec![mine]);
        assert_eq!(articles.count(Criteria::new()).unwrap(), 1);
    }

    #[test]
    fn test_nullify_unsets_the_foreign_key() {
        let store = DocumentStore::in_memory();
        let mut blog = saved(
            &store,
            Blog {
                title: "Engineering".into(),
                ..Default::default()
            },
        );

        let mut articles = blog.many::<Article>("articles", &store).unwrap();
        let created = articles.create_or_fail(json!({"headline": "Hello"})).unwrap();
        assert_eq!(articles.nullify().unwrap(), 1);
        assert_eq!(articles.count(Criteria::new()).unwrap(), 0);

        let stored = store
            .collection::<Article>()
            .find_by_id_or_fail(&created.id.unwrap())
            .unwrap();
        assert_eq!(stored.blog_id, None);
    }

    #[test]
    fn test_role_links_carry_the_owner_type() {
        let store = DocumentStore::in_memory();
        let mut page = saved(
            &store,
            Page {
                slug: "home".into(),
                ..Default::default()
            },
        );
        let page_id = page.id.unwrap();

        let created = page
            .many::<Note>("notes", &store)
            .unwrap()
            .create_or_fail(json!({"body": "Check this"}))
            .unwrap();
        assert_eq!(created.annotatable_id, Some(page_id));
        assert_eq!(created.annotatable_type.as_deref(), Some("Page"));
    }

    #[test]
    fn test_role_scope_requires_both_id_and_type() {
        let store = DocumentStore::in_memory();
        let mut page = saved(
            &store,
            Page {
                slug: "home".into(),
                ..Default::default()
            },
        );
        let page_id = page.id.unwrap();

        let mut notes = page.many::<Note>("notes", &store).unwrap();
        let mine = notes.create_or_fail(json!({"body": "Mine"})).unwrap();

        // Same id, wrong role type: never a member.
        saved(
            &store,
            Note {
                body: "Impostor".into(),
                annotatable_id: Some(page_id),
                annotatable_type: Some("Essay".into()),
                ..Default::default()
            },
        );

        assert_eq!(notes.read().unwrap(), vec![mine]);
        assert_eq!(notes.count(Criteria::new()).unwrap(), 1);
    }

    #[test]
    fn test_owners_of_different_types_share_the_collection() {
        let store = DocumentStore::in_memory();
        let mut page = saved(
            &store,
            Page {
                slug: "home".into(),
                ..Default::default()
            },
        );
        let mut essay = saved(
            &store,
            Essay {
                slug: "intro".into(),
                ..Default::default()
            },
        );

        page.many::<Note>("notes", &store)
            .unwrap()
            .create_or_fail(json!({"body": "On the page"}))
            .unwrap();
        essay
            .many::<Note>("notes", &store)
            .unwrap()
            .create_or_fail(json!({"body": "On the essay"}))
            .unwrap();

        assert_eq!(store.collection::<Note>().all().unwrap().len(), 2);
        let mut page_notes = page.many::<Note>("notes", &store).unwrap();
        assert_eq!(page_notes.read().unwrap()[0].body, "On the page");
        let mut essay_notes = essay.many::<Note>("notes", &store).unwrap();
        assert_eq!(essay_notes.read().unwrap()[0].body, "On the essay");
    }

    #[test]
    fn test_nullify_clears_both_role_fields() {
        let store = DocumentStore::in_memory();
        let mut page = saved(
            &store,
            Page {
                slug: "home".into(),
                ..Default::default()
            },
        );

        let mut notes = page.many::<Note>("notes", &store).unwrap();
        let created = notes.create_or_fail(json!({"body": "Mine"})).unwrap();
        assert_eq!(notes.nullify().unwrap(), 1);

        let stored = store
            .collection::<Note>()
            .find_by_id_or_fail(&created.id.unwrap())
            .unwrap();
        assert_eq!(stored.annotatable_id, None);
        assert_eq!(stored.annotatable_type, None);
    }

    #[test]
    fn test_polymorphic_members_round_trip_their_tags() {
        let store = DocumentStore::in_memory();
        let mut feed = saved(
            &store,
            Feed {
                name: "Main".into(),
                ..Default::default()
            },
        );
        let feed_id = feed.id.unwrap();

        {
            let mut attachments = feed.many::<Attachment>("attachments", &store).unwrap();
            attachments
                .write(vec![Attachment {
                    kind: AttachmentKind::Photo { width: 800 },
                    ..Default::default()
                }])
                .unwrap();
            attachments
                .create_or_fail(json!({"_type": "Clip", "seconds": 30}))
                .unwrap();
        }

        let mut fetched = store
            .collection::<Feed>()
            .find_by_id_or_fail(&feed_id)
            .unwrap();
        let members = fetched
            .many::<Attachment>("attachments", &store)
            .unwrap()
            .read()
            .unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].kind, AttachmentKind::Photo { width: 800 });
        assert_eq!(members[1].kind, AttachmentKind::Clip { seconds: 30 });
        assert!(members.iter().all(|a| a.feed_id == Some(feed_id)));
    }

    #[test]
    fn test_polymorphic_scope_excludes_other_feeds() {
        let store = DocumentStore::in_memory();
        let mut main = saved(
            &store,
            Feed {
                name: "Main".into(),
                ..Default::default()
            },
        );
        let mut side = saved(
            &store,
            Feed {
                name: "Side".into(),
                ..Default::default()
            },
        );

        main.many::<Attachment>("attachments", &store)
            .unwrap()
            .create_or_fail(json!({"_type": "Photo", "width": 400}))
            .unwrap();
        side.many::<Attachment>("attachments", &store)
            .unwrap()
            .create_or_fail(json!({"_type": "Clip", "seconds": 5}))
            .unwrap();

        let mut attachments = main.many::<Attachment>("attachments", &store).unwrap();
        let members = attachments.read().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].kind, AttachmentKind::Photo { width: 400 });
    }
}
