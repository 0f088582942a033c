use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rampart_cache::{CacheError, CacheLayer, CacheStore};
use rampart_core::{AppError, BeanRegistry, BoxFuture, RampartConfig, Subject};
use rampart_data::{Entity, EntityBase, EntityDescriptor, FilterRequest, MemoryDocumentStore, StorageBackend};
use rampart_events::{ChangeEvent, ChangeKind, Notifier};
use rampart_repository::{EntityRepository, EntitySettings, OperationOptions, TypeRegistry};
use rampart_security::{
    AccessControlList, AccessResolver, AclRecord, Action, DefaultAcl, SecurityConfig, UndecidedPolicy,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ── Entities ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Widget {
    #[serde(flatten)]
    base: EntityBase,
    code: String,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    n: i64,
    #[serde(default)]
    deleted: bool,
}

impl Widget {
    fn new(code: &str) -> Self {
        Self {
            base: EntityBase::default(),
            code: code.to_string(),
            product: None,
            owner: None,
            n: 0,
            deleted: false,
        }
    }

    fn product(mut self, product: &str) -> Self {
        self.product = Some(product.to_string());
        self
    }

    fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    fn n(mut self, n: i64) -> Self {
        self.n = n;
        self
    }
}

impl Entity for Widget {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("widgets")
            .identified_by(&["code"])
            .scoped_by("product")
            .owned_by("owner")
            .soft_delete()
    }

    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        &mut self.base
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    #[serde(flatten)]
    base: EntityBase,
    text: String,
}

impl Entity for Note {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("notes").track_history()
    }

    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        &mut self.base
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Doc {
    #[serde(flatten)]
    base: EntityBase,
    title: String,
}

impl Entity for Doc {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("docs").record_acls()
    }

    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        &mut self.base
    }
}

/// Versioned entity with per-record lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Memo {
    #[serde(flatten)]
    base: EntityBase,
    text: String,
}

impl Entity for Memo {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("memos").track_history().record_acls()
    }

    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        &mut self.base
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Circle {
    #[serde(flatten)]
    base: EntityBase,
    radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Square {
    #[serde(flatten)]
    base: EntityBase,
    side: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Shape {
    Circle(Circle),
    Square(Square),
}

impl Entity for Shape {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("shapes").discriminated_by("kind")
    }

    fn base(&self) -> &EntityBase {
        match self {
            Shape::Circle(c) => &c.base,
            Shape::Square(s) => &s.base,
        }
    }

    fn base_mut(&mut self) -> &mut EntityBase {
        match self {
            Shape::Circle(c) => &mut c.base,
            Shape::Square(s) => &mut s.base,
        }
    }
}

// ── Test doubles ───────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct RecordingNotifier {
    events: Arc<Mutex<Vec<(String, ChangeEvent)>>>,
}

impl RecordingNotifier {
    fn take(&self) -> Vec<(String, ChangeEvent)> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl Notifier for RecordingNotifier {
    fn publish<'a>(&'a self, topic: &'a str, event: ChangeEvent) -> BoxFuture<'a, ()> {
        self.events.lock().unwrap().push((topic.to_string(), event));
        Box::pin(async {})
    }
}

/// Store whose every entry is the same bogus payload.
struct GarbageStore(&'static [u8]);

impl CacheStore for GarbageStore {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Option<Bytes>> {
        let payload = Bytes::from_static(self.0);
        Box::pin(async move { Some(payload) })
    }

    fn set<'a>(&'a self, _key: &'a str, _value: Bytes, _ttl: std::time::Duration) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }

    fn remove<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn remove_by_prefix<'a>(&'a self, _prefix: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

// ── Fixture ────────────────────────────────────────────────────────────

struct Fixture {
    backend: Arc<dyn StorageBackend>,
    cache: CacheLayer,
    resolver: AccessResolver,
    notifier: RecordingNotifier,
}

impl Fixture {
    fn new() -> Self {
        Self::with(SecurityConfig::default())
    }

    fn with(security: SecurityConfig) -> Self {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryDocumentStore::new());
        let resolver = AccessResolver::new(backend.clone(), CacheLayer::in_memory(), security);
        Self {
            backend,
            cache: CacheLayer::in_memory(),
            resolver,
            notifier: RecordingNotifier::default(),
        }
    }

    fn repo<T: Entity>(&self) -> EntityRepository<T> {
        EntityRepository::new(
            self.backend.clone(),
            self.cache.clone(),
            self.resolver.clone(),
            Arc::new(self.notifier.clone()),
        )
    }
}

fn system() -> OperationOptions {
    OperationOptions::system()
}

fn query(q: &str) -> FilterRequest {
    FilterRequest::from_query(q)
}

// ── Create / fetch ─────────────────────────────────────────────────────

#[tokio::test]
async fn create_assigns_identity_and_seeds_cache() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();

    let created = widgets.create(Widget::new("w-1"), &system()).await.unwrap();
    assert!(!created.base.uid.is_empty());
    assert_eq!(created.base.version, 0);
    assert_eq!(created.base.date_created, created.base.date_modified);

    let by_uid = widgets.fetch_object(&created.base.uid, &system()).await.unwrap();
    assert_eq!(by_uid.as_ref(), Some(&created));
    let by_code = widgets.fetch_object("w-1", &system()).await.unwrap();
    assert_eq!(by_code, Some(created));
    assert!(widgets.fetch_object("nope", &system()).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_identifier_respects_scope() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();

    widgets.create(Widget::new("dup"), &system()).await.unwrap();
    let err = widgets.create(Widget::new("dup"), &system()).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateIdentifier(_)));

    widgets.create(Widget::new("shared").product("p1"), &system()).await.unwrap();
    widgets.create(Widget::new("shared").product("p2"), &system()).await.unwrap();
    let err = widgets
        .create(Widget::new("shared"), &system().scope("p1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateIdentifier(_)));
}

#[tokio::test]
async fn scope_option_restricts_fetch() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    widgets.create(Widget::new("s").product("p1"), &system()).await.unwrap();

    assert!(widgets.fetch_object("s", &system().scope("p1")).await.unwrap().is_some());
    assert!(widgets.fetch_object("s", &system().scope("p2")).await.unwrap().is_none());

    let err = fx.repo::<Note>().fetch_object("x", &system().scope("p1")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

// ── Update ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_enforces_optimistic_version() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    let original = widgets.create(Widget::new("v").n(1), &system()).await.unwrap();

    let updated = widgets
        .update(json!({"version": 0, "n": 2}), &original, &system())
        .await
        .unwrap();
    assert_eq!(updated.base.version, 1);
    assert_eq!(updated.n, 2);
    assert_eq!(updated.base.date_created, original.base.date_created);

    let err = widgets
        .update(json!({"version": 0, "n": 3}), &original, &system())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VersionConflict(_)));

    let err = widgets
        .update(json!({"version": 0, "n": 3}), &updated, &system())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VersionConflict(_)));

    let stored = widgets.fetch_object("v", &system().skip_cache()).await.unwrap().unwrap();
    assert_eq!(stored.base.version, 1);
    assert_eq!(stored.n, 2);

    let again = widgets
        .update(json!({"n": 4}), &stored, &system().version(1))
        .await
        .unwrap();
    assert_eq!(again.base.version, 2);
}

#[tokio::test]
async fn update_rejects_malformed_input() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    let w = widgets.create(Widget::new("m"), &system()).await.unwrap();

    for partial in [json!({"version": 0, "uid": "other"}), json!({"n": 1}), json!([1, 2])] {
        let err = widgets.update(partial, &w, &system()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{err}");
    }
}

#[tokio::test]
async fn update_refreshes_cached_record() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    let w = widgets.create(Widget::new("c").n(1), &system()).await.unwrap();
    assert_eq!(widgets.fetch_object("c", &system()).await.unwrap().unwrap().n, 1);

    widgets.update(json!({"version": 0, "n": 9}), &w, &system()).await.unwrap();
    assert_eq!(widgets.fetch_object("c", &system()).await.unwrap().unwrap().n, 9);
    assert_eq!(widgets.fetch_object(&w.base.uid, &system()).await.unwrap().unwrap().n, 9);
}

// ── History ────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_keeps_every_version() {
    let fx = Fixture::new();
    let notes = fx.repo::<Note>();

    let v0 = notes
        .create(
            Note {
                base: EntityBase::with_uid("n1"),
                text: "first".into(),
            },
            &system(),
        )
        .await
        .unwrap();
    let v1 = notes.update(json!({"version": 0, "text": "second"}), &v0, &system()).await.unwrap();
    let v2 = notes.update(json!({"version": 1, "text": "third"}), &v1, &system()).await.unwrap();
    assert_eq!(v2.base.version, 2);

    // Stale base: version 1 already exists.
    let err = notes.update(json!({"version": 0, "text": "lost"}), &v0, &system()).await.unwrap_err();
    assert!(matches!(err, AppError::VersionConflict(_)));

    let current = notes.fetch_object("n1", &system().skip_cache()).await.unwrap().unwrap();
    assert_eq!(current.text, "third");
    let pinned = notes.fetch_object("n1", &system().version(1)).await.unwrap().unwrap();
    assert_eq!(pinned.text, "second");

    let history = notes.history("n1", &system()).await.unwrap();
    let texts: Vec<&str> = history.iter().map(|n| n.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);

    // Creating the same uid again appends the next version.
    let recreated = notes
        .create(
            Note {
                base: EntityBase::with_uid("n1"),
                text: "fourth".into(),
            },
            &system(),
        )
        .await
        .unwrap();
    assert_eq!(recreated.base.version, 3);
}

// ── Delete / restore ───────────────────────────────────────────────────

#[tokio::test]
async fn soft_delete_then_purge() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    let w = widgets.create(Widget::new("d").product("p1"), &system()).await.unwrap();
    let scoped = system().scope("p1");

    assert_eq!(widgets.fetch_object("d", &scoped).await.unwrap().unwrap().base.uid, w.base.uid);
    assert_eq!(widgets.delete("d", &scoped).await.unwrap(), 1);

    assert!(widgets.fetch_object("d", &scoped).await.unwrap().is_none());
    assert!(widgets.fetch_object("d", &system()).await.unwrap().is_none());
    let flagged = widgets.fetch_object("d", &scoped.clone().purge()).await.unwrap().unwrap();
    assert!(flagged.deleted);
    assert_eq!(widgets.count(&query(""), &system()).await.unwrap(), 0);
    assert_eq!(widgets.count(&query(""), &system().purge()).await.unwrap(), 1);

    assert_eq!(widgets.delete("d", &scoped.clone().purge()).await.unwrap(), 1);
    assert!(widgets.fetch_object("d", &scoped.clone().purge()).await.unwrap().is_none());
    assert!(widgets.fetch_object("d", &system().purge().skip_cache()).await.unwrap().is_none());

    let err = widgets.delete("d", &scoped.purge()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn restore_clears_soft_delete() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    widgets.create(Widget::new("r"), &system()).await.unwrap();
    widgets.delete("r", &system()).await.unwrap();
    assert!(widgets.fetch_object("r", &system()).await.unwrap().is_none());

    let restored = widgets.restore("r", &system()).await.unwrap();
    assert!(!restored.deleted);
    assert!(widgets.fetch_object("r", &system()).await.unwrap().is_some());

    let err = fx.repo::<Note>().restore("r", &system()).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn hard_delete_for_plain_collections() {
    let fx = Fixture::new();
    let notes = fx.repo::<Note>();
    let v0 = notes
        .create(
            Note {
                base: EntityBase::with_uid("h"),
                text: "a".into(),
            },
            &system(),
        )
        .await
        .unwrap();
    notes.update(json!({"version": 0, "text": "b"}), &v0, &system()).await.unwrap();

    assert_eq!(notes.delete("h", &system()).await.unwrap(), 2);
    assert!(notes.fetch_object("h", &system()).await.unwrap().is_none());
    assert!(notes.history("h", &system()).await.unwrap().is_empty());
}

#[tokio::test]
async fn truncate_empties_collection() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    widgets.create(Widget::new("t1"), &system()).await.unwrap();
    widgets.fetch_object("t1", &system()).await.unwrap();

    widgets.truncate(&system()).await.unwrap();
    widgets.truncate(&system()).await.unwrap();
    assert!(widgets.fetch_object("t1", &system()).await.unwrap().is_none());
    assert_eq!(widgets.count(&query(""), &system()).await.unwrap(), 0);
}

// ── Find ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn find_pages_and_filters() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    for (code, n) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
        widgets.create(Widget::new(code).n(n), &system()).await.unwrap();
    }
    widgets.delete("d", &system()).await.unwrap();

    let page = widgets
        .find(&query("n=gte(2)&sort=n&limit=1&page=1"), &system())
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.skip, 1);
    assert_eq!(page.content.len(), 1);
    assert_eq!(page.content[0].code, "c");
    assert!(!page.has_more());

    let page = widgets.find(&query("code=a&code=c&sort=code"), &system()).await.unwrap();
    let codes: Vec<&str> = page.content.iter().map(|w| w.code.as_str()).collect();
    assert_eq!(codes, vec!["a", "c"]);

    assert_eq!(widgets.count(&query("n=range(1,3)"), &system()).await.unwrap(), 3);
    assert_eq!(widgets.count(&query("n=range(1,4)"), &system().purge()).await.unwrap(), 4);
}

#[tokio::test]
async fn me_needs_a_subject() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    let alice = Subject::new("alice");
    widgets
        .create(Widget::new("mine").owner("me"), &OperationOptions::as_subject(alice.clone()))
        .await
        .unwrap();

    let mine = widgets
        .find(&query("owner=me"), &OperationOptions::as_subject(alice.clone()))
        .await
        .unwrap();
    assert_eq!(mine.content.len(), 1);
    assert_eq!(mine.content[0].owner.as_deref(), Some("alice"));

    let err = widgets.fetch_object("me", &OperationOptions::new()).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    let err = widgets.delete("me", &OperationOptions::new()).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    let err = widgets.find(&query("owner=me"), &OperationOptions::new()).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert!(widgets.fetch_object("me", &OperationOptions::as_subject(alice)).await.unwrap().is_none());
}

// ── Cache ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_cache_payloads_are_ignored() {
    for payload in [&b"{not json"[..], &b"[1, 2, 3]"[..]] {
        let fx = Fixture::new();
        let widgets = EntityRepository::<Widget>::new(
            fx.backend.clone(),
            CacheLayer::new(Arc::new(GarbageStore(payload))),
            fx.resolver.clone(),
            Arc::new(fx.notifier.clone()),
        );
        widgets.create(Widget::new("g"), &system()).await.unwrap();
        let found = widgets.fetch_object("g", &system()).await.unwrap().unwrap();
        assert_eq!(found.code, "g");
    }
}

#[tokio::test]
async fn reads_are_served_from_cache_until_skipped() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();
    let w = widgets.create(Widget::new("k").n(1), &system()).await.unwrap();

    // Write behind the repository's back.
    let mut patch = serde_json::Map::new();
    patch.insert("n".into(), json!(7));
    let query = rampart_data::translator(fx.backend.kind())
        .identifier_query(&rampart_data::IdentifierLookup::new(w.base.uid.clone(), ["uid"]));
    fx.backend.update_many("widgets", &query, patch).await.unwrap();

    assert_eq!(widgets.fetch_object(&w.base.uid, &system()).await.unwrap().unwrap().n, 1);
    assert_eq!(widgets.fetch_object(&w.base.uid, &system().skip_cache()).await.unwrap().unwrap().n, 7);
}

// ── Notifications ──────────────────────────────────────────────────────

#[tokio::test]
async fn changes_are_published_to_owner_and_record_topics() {
    let fx = Fixture::new();
    let widgets = fx.repo::<Widget>();

    let w = widgets.create(Widget::new("e").owner("alice"), &system()).await.unwrap();
    let uid = w.base.uid.clone();
    let events = fx.notifier.take();
    let topics: Vec<&str> = events.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(topics, vec!["alice", uid.as_str()]);
    assert!(events.iter().all(|(_, e)| e.kind == ChangeKind::Create && e.payload.is_some()));

    widgets.update(json!({"version": 0, "n": 1}), &w, &system()).await.unwrap();
    let events = fx.notifier.take();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].1.kind, ChangeKind::Update);
    assert_eq!(events[0].1.version, 1);

    widgets.delete("e", &system().purge()).await.unwrap();
    let events = fx.notifier.take();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].0, uid);
    assert_eq!(events[1].1.kind, ChangeKind::Delete);
    assert!(events[1].1.payload.is_none());
}

// ── Access control ─────────────────────────────────────────────────────

fn guarded(fx: &Fixture) -> EntityRepository<Widget> {
    let default = DefaultAcl {
        uid: "widgets".into(),
        parent_uid: None,
        records: vec![
            AclRecord::crud("editor"),
            AclRecord::new(".*").grant(Action::Read, true),
        ],
    };
    fx.repo::<Widget>()
        .with_settings(EntitySettings::for_descriptor(&Widget::descriptor()).with_default_acl(default))
}

#[tokio::test]
async fn collection_acl_guards_operations() {
    let fx = Fixture::with(SecurityConfig::default().with_undecided(UndecidedPolicy::Deny));
    let widgets = guarded(&fx);
    let editor = OperationOptions::as_subject(Subject::new("ed").with_roles(["editor"]));
    let reader = OperationOptions::as_subject(Subject::new("re"));

    let err = widgets.create(Widget::new("x"), &reader).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    let err = widgets.create(Widget::new("x"), &OperationOptions::new()).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));

    let w = widgets.create(Widget::new("x"), &editor).await.unwrap();
    assert_eq!(widgets.find(&query(""), &reader).await.unwrap().total, 1);
    assert!(matches!(
        widgets.find(&query(""), &OperationOptions::new()).await.unwrap_err(),
        AppError::PermissionDenied(_)
    ));

    let err = widgets.update(json!({"version": 0}), &w, &reader).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    let err = widgets.delete("x", &reader).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    assert_eq!(widgets.delete("x", &reader.clone().ignore_acl()).await.unwrap(), 1);
}

#[tokio::test]
async fn record_acls_grant_the_creator() {
    let fx = Fixture::with(
        SecurityConfig::default()
            .with_undecided(UndecidedPolicy::Deny)
            .with_trusted_roles(["admin"]),
    );
    let default = DefaultAcl {
        uid: "docs".into(),
        parent_uid: None,
        records: vec![AclRecord::new(".*").grant(Action::Create, true)],
    };
    let docs = fx
        .repo::<Doc>()
        .with_settings(EntitySettings::for_descriptor(&Doc::descriptor()).with_default_acl(default));
    let alice = OperationOptions::as_subject(Subject::new("alice.smith"));
    let bob = OperationOptions::as_subject(Subject::new("bob"));

    let doc = docs
        .create(
            Doc {
                base: EntityBase::default(),
                title: "plan".into(),
            },
            &alice,
        )
        .await
        .unwrap();
    let uid = doc.base.uid.clone();
    let acl_uid = docs.record_acl_uid(&uid);
    assert_eq!(acl_uid, format!("docs:{uid}"));

    let acl = fx.resolver.find_acl(&acl_uid, &mut Default::default()).await.unwrap().unwrap();
    assert_eq!(acl.chain[0].records, vec![AclRecord::crud("alice\\.smith")]);
    assert_eq!(acl.chain[0].parent_uid.as_deref(), Some("docs"));
    // The escaped pattern does not match look-alikes.
    assert!(!fx
        .resolver
        .has_permission(Some(&Subject::new("aliceXsmith")), acl_uid.as_str(), Action::Update)
        .await
        .unwrap());

    let err = docs.update(json!({"version": 0, "title": "mine"}), &doc, &bob).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    let doc = docs.update(json!({"version": 0, "title": "v2"}), &doc, &alice).await.unwrap();
    assert_eq!(doc.title, "v2");

    let admin = OperationOptions::as_subject(Subject::new("root").with_roles(["admin"]));
    let by_admin = docs
        .create(
            Doc {
                base: EntityBase::default(),
                title: "ops".into(),
            },
            &admin,
        )
        .await
        .unwrap();
    let admin_acl = fx
        .resolver
        .find_acl(&docs.record_acl_uid(&by_admin.base.uid), &mut Default::default())
        .await
        .unwrap()
        .unwrap();
    assert!(admin_acl.chain[0].records.is_empty());

    docs.delete(&uid, &alice).await.unwrap();
    assert!(fx.resolver.find_acl(&acl_uid, &mut Default::default()).await.unwrap().is_none());
}

fn docs_granting_create(fx: &Fixture) -> EntityRepository<Doc> {
    let default = DefaultAcl {
        uid: "docs".into(),
        parent_uid: None,
        records: vec![AclRecord::new(".*").grant(Action::Create, true)],
    };
    fx.repo::<Doc>()
        .with_settings(EntitySettings::for_descriptor(&Doc::descriptor()).with_default_acl(default))
}

fn doc(uid: &str, title: &str) -> Doc {
    Doc {
        base: EntityBase::with_uid(uid),
        title: title.into(),
    }
}

#[tokio::test]
async fn record_uid_cannot_replace_the_collection_list() {
    let fx = Fixture::with(SecurityConfig::default().with_undecided(UndecidedPolicy::Deny));
    let docs = docs_granting_create(&fx);
    let alice = OperationOptions::as_subject(Subject::new("alice"));
    let mallory = OperationOptions::as_subject(Subject::new("mallory"));

    let plan = docs.create(doc("plan", "alice's plan"), &alice).await.unwrap();
    docs.create(doc("docs", "named after the collection"), &mallory)
        .await
        .unwrap();

    let collection = fx.resolver.find_acl("docs", &mut Default::default()).await.unwrap().unwrap();
    assert_eq!(
        collection.chain[0].records,
        vec![AclRecord::new(".*").grant(Action::Create, true)]
    );
    assert!(fx
        .resolver
        .find_acl("docs:docs", &mut Default::default())
        .await
        .unwrap()
        .is_some());

    let err = docs
        .update(json!({"version": 0, "title": "taken over"}), &plan, &mallory)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    let stored = docs.fetch_object("plan", &system().skip_cache()).await.unwrap().unwrap();
    assert_eq!(stored.title, "alice's plan");
}

#[tokio::test]
async fn create_is_undone_when_the_record_list_exists() {
    let fx = Fixture::with(SecurityConfig::default().with_undecided(UndecidedPolicy::Deny));
    let docs = docs_granting_create(&fx);
    let alice = OperationOptions::as_subject(Subject::new("alice"));

    let held = AccessControlList::new("docs:taken").with_record(AclRecord::crud("bob"));
    fx.resolver.save_acl(held.clone()).await.unwrap();

    let err = docs.create(doc("taken", "clash"), &alice).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateIdentifier(_)));

    assert!(docs.fetch_object("taken", &system()).await.unwrap().is_none());
    assert!(docs.fetch_object("taken", &system().skip_cache()).await.unwrap().is_none());
    let kept = fx.resolver.find_acl("docs:taken", &mut Default::default()).await.unwrap().unwrap();
    assert_eq!(kept.chain[0].records, held.records);
    assert!(fx.notifier.take().is_empty());
}

#[tokio::test]
async fn later_versions_keep_the_first_record_list() {
    let fx = Fixture::new();
    let memos = fx.repo::<Memo>();
    let alice = OperationOptions::as_subject(Subject::new("alice"));
    let memo = |text: &str| Memo {
        base: EntityBase::with_uid("m-1"),
        text: text.into(),
    };

    memos.create(memo("draft"), &alice).await.unwrap();
    let second = memos.create(memo("final"), &alice).await.unwrap();
    assert_eq!(second.base.version, 1);

    let texts: Vec<String> = memos
        .history("m-1", &system())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["draft", "final"]);
    let acl = fx.resolver.find_acl("memos:m-1", &mut Default::default()).await.unwrap().unwrap();
    assert_eq!(acl.chain[0].records, vec![AclRecord::crud("alice")]);
}

// ── Typing and wiring ──────────────────────────────────────────────────

#[tokio::test]
async fn discriminator_selects_registered_variant() {
    let fx = Fixture::new();
    let shapes = fx.repo::<Shape>().with_types(
        TypeRegistry::new()
            .register_variant("circle", Shape::Circle)
            .register_variant("square", Shape::Square),
    );

    let circle = shapes
        .create(
            Shape::Circle(Circle {
                base: EntityBase::with_uid("c"),
                radius: 2.0,
            }),
            &system(),
        )
        .await
        .unwrap();
    assert!(matches!(circle, Shape::Circle(_)));

    shapes
        .create(
            Shape::Square(Square {
                base: EntityBase::with_uid("s"),
                side: 3.0,
            }),
            &system(),
        )
        .await
        .unwrap();
    match shapes.fetch_object("s", &system().skip_cache()).await.unwrap() {
        Some(Shape::Square(square)) => assert_eq!(square.side, 3.0),
        other => panic!("expected a square, got {other:?}"),
    }
}

#[tokio::test]
async fn repository_bean_reads_entity_settings() {
    let config = RampartConfig::from_yaml_str(
        r#"
rampart:
  entities:
    widgets:
      cache_ttl_secs: 5
      default_acl:
        uid: widget-root
        records:
          - userOrRoleId: editor
            create: true
"#,
        "test",
    )
    .unwrap();
    let fx = Fixture::new();

    let mut registry = BeanRegistry::new();
    registry
        .provide(config)
        .provide(fx.backend.clone())
        .provide(fx.cache.clone())
        .provide(fx.resolver.clone())
        .provide::<Arc<dyn Notifier>>(Arc::new(fx.notifier.clone()))
        .register::<EntityRepository<Widget>>();
    let ctx = registry.resolve().await.unwrap();
    let widgets: EntityRepository<Widget> = ctx.get().unwrap();

    assert_eq!(widgets.settings().cache_ttl_secs, 5);
    assert_eq!(widgets.settings().default_acl.uid, "widget-root");
    assert_eq!(
        widgets.settings().default_acl.records,
        vec![AclRecord::new("editor").grant(Action::Create, true)]
    );
    assert!(!widgets.settings().track_history);
}
