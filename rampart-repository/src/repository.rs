use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rampart_cache::CacheLayer;
use rampart_core::{AppError, Bean, BeanContext, BeanError, Dependency, RampartConfig};
use rampart_data::entity::{DELETED_FIELD, UID_FIELD, VERSION_FIELD};
use rampart_data::filter::ME;
use rampart_data::{
    parse_filter, translator, DataError, DeletedFilter, Entity, EntityDescriptor, FilterRequest, IdentifierLookup,
    NativeQuery, Page, ParsedFilter, Predicate, QueryTranslator, RecordKey, StorageBackend,
};
use rampart_events::{ChangeEvent, ChangeKind, Notifier};
use rampart_security::{AccessControlList, AccessResolver, AclRecord, AclRef, Action};
use serde_json::{json, Map, Value};

use crate::options::OperationOptions;
use crate::settings::EntitySettings;
use crate::types::TypeRegistry;

/// Versioned CRUD over one entity collection.
///
/// Every write is a single compare-and-write on the backend: `insert`
/// refuses a taken `(uid[, version])`, `replace` refuses a moved version.
/// Losing either race surfaces as [`AppError::VersionConflict`]; callers
/// re-fetch and retry.
///
/// Reads go through a TTL cache keyed by the identifier lookup. Cache keys
/// start with `{collection}:{id}.` so every cached form of a record (by
/// version, scope or deleted filter) is dropped together on writes. The
/// cache may briefly serve stale data after a concurrent write elsewhere.
#[derive(Clone)]
pub struct EntityRepository<T: Entity> {
    backend: Arc<dyn StorageBackend>,
    cache: CacheLayer,
    resolver: AccessResolver,
    notifier: Arc<dyn Notifier>,
    descriptor: Arc<EntityDescriptor>,
    settings: Arc<EntitySettings>,
    types: Arc<TypeRegistry<T>>,
}

impl<T: Entity> EntityRepository<T> {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        cache: CacheLayer,
        resolver: AccessResolver,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let descriptor = T::descriptor();
        let settings = EntitySettings::for_descriptor(&descriptor);
        Self {
            backend,
            cache,
            resolver,
            notifier,
            descriptor: Arc::new(descriptor),
            settings: Arc::new(settings),
            types: Arc::new(TypeRegistry::new()),
        }
    }

    pub fn with_settings(mut self, settings: EntitySettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_types(mut self, types: TypeRegistry<T>) -> Self {
        self.types = Arc::new(types);
        self
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn settings(&self) -> &EntitySettings {
        &self.settings
    }

    fn collection(&self) -> &'static str {
        self.descriptor.collection
    }

    fn translator(&self) -> &'static dyn QueryTranslator {
        translator(self.backend.kind())
    }

    // ── Create ─────────────────────────────────────────────────────────

    /// Persist a new entity.
    ///
    /// Assigns a uid when empty, stamps timestamps and the version (0, or
    /// the number of stored versions for history-tracked collections),
    /// seeds the cache and publishes a `create` event.
    pub async fn create(&self, mut obj: T, options: &OperationOptions) -> Result<T, AppError> {
        self.authorize_collection(options, Action::Create).await?;

        let now = Utc::now();
        {
            let base = obj.base_mut();
            if base.uid.is_empty() {
                base.uid = uuid::Uuid::new_v4().to_string();
            }
            base.date_created = now;
            base.date_modified = now;
        }
        let uid = obj.uid().to_string();

        let mut body = serde_json::to_value(&obj).map_err(DataError::from)?;
        self.prepare_body(&mut body, options)?;

        let key = if self.settings.track_history {
            let version = self
                .backend
                .count(self.collection(), &self.versions_query(&uid))
                .await?;
            set_field(&mut body, VERSION_FIELD, json!(version));
            RecordKey::versioned(uid.clone(), version)
        } else {
            self.ensure_unique(&body).await?;
            set_field(&mut body, VERSION_FIELD, json!(0));
            RecordKey::uid(uid.clone())
        };

        // Later history versions share the list made for the first one.
        let first_version = key.version.map_or(true, |v| v == 0);
        self.backend.insert(self.collection(), key, body.clone()).await?;
        tracing::debug!(collection = self.collection(), uid = %uid, "entity created");

        self.seed_cache(&uid, &body, options).await;
        if self.descriptor.record_acls && first_version {
            if let Err(err) = self.create_record_acl(&uid, options).await {
                tracing::warn!(
                    collection = self.collection(),
                    uid = %uid,
                    error = %err,
                    "record access list refused, create rolled back"
                );
                self.backend.delete_many(self.collection(), &self.versions_query(&uid)).await?;
                self.invalidate(&body).await;
                return Err(err);
            }
        }
        self.notify(ChangeKind::Create, &body).await;
        Ok(self.instantiate(body)?)
    }

    /// Fill the scope field from the options and substitute `me` in the
    /// owner field.
    fn prepare_body(&self, body: &mut Value, options: &OperationOptions) -> Result<(), AppError> {
        if let (Some(field), Some(scope)) = (self.descriptor.scope_field, &options.scope) {
            if body.get(field).map_or(true, Value::is_null) {
                set_field(body, field, scope.clone());
            }
        }
        if let Some(owner) = self.descriptor.owner_field {
            if body.get(owner).and_then(Value::as_str) == Some(ME) {
                let uid = self.resolve_id(ME, options)?;
                set_field(body, owner, Value::String(uid));
            }
        }
        Ok(())
    }

    /// Refuse a body sharing an identifier value with a stored record of the
    /// same scope.
    async fn ensure_unique(&self, body: &Value) -> Result<(), AppError> {
        let scope = self
            .descriptor
            .scope_field
            .and_then(|field| body.get(field).filter(|v| !v.is_null()).map(|v| (field, v.clone())));
        for field in self.descriptor.unique_fields() {
            let Some(value) = body.get(field).and_then(Value::as_str).filter(|v| !v.is_empty()) else {
                continue;
            };
            let mut lookup = IdentifierLookup::new(value, [field]);
            if let Some((scope_field, scope_value)) = &scope {
                lookup = lookup.scope(*scope_field, scope_value.clone());
            }
            let query = self.translator().identifier_query(&lookup);
            if self.backend.count(self.collection(), &query).await? > 0 {
                return Err(AppError::DuplicateIdentifier(format!(
                    "{} with {field} '{value}' already exists",
                    self.collection()
                )));
            }
        }
        Ok(())
    }

    /// Insert the access list of a new record. An existing list under the
    /// same uid is never overwritten.
    async fn create_record_acl(&self, uid: &str, options: &OperationOptions) -> Result<(), AppError> {
        let default_uid = &self.settings.default_acl.uid;
        let mut acl = AccessControlList::new(self.record_acl_uid(uid)).with_parent(default_uid.clone());
        if let Some(subject) = &options.subject {
            if !self.resolver.is_trusted(Some(subject), default_uid) {
                acl = acl.with_record(AclRecord::crud(regex::escape(&subject.uid)));
            }
        }
        self.resolver.create_acl(acl).await?;
        Ok(())
    }

    /// Access lists of records live in their own `{collection}:{uid}`
    /// namespace, apart from collection and path lists.
    pub fn record_acl_uid(&self, uid: &str) -> String {
        format!("{}:{uid}", self.collection())
    }

    // ── Read ───────────────────────────────────────────────────────────

    /// Current record for `id` (any identifier field), or the version in
    /// `options.version`.
    ///
    /// Soft-deleted records are only found with `options.purge`. A cached
    /// payload that no longer deserializes is ignored.
    pub async fn fetch_object(&self, id: &str, options: &OperationOptions) -> Result<Option<T>, AppError> {
        let id = self.resolve_id(id, options)?;
        let lookup = self.lookup(&id, options)?;
        let key = self.cache_key(&id, &lookup);

        if !options.skip_cache {
            if let Some(doc) = self.cache.get::<Value>(&key).await {
                match self.instantiate(doc) {
                    Ok(obj) => return Ok(Some(obj)),
                    Err(err) => tracing::debug!(key = %key, error = %err, "ignoring unusable cached record"),
                }
            }
        }

        let query = self.translator().identifier_query(&lookup);
        let Some(doc) = self.backend.find(self.collection(), &query).await?.into_iter().next() else {
            tracing::trace!(collection = self.collection(), id = %id, "entity not found");
            return Ok(None);
        };
        self.cache.set_with_ttl(&key, &doc, self.settings.cache_ttl_secs).await;
        Ok(Some(self.instantiate(doc)?))
    }

    /// Matching records, excluding soft-deleted ones unless `options.purge`.
    pub async fn find(&self, request: &FilterRequest, options: &OperationOptions) -> Result<Page<T>, AppError> {
        self.authorize_collection(options, Action::Read).await?;
        let filter = self.scoped_filter(request, options)?;
        let query = self.translator().translate(&filter);

        let docs = self.backend.find(self.collection(), &query).await?;
        let total = self.backend.count(self.collection(), &query).await?;
        let content = docs
            .into_iter()
            .map(|doc| self.instantiate(doc))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(content, filter.skip, filter.limit, total))
    }

    pub async fn count(&self, request: &FilterRequest, options: &OperationOptions) -> Result<u64, AppError> {
        self.authorize_collection(options, Action::Read).await?;
        let filter = self.scoped_filter(request, options)?;
        let query = self.translator().translate(&filter);
        Ok(self.backend.count(self.collection(), &query).await?)
    }

    /// Every stored version of `id`, oldest first.
    pub async fn history(&self, id: &str, options: &OperationOptions) -> Result<Vec<T>, AppError> {
        self.authorize_collection(options, Action::Read).await?;
        let id = self.resolve_id(id, options)?;
        let mut lookup = IdentifierLookup::new(id, self.descriptor.identifier_fields.iter().copied());
        if let Some(scope) = self.scope_constraint(options)? {
            lookup = lookup.scope(scope.0, scope.1);
        }
        let query = self.translator().identifier_query(&lookup);
        let mut docs = self.backend.find(self.collection(), &query).await?;
        docs.reverse();
        docs.into_iter()
            .map(|doc| self.instantiate(doc).map_err(AppError::from))
            .collect()
    }

    // ── Update ─────────────────────────────────────────────────────────

    /// Apply the fields of `partial` on top of `existing`.
    ///
    /// `partial.version` (or `options.version`) must equal the stored
    /// version of `existing`. History-tracked collections get a new record
    /// at `version + 1`; others are replaced in place with the bumped version.
    pub async fn update(&self, partial: Value, existing: &T, options: &OperationOptions) -> Result<T, AppError> {
        let Value::Object(patch) = partial else {
            return Err(AppError::Validation("update expects a JSON object".into()));
        };
        let uid = existing.uid().to_string();
        self.authorize_record(options, &uid, Action::Update).await?;

        if let Some(incoming) = patch.get(UID_FIELD).and_then(Value::as_str) {
            if incoming != uid {
                return Err(AppError::Validation(format!("uid is immutable: {uid} != {incoming}")));
            }
        }
        let incoming_version = patch
            .get(VERSION_FIELD)
            .and_then(Value::as_u64)
            .or(options.version)
            .ok_or_else(|| AppError::Validation("update requires the version it is based on".into()))?;
        if incoming_version != existing.version() {
            return Err(AppError::VersionConflict(format!(
                "{uid} is at version {}, update based on {incoming_version}",
                existing.version()
            )));
        }

        let previous = serde_json::to_value(existing).map_err(DataError::from)?;
        let mut body = previous.clone();
        if let Value::Object(fields) = &mut body {
            for (field, value) in patch {
                if field != "dateCreated" {
                    fields.insert(field, value);
                }
            }
        }
        let next_version = existing.version() + 1;
        set_field(&mut body, UID_FIELD, Value::String(uid.clone()));
        set_field(&mut body, VERSION_FIELD, json!(next_version));
        set_field(&mut body, "dateModified", serde_json::to_value(Utc::now()).map_err(DataError::from)?);

        let conflict = || AppError::VersionConflict(format!("{uid} was modified concurrently"));
        if self.settings.track_history {
            match self
                .backend
                .insert(self.collection(), RecordKey::versioned(uid.clone(), next_version), body.clone())
                .await
            {
                Ok(()) => {}
                Err(DataError::Duplicate(_)) => return Err(conflict()),
                Err(err) => return Err(err.into()),
            }
        } else if !self
            .backend
            .replace(self.collection(), &uid, existing.version(), body.clone())
            .await?
        {
            return Err(conflict());
        }
        tracing::debug!(collection = self.collection(), uid = %uid, version = next_version, "entity updated");

        self.invalidate(&previous).await;
        self.invalidate(&body).await;
        self.seed_cache(&uid, &body, options).await;
        self.notify(ChangeKind::Update, &body).await;
        Ok(self.instantiate(body)?)
    }

    // ── Delete ─────────────────────────────────────────────────────────

    /// Remove every version of `id`.
    ///
    /// Soft-deletable collections only flag the records unless
    /// `options.purge`; a purge also drops the record's own access list.
    /// Returns the number of records affected.
    pub async fn delete(&self, id: &str, options: &OperationOptions) -> Result<u64, AppError> {
        let id = self.resolve_id(id, options)?;
        let query = self.all_versions_query(&id, options)?;
        let docs = self.backend.find(self.collection(), &query).await?;
        let uids: BTreeSet<String> = docs.iter().filter_map(record_uid).map(str::to_string).collect();
        if uids.is_empty() {
            return Err(AppError::NotFound(format!("{} '{id}'", self.collection())));
        }
        for uid in &uids {
            self.authorize_record(options, uid, Action::Delete).await?;
        }

        let affected = if self.descriptor.soft_delete && !options.purge {
            let mut patch = Map::new();
            patch.insert(DELETED_FIELD.to_string(), Value::Bool(true));
            patch.insert("dateModified".to_string(), serde_json::to_value(Utc::now()).map_err(DataError::from)?);
            self.backend.update_many(self.collection(), &query, patch).await?
        } else {
            let removed = self.backend.delete_many(self.collection(), &query).await?;
            if self.descriptor.record_acls {
                for uid in &uids {
                    self.resolver.delete_acl(&self.record_acl_uid(uid)).await?;
                }
            }
            removed
        };
        tracing::debug!(collection = self.collection(), id = %id, affected, purge = options.purge, "entity deleted");

        for doc in &docs {
            self.invalidate(doc).await;
        }
        for doc in latest_per_uid(&docs) {
            self.notify(ChangeKind::Delete, doc).await;
        }
        Ok(affected)
    }

    /// Clear the soft-delete flag of `id`.
    pub async fn restore(&self, id: &str, options: &OperationOptions) -> Result<T, AppError> {
        if !self.descriptor.soft_delete {
            return Err(AppError::Validation(format!("{} records cannot be restored", self.collection())));
        }
        let id = self.resolve_id(id, options)?;
        let restore_options = OperationOptions {
            purge: true,
            ..options.clone()
        };
        let query = self.all_versions_query(&id, &restore_options)?;
        let docs = self.backend.find(self.collection(), &query).await?;
        let Some(current) = docs.first() else {
            return Err(AppError::NotFound(format!("{} '{id}'", self.collection())));
        };
        let uid = record_uid(current).unwrap_or(&id).to_string();
        self.authorize_record(options, &uid, Action::Update).await?;

        let mut patch = Map::new();
        patch.insert(DELETED_FIELD.to_string(), Value::Bool(false));
        self.backend.update_many(self.collection(), &query, patch).await?;
        for doc in &docs {
            self.invalidate(doc).await;
        }

        let restored = self
            .fetch_object(&uid, &OperationOptions { skip_cache: true, ..restore_options })
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} '{uid}'", self.collection())))?;
        let body = serde_json::to_value(&restored).map_err(DataError::from)?;
        self.notify(ChangeKind::Restore, &body).await;
        Ok(restored)
    }

    /// Remove every record of the collection. A missing collection is fine.
    pub async fn truncate(&self, options: &OperationOptions) -> Result<(), AppError> {
        self.authorize_collection(options, Action::Delete).await?;
        self.backend.truncate(self.collection()).await?;
        self.cache.delete_prefix(&format!("{}:", self.collection())).await;
        tracing::info!(collection = self.collection(), "collection truncated");
        Ok(())
    }

    // ── Helpers ────────────────────────────────────────────────────────

    /// `me` stands for the calling subject.
    fn resolve_id(&self, id: &str, options: &OperationOptions) -> Result<String, AppError> {
        if id != ME {
            return Ok(id.to_string());
        }
        options
            .subject
            .as_ref()
            .map(|subject| subject.uid.clone())
            .ok_or_else(|| AppError::PermissionDenied("'me' requires an authenticated subject".into()))
    }

    fn scope_constraint(&self, options: &OperationOptions) -> Result<Option<(&'static str, Value)>, AppError> {
        match (&options.scope, self.descriptor.scope_field) {
            (None, _) => Ok(None),
            (Some(scope), Some(field)) => Ok(Some((field, scope.clone()))),
            (Some(_), None) => Err(AppError::Validation(format!("{} has no scope field", self.collection()))),
        }
    }

    fn deleted_filter(&self, options: &OperationOptions) -> DeletedFilter {
        if self.descriptor.soft_delete && !options.purge {
            DeletedFilter::Exclude
        } else {
            DeletedFilter::Include
        }
    }

    /// Lookup of the current (or requested) version of `id`.
    fn lookup(&self, id: &str, options: &OperationOptions) -> Result<IdentifierLookup, AppError> {
        let mut lookup = IdentifierLookup::new(id, self.descriptor.identifier_fields.iter().copied())
            .version(options.version)
            .latest()
            .deleted(self.deleted_filter(options));
        if let Some((field, value)) = self.scope_constraint(options)? {
            lookup = lookup.scope(field, value);
        }
        Ok(lookup)
    }

    fn all_versions_query(&self, id: &str, options: &OperationOptions) -> Result<NativeQuery, AppError> {
        let mut lookup = IdentifierLookup::new(id, self.descriptor.identifier_fields.iter().copied())
            .deleted(self.deleted_filter(options));
        if let Some((field, value)) = self.scope_constraint(options)? {
            lookup = lookup.scope(field, value);
        }
        Ok(self.translator().identifier_query(&lookup))
    }

    fn versions_query(&self, uid: &str) -> NativeQuery {
        self.translator()
            .identifier_query(&IdentifierLookup::new(uid, [UID_FIELD]))
    }

    fn scoped_filter(&self, request: &FilterRequest, options: &OperationOptions) -> Result<ParsedFilter, AppError> {
        let mut filter = parse_filter(request, options.subject.as_ref())?;
        if self.descriptor.soft_delete && !options.purge {
            filter = filter.and(Predicate::ne(DELETED_FIELD, true));
        }
        if let Some((field, value)) = self.scope_constraint(options)? {
            filter = filter.and(Predicate::eq(field, value));
        }
        Ok(filter)
    }

    fn cache_key(&self, id: &str, lookup: &IdentifierLookup) -> String {
        CacheLayer::key(&format!("{}:{id}", self.collection()), lookup)
    }

    /// Cache `body` under the lookup a plain fetch by uid would use.
    async fn seed_cache(&self, uid: &str, body: &Value, options: &OperationOptions) {
        let seed_options = OperationOptions {
            version: None,
            purge: false,
            ..options.clone()
        };
        let Ok(lookup) = self.lookup(uid, &seed_options) else {
            return;
        };
        self.cache
            .set_with_ttl(&self.cache_key(uid, &lookup), body, self.settings.cache_ttl_secs)
            .await;
    }

    /// Drop every cached form of the record, under each of its identifiers.
    async fn invalidate(&self, body: &Value) {
        for field in &self.descriptor.identifier_fields {
            if let Some(value) = body.get(*field).and_then(Value::as_str) {
                self.cache
                    .delete_prefix(&format!("{}:{value}.", self.collection()))
                    .await;
            }
        }
    }

    fn instantiate(&self, doc: Value) -> Result<T, DataError> {
        self.types.instantiate(self.descriptor.discriminator_field, doc)
    }

    async fn notify(&self, kind: ChangeKind, body: &Value) {
        let Some(uid) = record_uid(body) else {
            return;
        };
        let version = body.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0);
        let mut event = ChangeEvent::new(kind, self.collection(), uid, version);
        if kind != ChangeKind::Delete {
            event = event.with_payload(body.clone());
        }

        let owner = self
            .descriptor
            .owner_field
            .and_then(|field| body.get(field))
            .and_then(Value::as_str)
            .filter(|owner| !owner.is_empty() && *owner != uid);
        for topic in owner.into_iter().chain(std::iter::once(uid)) {
            self.notifier.publish(topic, event.clone()).await;
        }
    }

    // ── Access ─────────────────────────────────────────────────────────

    async fn authorize_collection(&self, options: &OperationOptions, action: Action) -> Result<(), AppError> {
        if options.ignore_acl {
            return Ok(());
        }
        let acl = self.resolver.default_acl(&self.settings.default_acl).await?;
        self.authorize(options, AclRef::Inline(acl), action).await
    }

    /// Check against the record's own list, or the collection's when the
    /// record has none.
    async fn authorize_record(&self, options: &OperationOptions, uid: &str, action: Action) -> Result<(), AppError> {
        if options.ignore_acl {
            return Ok(());
        }
        if self.descriptor.record_acls {
            let acl_uid = self.record_acl_uid(uid);
            let mut visited = HashSet::new();
            if self.resolver.find_acl(&acl_uid, &mut visited).await?.is_some() {
                return self.authorize(options, AclRef::Id(acl_uid), action).await;
            }
        }
        self.authorize_collection(options, action).await
    }

    async fn authorize(&self, options: &OperationOptions, acl: AclRef, action: Action) -> Result<(), AppError> {
        let uid = acl.uid().to_string();
        if self.resolver.has_permission(options.subject.as_ref(), acl, action).await? {
            Ok(())
        } else {
            Err(AppError::PermissionDenied(format!("{action} denied on {uid}")))
        }
    }
}

fn set_field(body: &mut Value, field: &str, value: Value) {
    if let Value::Object(fields) = body {
        fields.insert(field.to_string(), value);
    }
}

fn record_uid(doc: &Value) -> Option<&str> {
    doc.get(UID_FIELD).and_then(Value::as_str)
}

/// Highest version of each uid, in first-seen order.
fn latest_per_uid(docs: &[Value]) -> Vec<&Value> {
    let mut latest: Vec<&Value> = Vec::new();
    for doc in docs {
        let version = doc.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0);
        match latest.iter_mut().find(|seen| record_uid(seen) == record_uid(doc)) {
            Some(seen) => {
                if seen.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0) < version {
                    *seen = doc;
                }
            }
            None => latest.push(doc),
        }
    }
    latest
}

impl<T: Entity> Bean for EntityRepository<T> {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::of::<RampartConfig>(),
            Dependency::of::<Arc<dyn StorageBackend>>(),
            Dependency::of::<CacheLayer>(),
            Dependency::of::<AccessResolver>(),
            Dependency::of::<Arc<dyn Notifier>>(),
        ]
    }

    fn build(ctx: &BeanContext) -> Result<Self, BeanError> {
        let config: RampartConfig = ctx.get()?;
        let repository = Self::new(ctx.get()?, ctx.get()?, ctx.get()?, ctx.get()?);
        let settings =
            EntitySettings::from_config(&config, repository.descriptor()).map_err(BeanError::construction::<Self>)?;
        Ok(repository.with_settings(settings))
    }
}
