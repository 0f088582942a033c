use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use http::Method;
use rampart_cache::CacheLayer;
use rampart_core::{Bean, BeanContext, BeanError, Dependency, RampartConfig, Subject};
use rampart_data::entity::UID_FIELD;
use rampart_data::{translator, DataError, IdentifierLookup, NativeQuery, RecordKey, StorageBackend};

use crate::acl::{AccessControlList, AclRef, Action, DefaultAcl, ResolvedAcl};
use crate::config::SecurityConfig;
use crate::error::SecurityError;
use crate::matcher::SubjectMatcher;

/// Method and path of an inbound operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
}

impl RequestInfo {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

/// Decides whether a subject may perform an action under an access list.
///
/// Lists are loaded cache-first, one level at a time, and inherit from the
/// list named by their `parentUid`. Resolution walks from the requested list
/// towards the root and stops at the first level whose first matching
/// record has an opinion on the action. A uid met twice ends the walk.
///
/// Without a store, with an empty list reference, or when no level decides,
/// the [`UndecidedPolicy`](crate::UndecidedPolicy) applies (permit by default).
#[derive(Clone)]
pub struct AccessResolver {
    store: Option<Arc<dyn StorageBackend>>,
    cache: CacheLayer,
    config: Arc<SecurityConfig>,
    matcher: SubjectMatcher,
}

impl AccessResolver {
    pub fn new(store: Arc<dyn StorageBackend>, cache: CacheLayer, config: SecurityConfig) -> Self {
        Self {
            store: Some(store),
            cache,
            config: Arc::new(config),
            matcher: SubjectMatcher::new(),
        }
    }

    /// Resolver with no list store; every check falls to the undecided policy
    /// unless the subject is trusted.
    pub fn without_store(cache: CacheLayer, config: SecurityConfig) -> Self {
        Self {
            store: None,
            cache,
            config: Arc::new(config),
            matcher: SubjectMatcher::new(),
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Whether `subject` carries a trusted role, globally or scoped to
    /// `acl_uid` as `{acl_uid}.{role}`.
    pub fn is_trusted(&self, subject: Option<&Subject>, acl_uid: &str) -> bool {
        let Some(subject) = subject else {
            return false;
        };
        self.config.trusted_roles.iter().any(|trusted| {
            subject.has_role(trusted) || (!acl_uid.is_empty() && subject.has_role(&format!("{acl_uid}.{trusted}")))
        })
    }

    pub async fn has_permission(
        &self,
        subject: Option<&Subject>,
        acl: impl Into<AclRef>,
        action: Action,
    ) -> Result<bool, SecurityError> {
        let acl = acl.into();
        if self.store.is_none() || acl.is_empty() {
            let allowed = self.config.undecided.allows() || self.is_trusted(subject, acl.uid());
            tracing::trace!(acl = acl.uid(), %action, allowed, "no access list to resolve");
            return Ok(allowed);
        }
        if self.is_trusted(subject, acl.uid()) {
            tracing::trace!(acl = acl.uid(), %action, "trusted subject");
            return Ok(true);
        }

        let uid = acl.uid().to_string();
        let mut visited = HashSet::new();
        let resolved = match acl {
            AclRef::Id(id) => self.find_acl(&id, &mut visited).await?,
            AclRef::Inline(acl) => Some(self.resolve_inline(acl, &mut visited).await?),
        };
        let decision = resolved.as_ref().and_then(|r| self.decide(r, subject, action));
        let allowed = decision.unwrap_or_else(|| self.config.undecided.allows());
        tracing::debug!(
            acl = %uid,
            subject = subject.map(|s| s.uid.as_str()),
            %action,
            allowed,
            decided = decision.is_some(),
            "permission resolved"
        );
        Ok(allowed)
    }

    /// Decision of the nearest level with an opinion, or `None`.
    pub fn decide(&self, resolved: &ResolvedAcl, subject: Option<&Subject>, action: Action) -> Option<bool> {
        resolved.chain.iter().find_map(|level| {
            level
                .records
                .iter()
                .find(|record| self.matcher.matches(&record.user_or_role_id, subject))
                .and_then(|record| record.decide(action))
        })
    }

    /// Load `id` and its ancestors. Uids already in `visited` are not
    /// followed, so a cyclic chain resolves to the levels seen before the
    /// repeat. `None` when `id` itself is unknown or already visited.
    pub async fn find_acl(
        &self,
        id: &str,
        visited: &mut HashSet<String>,
    ) -> Result<Option<ResolvedAcl>, SecurityError> {
        let mut chain = Vec::new();
        let mut next = Some(id.to_string());
        while let Some(uid) = next.take() {
            if !visited.insert(uid.clone()) {
                tracing::warn!(acl = %uid, "cyclic parentUid chain, inheritance stops here");
                break;
            }
            let Some(level) = self.load(&uid).await? else {
                break;
            };
            next = level.parent_uid.clone();
            chain.push(level);
        }
        Ok((!chain.is_empty()).then_some(ResolvedAcl { chain }))
    }

    async fn resolve_inline(
        &self,
        acl: AccessControlList,
        visited: &mut HashSet<String>,
    ) -> Result<ResolvedAcl, SecurityError> {
        visited.insert(acl.uid.clone());
        let parent = match &acl.parent_uid {
            Some(parent) => self.find_acl(parent, visited).await?,
            None => None,
        };
        let mut chain = vec![acl];
        chain.extend(parent.into_iter().flat_map(|p| p.chain));
        Ok(ResolvedAcl { chain })
    }

    /// Persist `acl`.
    ///
    /// A list with the same grants as the stored one is returned unchanged
    /// without a write. Otherwise the submitted version must equal the stored
    /// one and the write bumps it; the first save keeps the submitted version.
    pub async fn save_acl(&self, acl: AccessControlList) -> Result<AccessControlList, SecurityError> {
        let store = self.require_store()?;
        if acl.uid.is_empty() {
            return Err(SecurityError::InvalidAcl("access list without uid".into()));
        }
        let collection = self.config.acl_collection.as_str();
        let now = Utc::now();

        let saved = match self.fetch_stored(&acl.uid).await? {
            Some(existing) => {
                if existing.same_grants(&acl) {
                    tracing::debug!(acl = %acl.uid, "access list unchanged, save skipped");
                    return Ok(existing);
                }
                if existing.version != acl.version {
                    return Err(SecurityError::VersionConflict(format!(
                        "{} is at version {}, got {}",
                        acl.uid, existing.version, acl.version
                    )));
                }
                let next = AccessControlList {
                    version: existing.version + 1,
                    date_created: existing.date_created.or(Some(now)),
                    date_modified: Some(now),
                    ..acl
                };
                let body = serde_json::to_value(&next)?;
                if !store.replace(collection, &next.uid, existing.version, body).await? {
                    return Err(SecurityError::VersionConflict(format!(
                        "{} changed while saving",
                        next.uid
                    )));
                }
                next
            }
            None => match self.insert_acl(acl).await {
                Err(SecurityError::Data(DataError::Duplicate(msg))) => {
                    return Err(SecurityError::VersionConflict(msg))
                }
                other => other?,
            },
        };

        self.cache
            .set_with_ttl(&self.cache_key(&saved.uid), &saved, self.config.acl_cache_ttl_secs)
            .await;
        tracing::debug!(acl = %saved.uid, version = saved.version, "access list saved");
        Ok(saved)
    }

    /// Persist `acl` only if no list is stored under its uid yet; an
    /// existing one fails with [`DataError::Duplicate`] and is left as is.
    pub async fn create_acl(&self, acl: AccessControlList) -> Result<AccessControlList, SecurityError> {
        if acl.uid.is_empty() {
            return Err(SecurityError::InvalidAcl("access list without uid".into()));
        }
        let created = self.insert_acl(acl).await?;
        self.cache
            .set_with_ttl(&self.cache_key(&created.uid), &created, self.config.acl_cache_ttl_secs)
            .await;
        tracing::debug!(acl = %created.uid, "access list created");
        Ok(created)
    }

    async fn insert_acl(&self, acl: AccessControlList) -> Result<AccessControlList, SecurityError> {
        let store = self.require_store()?;
        let now = Utc::now();
        let next = AccessControlList {
            date_created: Some(now),
            date_modified: Some(now),
            ..acl
        };
        let body = serde_json::to_value(&next)?;
        store
            .insert(&self.config.acl_collection, RecordKey::uid(next.uid.clone()), body)
            .await?;
        Ok(next)
    }

    /// Remove the stored list `uid`. Returns whether anything was removed.
    pub async fn delete_acl(&self, uid: &str) -> Result<bool, SecurityError> {
        let store = self.require_store()?;
        let removed = store
            .delete_many(&self.config.acl_collection, &self.identifier_query(store, uid))
            .await?;
        self.invalidate(uid).await;
        Ok(removed > 0)
    }

    /// The stored list for `default`, created from it on first use.
    /// Without a store the synthesised list is returned unsaved.
    pub async fn default_acl(&self, default: &DefaultAcl) -> Result<AccessControlList, SecurityError> {
        if self.store.is_none() {
            return Ok(default.to_acl());
        }
        if let Some(existing) = self.load(&default.uid).await? {
            return Ok(existing);
        }
        match self.save_acl(default.to_acl()).await {
            Ok(acl) => Ok(acl),
            // Another caller created it first.
            Err(SecurityError::VersionConflict(_)) => self
                .fetch_stored(&default.uid)
                .await?
                .ok_or_else(|| SecurityError::VersionConflict(format!("{} vanished while creating", default.uid))),
            Err(err) => Err(err),
        }
    }

    /// Drop the cached copy of list `uid`.
    pub async fn invalidate(&self, uid: &str) {
        self.cache.delete(&self.cache_key(uid)).await;
    }

    /// Check an inbound operation against the list of the longest matching
    /// path prefix. Paths with no list are allowed.
    pub async fn check_request_perms(
        &self,
        subject: Option<&Subject>,
        request: &RequestInfo,
    ) -> Result<bool, SecurityError> {
        let action = Action::from_method(&request.method);
        for candidate in path_prefixes(&request.path) {
            if let Some(acl) = self.load(&candidate).await? {
                tracing::trace!(path = %request.path, acl = %acl.uid, "request matched access list");
                return self.has_permission(subject, AclRef::Inline(acl), action).await;
            }
        }
        Ok(true)
    }

    async fn load(&self, uid: &str) -> Result<Option<AccessControlList>, SecurityError> {
        let key = self.cache_key(uid);
        if let Some(hit) = self.cache.get::<AccessControlList>(&key).await {
            return Ok(Some(hit));
        }
        let found = self.fetch_stored(uid).await?;
        if let Some(acl) = &found {
            self.cache.set_with_ttl(&key, acl, self.config.acl_cache_ttl_secs).await;
        }
        Ok(found)
    }

    async fn fetch_stored(&self, uid: &str) -> Result<Option<AccessControlList>, SecurityError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let docs = store
            .find(&self.config.acl_collection, &self.identifier_query(store, uid))
            .await?;
        match docs.into_iter().next() {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    fn identifier_query(&self, store: &Arc<dyn StorageBackend>, uid: &str) -> NativeQuery {
        translator(store.kind()).identifier_query(&IdentifierLookup::new(uid, [UID_FIELD]))
    }

    fn cache_key(&self, uid: &str) -> String {
        CacheLayer::key(&self.config.acl_collection, &IdentifierLookup::new(uid, [UID_FIELD]))
    }

    fn require_store(&self) -> Result<&Arc<dyn StorageBackend>, SecurityError> {
        self.store
            .as_ref()
            .ok_or_else(|| SecurityError::Data(DataError::NotFound("no access list store configured".into())))
    }
}

/// `/a/b/c` → `/a/b/c`, `/a/b`, `/a`, `/`.
fn path_prefixes(path: &str) -> Vec<String> {
    let path = path.split_once('?').map_or(path, |(p, _)| p).trim_end_matches('/');
    let mut prefixes = Vec::new();
    let mut current = path;
    while !current.is_empty() {
        prefixes.push(current.to_string());
        match current.rfind('/') {
            Some(idx) => current = &current[..idx],
            None => break,
        }
    }
    prefixes.push("/".to_string());
    prefixes
}

impl Bean for AccessResolver {
    fn dependencies() -> Vec<Dependency> {
        vec![
            Dependency::of::<RampartConfig>(),
            Dependency::of::<CacheLayer>(),
            Dependency::of::<Arc<dyn StorageBackend>>(),
        ]
    }

    fn build(ctx: &BeanContext) -> Result<Self, BeanError> {
        let config: RampartConfig = ctx.get()?;
        let security = SecurityConfig::from_config(&config).map_err(BeanError::construction::<Self>)?;
        Ok(Self::new(ctx.get()?, ctx.get()?, security))
    }
}
