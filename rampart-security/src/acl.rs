use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use http::Method;
use rampart_core::{ConfigError, ConfigValue, FromConfigValue};
use serde::{Deserialize, Serialize};

/// Pattern reserved for callers without an authenticated subject.
pub const ANONYMOUS: &str = "anonymous";

/// Operation checked against an access list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Special,
    Full,
}

impl Action {
    /// `GET`/`HEAD` read, `POST` creates, `PUT`/`PATCH` update, `DELETE`
    /// deletes. Anything else is a special action.
    pub fn from_method(method: &Method) -> Self {
        if method == Method::GET || method == Method::HEAD {
            Action::Read
        } else if method == Method::POST {
            Action::Create
        } else if method == Method::PUT || method == Method::PATCH {
            Action::Update
        } else if method == Method::DELETE {
            Action::Delete
        } else {
            Action::Special
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Special => "special",
            Action::Full => "full",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grants of one subject pattern. `None` defers to the parent list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRecord {
    /// Literal id, role, or regular expression matched against both.
    pub user_or_role_id: String,
    #[serde(default)]
    pub create: Option<bool>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub update: Option<bool>,
    #[serde(default)]
    pub delete: Option<bool>,
    #[serde(default)]
    pub special: Option<bool>,
    #[serde(default)]
    pub full: Option<bool>,
}

impl AclRecord {
    /// Record with every grant undecided.
    pub fn new(user_or_role_id: impl Into<String>) -> Self {
        Self {
            user_or_role_id: user_or_role_id.into(),
            ..Self::default()
        }
    }

    /// Full grant.
    pub fn full(user_or_role_id: impl Into<String>) -> Self {
        Self::new(user_or_role_id).grant(Action::Full, true)
    }

    /// Create, read, update and delete granted.
    pub fn crud(user_or_role_id: impl Into<String>) -> Self {
        Self::new(user_or_role_id)
            .grant(Action::Create, true)
            .grant(Action::Read, true)
            .grant(Action::Update, true)
            .grant(Action::Delete, true)
    }

    pub fn grant(mut self, action: Action, allowed: bool) -> Self {
        *self.slot(action) = Some(allowed);
        self
    }

    pub fn get(&self, action: Action) -> Option<bool> {
        match action {
            Action::Create => self.create,
            Action::Read => self.read,
            Action::Update => self.update,
            Action::Delete => self.delete,
            Action::Special => self.special,
            Action::Full => self.full,
        }
    }

    fn slot(&mut self, action: Action) -> &mut Option<bool> {
        match action {
            Action::Create => &mut self.create,
            Action::Read => &mut self.read,
            Action::Update => &mut self.update,
            Action::Delete => &mut self.delete,
            Action::Special => &mut self.special,
            Action::Full => &mut self.full,
        }
    }

    /// Decision of this record for `action`, if it has one.
    pub fn decide(&self, action: Action) -> Option<bool> {
        if self.full == Some(true) {
            return Some(true);
        }
        self.get(action)
    }

    fn grants(&self) -> [Option<bool>; 6] {
        [self.create, self.read, self.update, self.delete, self.special, self.full]
    }
}

impl FromConfigValue for AclRecord {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        serde_json::from_value(value.to_json()).map_err(|_| ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "AclRecord",
        })
    }
}

/// Permission list of a resource or resource class.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlList {
    pub uid: String,
    /// List to defer to when no record here decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uid: Option<String>,
    #[serde(default)]
    pub records: Vec<AclRecord>,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<DateTime<Utc>>,
}

impl AccessControlList {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent_uid: impl Into<String>) -> Self {
        self.parent_uid = Some(parent_uid.into());
        self
    }

    pub fn with_record(mut self, record: AclRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Same parent and the same six grants for every subject pattern.
    ///
    /// Record order, duplicate patterns and a missing record versus an all
    /// undecided one make no difference. When a pattern appears twice the
    /// first record wins, as it does during resolution.
    pub fn same_grants(&self, other: &AccessControlList) -> bool {
        if self.parent_uid != other.parent_uid {
            return false;
        }
        let ours = self.grant_table();
        let theirs = other.grant_table();
        let patterns: BTreeSet<&str> = ours.keys().chain(theirs.keys()).copied().collect();
        let undecided = [None; 6];
        patterns.into_iter().all(|pattern| {
            ours.get(pattern).unwrap_or(&undecided) == theirs.get(pattern).unwrap_or(&undecided)
        })
    }

    fn grant_table(&self) -> BTreeMap<&str, [Option<bool>; 6]> {
        let mut table = BTreeMap::new();
        for record in &self.records {
            table
                .entry(record.user_or_role_id.as_str())
                .or_insert_with(|| record.grants());
        }
        table
    }
}

/// Reference to the list guarding an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclRef {
    /// Stored list, looked up by uid.
    Id(String),
    Inline(AccessControlList),
}

impl AclRef {
    pub fn uid(&self) -> &str {
        match self {
            AclRef::Id(uid) => uid,
            AclRef::Inline(acl) => &acl.uid,
        }
    }

    /// An empty id or an inline list without records nor parent.
    pub fn is_empty(&self) -> bool {
        match self {
            AclRef::Id(uid) => uid.is_empty(),
            AclRef::Inline(acl) => acl.records.is_empty() && acl.parent_uid.is_none(),
        }
    }
}

impl From<&str> for AclRef {
    fn from(uid: &str) -> Self {
        AclRef::Id(uid.to_string())
    }
}

impl From<String> for AclRef {
    fn from(uid: String) -> Self {
        AclRef::Id(uid)
    }
}

impl From<AccessControlList> for AclRef {
    fn from(acl: AccessControlList) -> Self {
        AclRef::Inline(acl)
    }
}

/// A list followed by its resolved ancestors, nearest first.
///
/// Ancestors are held by value, so a cyclic `parentUid` chain simply stops
/// where a uid repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAcl {
    pub chain: Vec<AccessControlList>,
}

impl ResolvedAcl {
    pub fn acl(&self) -> Option<&AccessControlList> {
        self.chain.first()
    }

    pub fn depth(&self) -> usize {
        self.chain.len()
    }
}

/// Access list synthesised for an entity type when none is stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultAcl {
    pub uid: String,
    pub parent_uid: Option<String>,
    pub records: Vec<AclRecord>,
}

impl DefaultAcl {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            parent_uid: None,
            records: Vec::new(),
        }
    }

    pub fn to_acl(&self) -> AccessControlList {
        AccessControlList {
            uid: self.uid.clone(),
            parent_uid: self.parent_uid.clone(),
            records: self.records.clone(),
            ..AccessControlList::default()
        }
    }
}
