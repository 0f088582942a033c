use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Name of the version field in persisted bodies.
pub const VERSION_FIELD: &str = "version";
/// Name of the soft-delete flag in persisted bodies.
pub const DELETED_FIELD: &str = "deleted";
pub const UID_FIELD: &str = "uid";

/// Fields shared by every persisted record. Flatten it into entity structs.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Widget {
///     #[serde(flatten)]
///     base: EntityBase,
///     name: String,
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityBase {
    /// Opaque identifier, assigned on create when empty. Immutable afterwards.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub date_modified: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl EntityBase {
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }
}

/// Static description of how an entity type is stored and protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub collection: &'static str,
    /// Fields that identify a record. An id lookup matches any of them.
    pub identifier_fields: Vec<&'static str>,
    /// Secondary scoping field (tenant, product, ...). Excluded from
    /// duplicate detection, applied as a filter on scoped lookups.
    pub scope_field: Option<&'static str>,
    /// Field holding the owner uid, used as a notification topic.
    pub owner_field: Option<&'static str>,
    /// Field naming the concrete variant of a polymorphic record.
    pub discriminator_field: Option<&'static str>,
    pub soft_delete: bool,
    /// Every update writes a new `(uid, version)` record.
    pub track_history: bool,
    /// Each record gets its own access list named after its uid.
    pub record_acls: bool,
}

impl EntityDescriptor {
    pub fn new(collection: &'static str) -> Self {
        Self {
            collection,
            identifier_fields: vec![UID_FIELD],
            scope_field: None,
            owner_field: None,
            discriminator_field: None,
            soft_delete: false,
            track_history: false,
            record_acls: false,
        }
    }

    /// Additional identifier fields, matched after `uid`.
    pub fn identified_by(mut self, fields: &[&'static str]) -> Self {
        for field in fields {
            if !self.identifier_fields.contains(field) {
                self.identifier_fields.push(field);
            }
        }
        self
    }

    pub fn scoped_by(mut self, field: &'static str) -> Self {
        self.scope_field = Some(field);
        self
    }

    pub fn owned_by(mut self, field: &'static str) -> Self {
        self.owner_field = Some(field);
        self
    }

    pub fn discriminated_by(mut self, field: &'static str) -> Self {
        self.discriminator_field = Some(field);
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    pub fn track_history(mut self) -> Self {
        self.track_history = true;
        self
    }

    pub fn record_acls(mut self) -> Self {
        self.record_acls = true;
        self
    }

    /// Identifier fields that take part in duplicate detection.
    pub fn unique_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.identifier_fields
            .iter()
            .copied()
            .filter(move |f| Some(*f) != self.scope_field)
    }
}

/// A persisted, versioned record.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn descriptor() -> EntityDescriptor;

    fn base(&self) -> &EntityBase;

    fn base_mut(&mut self) -> &mut EntityBase;

    fn uid(&self) -> &str {
        &self.base().uid
    }

    fn version(&self) -> u64 {
        self.base().version
    }
}
