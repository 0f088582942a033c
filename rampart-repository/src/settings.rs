use rampart_core::{ConfigError, RampartConfig};
use rampart_data::EntityDescriptor;
use rampart_security::{AclRecord, DefaultAcl};

/// Per-collection repository settings, read from
/// `rampart.entities.{collection}.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySettings {
    /// TTL of cached records in seconds (default: 60). Zero disables caching.
    pub cache_ttl_secs: u64,
    /// Keep every version as its own record. Defaults to the descriptor.
    pub track_history: bool,
    /// List guarding collection-level operations and parenting record lists.
    /// Defaults to an empty list named after the collection.
    pub default_acl: DefaultAcl,
}

impl EntitySettings {
    pub fn for_descriptor(descriptor: &EntityDescriptor) -> Self {
        Self {
            cache_ttl_secs: 60,
            track_history: descriptor.track_history,
            default_acl: DefaultAcl::new(descriptor.collection),
        }
    }

    pub fn from_config(config: &RampartConfig, descriptor: &EntityDescriptor) -> Result<Self, ConfigError> {
        let defaults = Self::for_descriptor(descriptor);
        let prefix = format!("rampart.entities.{}", descriptor.collection);
        let key = |suffix: &str| format!("{prefix}.{suffix}");

        let default_acl = DefaultAcl {
            uid: config.get_or(&key("default_acl.uid"), defaults.default_acl.uid)?,
            parent_uid: config.get_or(&key("default_acl.parent"), None)?,
            records: config.get_or::<Vec<AclRecord>>(&key("default_acl.records"), Vec::new())?,
        };
        Ok(Self {
            cache_ttl_secs: config.get_or(&key("cache_ttl_secs"), defaults.cache_ttl_secs)?,
            track_history: config.get_or(&key("track_history"), defaults.track_history)?,
            default_acl,
        })
    }

    pub fn with_cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.cache_ttl_secs = ttl_secs;
        self
    }

    pub fn with_default_acl(mut self, default_acl: DefaultAcl) -> Self {
        self.default_acl = default_acl;
        self
    }
}
