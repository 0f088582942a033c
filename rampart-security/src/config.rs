use rampart_core::{ConfigError, ConfigValue, FromConfigValue, RampartConfig};

/// Outcome when no access list level decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndecidedPolicy {
    /// Allow. Also applies when no store is configured or the list
    /// reference is empty.
    #[default]
    Permit,
    Deny,
}

impl UndecidedPolicy {
    pub fn allows(self) -> bool {
        matches!(self, UndecidedPolicy::Permit)
    }
}

impl FromConfigValue for UndecidedPolicy {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match String::from_config_value(value, key)?.trim().to_lowercase().as_str() {
            "permit" | "allow" => Ok(UndecidedPolicy::Permit),
            "deny" => Ok(UndecidedPolicy::Deny),
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "permit | deny",
            }),
        }
    }
}

/// Access resolver settings, read from `rampart.security.*`.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Roles that pass every check. A role `{aclUid}.{role}` passes the
    /// checks of that list only.
    pub trusted_roles: Vec<String>,

    /// TTL of cached access lists in seconds (default: 300). Zero disables caching.
    pub acl_cache_ttl_secs: u64,

    /// Collection holding access lists (default: `acls`).
    pub acl_collection: String,

    pub undecided: UndecidedPolicy,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trusted_roles: Vec::new(),
            acl_cache_ttl_secs: 300,
            acl_collection: "acls".to_string(),
            undecided: UndecidedPolicy::Permit,
        }
    }
}

impl SecurityConfig {
    pub fn from_config(config: &RampartConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            trusted_roles: config.get_or("rampart.security.trusted_roles", defaults.trusted_roles)?,
            acl_cache_ttl_secs: config.get_or("rampart.security.acl_cache_ttl_secs", defaults.acl_cache_ttl_secs)?,
            acl_collection: config.get_or("rampart.security.acl_collection", defaults.acl_collection)?,
            undecided: config.get_or("rampart.security.undecided", defaults.undecided)?,
        })
    }

    pub fn with_trusted_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.acl_cache_ttl_secs = ttl_secs;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.acl_collection = collection.into();
        self
    }

    pub fn with_undecided(mut self, policy: UndecidedPolicy) -> Self {
        self.undecided = policy;
        self
    }
}
