use rampart_core::Subject;
use serde_json::Value;

/// Per-call switches shared by every repository operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOptions {
    /// Caller; `None` is anonymous.
    pub subject: Option<Subject>,
    /// Skip access checks.
    pub ignore_acl: bool,
    /// Deletes remove records physically; reads include soft-deleted ones.
    pub purge: bool,
    /// Value of the collection's scope field to restrict to.
    pub scope: Option<Value>,
    /// Read straight from storage.
    pub skip_cache: bool,
    /// Exact version to fetch, or the version an update was based on.
    pub version: Option<u64>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_subject(subject: Subject) -> Self {
        Self {
            subject: Some(subject),
            ..Self::default()
        }
    }

    /// Options for trusted internal calls.
    pub fn system() -> Self {
        Self {
            ignore_acl: true,
            ..Self::default()
        }
    }

    pub fn ignore_acl(mut self) -> Self {
        self.ignore_acl = true;
        self
    }

    pub fn purge(mut self) -> Self {
        self.purge = true;
        self
    }

    pub fn scope(mut self, scope: impl Into<Value>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}
