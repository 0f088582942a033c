//! # rampart-security
//!
//! Access control lists with inherited, pattern-matched grants.
//!
//! An [`AccessControlList`] holds ordered [`AclRecord`]s. Each record names
//! a subject pattern (uid, role or regular expression, `anonymous` for
//! unauthenticated callers) and six optional grants. An undecided grant
//! defers to the list named by `parentUid`.
//!
//! ```ignore
//! let resolver = AccessResolver::new(backend, CacheLayer::in_memory(), SecurityConfig::default());
//! resolver
//!     .save_acl(AccessControlList::new("widgets").with_record(AclRecord::full("admin")))
//!     .await?;
//! let allowed = resolver.has_permission(Some(&subject), "widgets", Action::Delete).await?;
//! ```

pub mod acl;
pub mod config;
pub mod error;
pub mod matcher;
pub mod resolver;

pub use acl::{AccessControlList, AclRecord, AclRef, Action, DefaultAcl, ResolvedAcl, ANONYMOUS};
pub use config::{SecurityConfig, UndecidedPolicy};
pub use error::SecurityError;
pub use matcher::SubjectMatcher;
pub use resolver::{AccessResolver, RequestInfo};

pub mod prelude {
    //! Re-exports of the most commonly used security types.
    pub use crate::{AccessControlList, AccessResolver, AclRecord, AclRef, Action, SecurityConfig};
}
