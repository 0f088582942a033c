//! Rampart: access-controlled, cached and versioned entity storage.
//!
//! This facade crate re-exports the Rampart sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use rampart::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature      | Default | Crate                   |
//! |--------------|---------|-------------------------|
//! | `security`   | **yes** | `rampart-security`      |
//! | `repository` | **yes** | `rampart-repository`    |
//! | `sqlite`     | no      | `rampart-data-sqlx`     |
//! | `full`       | no      | All of the above        |
//!
//! `rampart-core`, `rampart-cache`, `rampart-events` and `rampart-data`
//! are always available.

// Everything from rampart-core at the top level.
pub use rampart_core::*;

pub use rampart_cache;
pub use rampart_data;
pub use rampart_events;

#[cfg(feature = "security")]
pub use rampart_security;

#[cfg(feature = "repository")]
pub use rampart_repository;

#[cfg(feature = "sqlite")]
pub use rampart_data_sqlx;

/// Unified prelude: `use rampart::prelude::*`.
pub mod prelude {
    pub use rampart_cache::{CacheLayer, CacheStore, InMemoryStore};
    pub use rampart_core::prelude::*;
    pub use rampart_data::prelude::*;
    pub use rampart_data::MemoryDocumentStore;
    pub use rampart_events::prelude::*;

    #[cfg(feature = "security")]
    pub use rampart_security::prelude::*;

    #[cfg(feature = "repository")]
    pub use rampart_repository::prelude::*;

    #[cfg(feature = "sqlite")]
    pub use rampart_data_sqlx::prelude::*;
}
