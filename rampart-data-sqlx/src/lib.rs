//! # rampart-data-sqlx
//!
//! Relational [`StorageBackend`](rampart_data::StorageBackend) on SQLite.
//!
//! Every collection is a table `(uid TEXT, version INTEGER, body TEXT)` with
//! primary key `(uid, version)`, created on first use. Records are stored as
//! JSON in `body`; filter fields are addressed with `json_extract`.
//!
//! ```ignore
//! let backend = SqlxBackend::connect("sqlite:rampart.db").await?;
//! registry.provide::<Arc<dyn StorageBackend>>(Arc::new(backend));
//! ```
//!
//! Or let the bean container build it from `rampart.datasource.*`:
//!
//! ```ignore
//! registry.provide(config).register_producer::<SqliteBackendProducer>();
//! ```

pub mod backend;
pub mod error;

pub use backend::{SqliteBackendProducer, SqlxBackend};
pub use error::{SqlxErrorExt, SqlxResult};

pub mod prelude {
    pub use crate::{SqlxBackend, SqlxErrorExt};
    pub use rampart_data::prelude::*;
}
