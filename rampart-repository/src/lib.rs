//! # rampart-repository
//!
//! [`EntityRepository`] ties the data, cache, security and event crates
//! together: access checks before every operation, translated queries
//! against any [`StorageBackend`](rampart_data::StorageBackend), optimistic
//! versioning, soft delete, history and change notifications.
//!
//! ```ignore
//! let mut registry = BeanRegistry::new();
//! registry
//!     .provide(config)
//!     .provide::<Arc<dyn StorageBackend>>(Arc::new(MemoryDocumentStore::new()))
//!     .provide::<Arc<dyn CacheStore>>(Arc::new(InMemoryStore::new()))
//!     .provide::<Arc<dyn Notifier>>(Arc::new(EventBus::new()))
//!     .register::<CacheLayer>()
//!     .register::<AccessResolver>()
//!     .register::<EntityRepository<Widget>>();
//! let ctx = registry.resolve().await?;
//! let widgets: EntityRepository<Widget> = ctx.get()?;
//! ```

pub mod options;
pub mod repository;
pub mod settings;
pub mod types;

pub use options::OperationOptions;
pub use repository::EntityRepository;
pub use settings::EntitySettings;
pub use types::TypeRegistry;

pub mod prelude {
    //! Re-exports of the most commonly used repository types.
    pub use crate::{EntityRepository, EntitySettings, OperationOptions, TypeRegistry};
}
