pub mod beans;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;

use std::future::Future;
use std::pin::Pin;

pub use beans::{Bean, BeanContext, BeanError, BeanRegistry, Dependency, Producer};
pub use config::{ConfigError, ConfigValue, FromConfigValue, RampartConfig};
pub use error::AppError;
pub use identity::{StaticAuthenticator, Subject, TokenAuthenticator};
pub use logging::{init_tracing, init_tracing_json};

/// Boxed, `Send` future used by the object-safe collaborator traits
/// (`CacheStore`, `StorageBackend`, `Notifier`, ...).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod prelude {
    //! Re-exports of the most commonly used core types.
    pub use crate::{AppError, Bean, BeanContext, BeanRegistry, RampartConfig, Subject};
}
