mod layer;
mod store;

pub use layer::CacheLayer;
pub use store::{CacheError, CacheStore, InMemoryStore};
