use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rampart_data::DataError;
use serde::de::DeserializeOwned;
use serde_json::Value;

type Factory<T> = Arc<dyn Fn(Value) -> Result<T, serde_json::Error> + Send + Sync>;

/// Closed mapping from a stored discriminator value to a constructor.
///
/// Records whose discriminator is missing or unregistered are deserialized
/// as `T` directly.
///
/// ```ignore
/// let types = TypeRegistry::new()
///     .register_variant("circle", Shape::Circle)
///     .register_variant("square", Shape::Square);
/// ```
pub struct TypeRegistry<T> {
    factories: HashMap<String, Factory<T>>,
}

impl<T> Clone for TypeRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

impl<T> Default for TypeRegistry<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for TypeRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}

impl<T: DeserializeOwned + 'static> TypeRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, tag: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Value) -> Result<T, serde_json::Error> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
        self
    }

    /// Deserialize records tagged `tag` as `V` and wrap them with `wrap`.
    pub fn register_variant<V, W>(self, tag: impl Into<String>, wrap: W) -> Self
    where
        V: DeserializeOwned,
        W: Fn(V) -> T + Send + Sync + 'static,
    {
        self.register(tag, move |doc| serde_json::from_value(doc).map(&wrap))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Build a `T` from `doc`, dispatching on `discriminator` when given.
    pub fn instantiate(&self, discriminator: Option<&str>, doc: Value) -> Result<T, DataError> {
        let factory = discriminator
            .and_then(|field| doc.get(field))
            .and_then(Value::as_str)
            .and_then(|tag| self.factories.get(tag))
            .cloned();
        let built = match factory {
            Some(factory) => factory(doc),
            None => serde_json::from_value(doc),
        };
        Ok(built?)
    }
}
