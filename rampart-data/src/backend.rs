use rampart_core::BoxFuture;
use serde_json::{Map, Value};

use crate::error::DataError;
use crate::query::{BackendKind, NativeQuery};

/// Identity of a stored record.
///
/// History-tracked collections key records by `(uid, version)`; others keep
/// a single record per `uid` and leave `version` empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub uid: String,
    pub version: Option<u64>,
}

impl RecordKey {
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            version: None,
        }
    }

    pub fn versioned(uid: impl Into<String>, version: u64) -> Self {
        Self {
            uid: uid.into(),
            version: Some(version),
        }
    }
}

/// A store of JSON records grouped in collections.
///
/// Implementations provide atomic single-record compare-and-write through
/// [`insert`](Self::insert) and [`replace`](Self::replace); nothing else is
/// transactional. Collections that do not exist yet read as empty.
pub trait StorageBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Records matching `query`, honouring its ordering and paging.
    fn find<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<Vec<Value>, DataError>>;

    /// Number of records matching `query`, ignoring paging.
    fn count<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<u64, DataError>>;

    /// Store a new record. Fails with [`DataError::Duplicate`] when `key`
    /// is already taken.
    fn insert<'a>(&'a self, collection: &'a str, key: RecordKey, doc: Value) -> BoxFuture<'a, Result<(), DataError>>;

    /// Overwrite the record `uid` only if its stored version is still
    /// `expected_version`. Returns `false` when the version moved on or the
    /// record vanished.
    fn replace<'a>(
        &'a self,
        collection: &'a str,
        uid: &'a str,
        expected_version: u64,
        doc: Value,
    ) -> BoxFuture<'a, Result<bool, DataError>>;

    /// Merge `patch` into every matching record. Returns the number touched.
    fn update_many<'a>(
        &'a self,
        collection: &'a str,
        query: &'a NativeQuery,
        patch: Map<String, Value>,
    ) -> BoxFuture<'a, Result<u64, DataError>>;

    /// Remove every matching record. A missing collection removes nothing.
    fn delete_many<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<u64, DataError>>;

    /// Remove every record. A missing collection is not an error.
    fn truncate<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<(), DataError>>;
}
