use std::sync::Arc;

use dashmap::DashMap;
use rampart_core::BoxFuture;
use serde_json::{Map, Value};

use crate::backend::{RecordKey, StorageBackend};
use crate::entity::{UID_FIELD, VERSION_FIELD};
use crate::error::DataError;
use crate::filter::SortDirection;
use crate::query::{apply_pipeline, sort_documents, BackendKind, DocumentQuery, NativeQuery};

/// In-process document store.
///
/// Each collection is a vector of JSON documents behind a `DashMap` shard
/// lock, which makes single-record writes atomic. Relational queries are
/// accepted too and evaluated in process.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<DashMap<String, Vec<Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    fn select(&self, collection: &str, query: &NativeQuery) -> Vec<Value> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };
        match query {
            NativeQuery::Document(DocumentQuery::Aggregate { pipeline }) => apply_pipeline(docs.value().clone(), pipeline),
            NativeQuery::Document(DocumentQuery::Find { sort, limit, skip, .. }) => {
                let mut hits: Vec<Value> = docs.iter().filter(|d| query.matches(d)).cloned().collect();
                drop(docs);
                sort_documents(&mut hits, sort);
                page(hits, *skip, *limit)
            }
            NativeQuery::Relational(relational) => {
                let mut hits: Vec<Value> = docs.iter().filter(|d| query.matches(d)).cloned().collect();
                drop(docs);
                let keys: Vec<(String, i32)> = relational
                    .order
                    .iter()
                    .map(|(field, dir)| (field.clone(), if *dir == SortDirection::Desc { -1 } else { 1 }))
                    .collect();
                sort_documents(&mut hits, &keys);
                page(hits, relational.offset, relational.limit)
            }
        }
    }
}

fn page(docs: Vec<Value>, skip: Option<u64>, limit: Option<u64>) -> Vec<Value> {
    let skip = skip.unwrap_or(0) as usize;
    let limit = limit.map_or(usize::MAX, |l| l as usize);
    docs.into_iter().skip(skip).take(limit).collect()
}

fn same_record(doc: &Value, key: &RecordKey) -> bool {
    let uid_matches = doc.get(UID_FIELD).and_then(Value::as_str) == Some(key.uid.as_str());
    match key.version {
        Some(version) => uid_matches && doc.get(VERSION_FIELD).and_then(Value::as_u64) == Some(version),
        None => uid_matches,
    }
}

impl StorageBackend for MemoryDocumentStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn find<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<Vec<Value>, DataError>> {
        Box::pin(async move { Ok(self.select(collection, query)) })
    }

    fn count<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<u64, DataError>> {
        Box::pin(async move {
            let count = self
                .collections
                .get(collection)
                .map_or(0, |docs| docs.iter().filter(|d| query.matches(d)).count());
            Ok(count as u64)
        })
    }

    fn insert<'a>(&'a self, collection: &'a str, key: RecordKey, doc: Value) -> BoxFuture<'a, Result<(), DataError>> {
        Box::pin(async move {
            let mut docs = self.collections.entry(collection.to_string()).or_default();
            if docs.iter().any(|d| same_record(d, &key)) {
                return Err(DataError::Duplicate(format!("{collection}/{}", key.uid)));
            }
            docs.push(doc);
            Ok(())
        })
    }

    fn replace<'a>(
        &'a self,
        collection: &'a str,
        uid: &'a str,
        expected_version: u64,
        doc: Value,
    ) -> BoxFuture<'a, Result<bool, DataError>> {
        Box::pin(async move {
            let Some(mut docs) = self.collections.get_mut(collection) else {
                return Ok(false);
            };
            let key = RecordKey::versioned(uid, expected_version);
            match docs.iter_mut().find(|d| same_record(d, &key)) {
                Some(slot) => {
                    *slot = doc;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn update_many<'a>(
        &'a self,
        collection: &'a str,
        query: &'a NativeQuery,
        patch: Map<String, Value>,
    ) -> BoxFuture<'a, Result<u64, DataError>> {
        Box::pin(async move {
            let Some(mut docs) = self.collections.get_mut(collection) else {
                return Ok(0);
            };
            let mut touched = 0;
            for doc in docs.iter_mut().filter(|d| query.matches(d)) {
                if let Value::Object(fields) = doc {
                    fields.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
                    touched += 1;
                }
            }
            Ok(touched)
        })
    }

    fn delete_many<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<u64, DataError>> {
        Box::pin(async move {
            let Some(mut docs) = self.collections.get_mut(collection) else {
                return Ok(0);
            };
            let before = docs.len();
            docs.retain(|d| !query.matches(d));
            Ok((before - docs.len()) as u64)
        })
    }

    fn truncate<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<(), DataError>> {
        Box::pin(async move {
            self.collections.remove(collection);
            Ok(())
        })
    }
}
