mod document;
mod eval;
mod relational;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::{ParsedFilter, Predicate, SortDirection};

pub use document::{apply_pipeline, matches_filter, DocumentTranslator};
pub(crate) use document::sort_documents;
pub use eval::compare_values;
pub use relational::RelationalTranslator;

/// Storage families with structurally different query languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Document,
    Relational,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Document => f.write_str("document"),
            BackendKind::Relational => f.write_str("relational"),
        }
    }
}

/// Query in the native shape of a document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentQuery {
    Find {
        filter: Value,
        /// `(field, 1 | -1)` in priority order.
        sort: Vec<(String, i32)>,
        limit: Option<u64>,
        skip: Option<u64>,
    },
    /// Stages `$match`, `$sort`, `$skip` and `$limit`.
    Aggregate { pipeline: Vec<Value> },
}

/// Query for a relational store: a disjunction of conjunctions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalQuery {
    pub criteria: Vec<Vec<Predicate>>,
    pub order: Vec<(String, SortDirection)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeQuery {
    Document(DocumentQuery),
    Relational(RelationalQuery),
}

impl NativeQuery {
    pub fn kind(&self) -> BackendKind {
        match self {
            NativeQuery::Document(_) => BackendKind::Document,
            NativeQuery::Relational(_) => BackendKind::Relational,
        }
    }

    /// Whether `doc` satisfies the selection part of the query.
    /// Ordering and paging are ignored.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            NativeQuery::Document(DocumentQuery::Find { filter, .. }) => matches_filter(filter, doc),
            NativeQuery::Document(DocumentQuery::Aggregate { pipeline }) => pipeline
                .iter()
                .filter_map(|stage| stage.get("$match"))
                .all(|filter| matches_filter(filter, doc)),
            NativeQuery::Relational(query) => query.matches(doc),
        }
    }
}

impl RelationalQuery {
    pub fn matches(&self, doc: &Value) -> bool {
        self.criteria
            .iter()
            .any(|branch| branch.iter().all(|p| eval::predicate_matches(p, doc)))
    }
}

/// How soft-deleted records are treated by an identifier lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletedFilter {
    /// Only active records.
    #[default]
    Exclude,
    /// Active and soft-deleted records.
    Include,
}

/// Lookup of a single identity by any of its identifier fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierLookup {
    pub id: String,
    pub fields: Vec<String>,
    pub version: Option<u64>,
    pub scope: Option<(String, Value)>,
    /// Without an explicit version, resolve to the highest stored version.
    pub latest: bool,
    pub deleted: DeletedFilter,
}

impl IdentifierLookup {
    pub fn new<I, S>(id: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            version: None,
            scope: None,
            latest: false,
            deleted: DeletedFilter::Include,
        }
    }

    pub fn version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    pub fn scope(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scope = Some((field.into(), value.into()));
        self
    }

    pub fn latest(mut self) -> Self {
        self.latest = true;
        self
    }

    pub fn deleted(mut self, deleted: DeletedFilter) -> Self {
        self.deleted = deleted;
        self
    }

    /// The lookup resolves through "highest version first".
    pub fn wants_latest(&self) -> bool {
        self.latest && self.version.is_none()
    }
}

/// Converts generic filters and identifier lookups into native queries.
pub trait QueryTranslator: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn translate(&self, filter: &ParsedFilter) -> NativeQuery;

    fn identifier_query(&self, lookup: &IdentifierLookup) -> NativeQuery;
}

static DOCUMENT: DocumentTranslator = DocumentTranslator;
static RELATIONAL: RelationalTranslator = RelationalTranslator;

/// Translator for the given backend kind.
pub fn translator(kind: BackendKind) -> &'static dyn QueryTranslator {
    match kind {
        BackendKind::Document => &DOCUMENT,
        BackendKind::Relational => &RELATIONAL,
    }
}
