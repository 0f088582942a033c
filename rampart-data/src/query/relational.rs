use serde_json::{json, Value};

use super::{BackendKind, DeletedFilter, IdentifierLookup, NativeQuery, QueryTranslator, RelationalQuery};
use crate::entity::{DELETED_FIELD, VERSION_FIELD};
use crate::filter::{ParsedFilter, Predicate, SortDirection};

/// Disjunctive-normal-form queries for SQL stores.
///
/// Several values for one field become parallel candidate conjunctions that
/// are OR-ed at the top level.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationalTranslator;

impl QueryTranslator for RelationalTranslator {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn translate(&self, filter: &ParsedFilter) -> NativeQuery {
        NativeQuery::Relational(RelationalQuery {
            criteria: filter.branches(),
            order: filter.sort.clone(),
            limit: Some(filter.limit),
            offset: (filter.skip > 0).then_some(filter.skip),
        })
    }

    fn identifier_query(&self, lookup: &IdentifierLookup) -> NativeQuery {
        let mut shared = Vec::with_capacity(3);
        if let Some(version) = lookup.version {
            shared.push(Predicate::eq(VERSION_FIELD, version));
        }
        if let Some((field, value)) = &lookup.scope {
            shared.push(Predicate::eq(field.clone(), value.clone()));
        }
        if lookup.deleted == DeletedFilter::Exclude {
            shared.push(Predicate::ne(DELETED_FIELD, json!(true)));
        }

        let criteria = lookup
            .fields
            .iter()
            .map(|field| {
                let mut branch = Vec::with_capacity(shared.len() + 1);
                branch.push(Predicate::eq(field.clone(), Value::String(lookup.id.clone())));
                branch.extend(shared.iter().cloned());
                branch
            })
            .collect();

        NativeQuery::Relational(RelationalQuery {
            criteria,
            order: vec![(VERSION_FIELD.to_string(), SortDirection::Desc)],
            limit: lookup.wants_latest().then_some(1),
            offset: None,
        })
    }
}
