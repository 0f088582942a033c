use std::cmp::Ordering;

use serde_json::{json, Map, Value};

use super::eval::{self, lookup, values_equal};
use super::{BackendKind, DeletedFilter, DocumentQuery, IdentifierLookup, NativeQuery, QueryTranslator};
use crate::entity::{DELETED_FIELD, VERSION_FIELD};
use crate::filter::{Operator, ParsedFilter, SortDirection};

/// Mongo-style filters: plain equality, `$op` documents, `$or`/`$and`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTranslator;

impl QueryTranslator for DocumentTranslator {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn translate(&self, filter: &ParsedFilter) -> NativeQuery {
        let conjuncts = filter
            .clauses
            .iter()
            .map(|clause| match clause.alternatives.as_slice() {
                [single] => field_condition(&clause.field, single),
                alternatives => json!({
                    "$or": alternatives
                        .iter()
                        .map(|op| field_condition(&clause.field, op))
                        .collect::<Vec<_>>()
                }),
            })
            .collect();

        let sort = filter
            .sort
            .iter()
            .map(|(field, dir)| {
                let order = match dir {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                };
                (field.clone(), order)
            })
            .collect();

        NativeQuery::Document(DocumentQuery::Find {
            filter: combine(conjuncts),
            sort,
            limit: Some(filter.limit),
            skip: (filter.skip > 0).then_some(filter.skip),
        })
    }

    fn identifier_query(&self, lookup: &IdentifierLookup) -> NativeQuery {
        let id = Value::String(lookup.id.clone());
        let mut conjuncts = Vec::with_capacity(4);
        conjuncts.push(match lookup.fields.as_slice() {
            [field] => single(field, id),
            fields => json!({
                "$or": fields.iter().map(|f| single(f, id.clone())).collect::<Vec<_>>()
            }),
        });
        if let Some(version) = lookup.version {
            conjuncts.push(single(VERSION_FIELD, json!(version)));
        }
        if let Some((field, value)) = &lookup.scope {
            conjuncts.push(single(field, value.clone()));
        }
        if lookup.deleted == DeletedFilter::Exclude {
            conjuncts.push(single(DELETED_FIELD, json!({ "$ne": true })));
        }
        let filter = combine(conjuncts);

        if lookup.wants_latest() {
            return NativeQuery::Document(DocumentQuery::Aggregate {
                pipeline: vec![
                    json!({ "$match": filter }),
                    json!({ "$sort": { VERSION_FIELD: -1 } }),
                    json!({ "$limit": 1 }),
                ],
            });
        }
        NativeQuery::Document(DocumentQuery::Find {
            filter,
            sort: vec![(VERSION_FIELD.to_string(), -1)],
            limit: None,
            skip: None,
        })
    }
}

fn single(field: &str, condition: Value) -> Value {
    let mut map = Map::new();
    map.insert(field.to_string(), condition);
    Value::Object(map)
}

fn field_condition(field: &str, op: &Operator) -> Value {
    let condition = match op {
        // Object literals are wrapped so they can never be read as operators.
        Operator::Eq(value @ Value::Object(_)) => json!({ "$eq": value }),
        Operator::Eq(value) => value.clone(),
        Operator::Ne(value) => json!({ "$ne": value }),
        Operator::Gt(value) => json!({ "$gt": value }),
        Operator::Gte(value) => json!({ "$gte": value }),
        Operator::Lt(value) => json!({ "$lt": value }),
        Operator::Lte(value) => json!({ "$lte": value }),
        Operator::In(values) => json!({ "$in": values }),
        Operator::Like(pattern) => json!({ "$regex": eval::like_to_regex(pattern), "$options": "i" }),
        Operator::Range(low, high) => json!({ "$gte": low, "$lte": high }),
    };
    single(field, condition)
}

/// AND together single-key conditions, merging them into one document when
/// no key repeats.
fn combine(conjuncts: Vec<Value>) -> Value {
    if conjuncts.len() == 1 {
        return conjuncts.into_iter().next().unwrap_or_else(|| json!({}));
    }
    let mut merged = Map::new();
    for conjunct in &conjuncts {
        let Value::Object(map) = conjunct else {
            return json!({ "$and": conjuncts });
        };
        for (key, value) in map {
            if merged.insert(key.clone(), value.clone()).is_some() {
                return json!({ "$and": conjuncts });
            }
        }
    }
    Value::Object(merged)
}

/// Evaluate a document filter against `doc`.
///
/// Missing fields behave as `null`, so `{"deleted": {"$ne": true}}` matches
/// records that never carried the flag.
pub fn matches_filter(filter: &Value, doc: &Value) -> bool {
    let Value::Object(map) = filter else {
        return false;
    };
    map.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|cs| cs.iter().all(|c| matches_filter(c, doc))),
        "$or" => condition
            .as_array()
            .is_some_and(|cs| cs.iter().any(|c| matches_filter(c, doc))),
        field => matches_condition(lookup(doc, field), condition),
    })
}

fn matches_condition(value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
            let case_insensitive = ops
                .get("$options")
                .and_then(Value::as_str)
                .is_some_and(|o| o.contains('i'));
            ops.iter().all(|(op, arg)| match op.as_str() {
                "$eq" => values_equal(value, arg),
                "$ne" => !values_equal(value, arg),
                "$gt" => eval::is_ordered(value, arg, &[Ordering::Greater]),
                "$gte" => eval::is_ordered(value, arg, &[Ordering::Greater, Ordering::Equal]),
                "$lt" => eval::is_ordered(value, arg, &[Ordering::Less]),
                "$lte" => eval::is_ordered(value, arg, &[Ordering::Less, Ordering::Equal]),
                "$in" => arg
                    .as_array()
                    .is_some_and(|opts| opts.iter().any(|o| values_equal(value, o))),
                "$nin" => arg
                    .as_array()
                    .is_some_and(|opts| !opts.iter().any(|o| values_equal(value, o))),
                "$exists" => arg.as_bool() == Some(value.is_some()),
                "$regex" => arg
                    .as_str()
                    .is_some_and(|p| eval::regex_matches(value, p, case_insensitive)),
                "$options" => true,
                other => {
                    tracing::debug!(operator = other, "unsupported filter operator");
                    false
                }
            })
        }
        expected => values_equal(value, expected),
    }
}

/// Run `$match`, `$sort`, `$skip` and `$limit` stages over `docs`.
pub fn apply_pipeline(mut docs: Vec<Value>, pipeline: &[Value]) -> Vec<Value> {
    for stage in pipeline {
        if let Some(filter) = stage.get("$match") {
            docs.retain(|doc| matches_filter(filter, doc));
        } else if let Some(Value::Object(spec)) = stage.get("$sort") {
            let keys: Vec<(String, i32)> = spec
                .iter()
                .map(|(k, v)| (k.clone(), if v.as_i64() == Some(-1) { -1 } else { 1 }))
                .collect();
            sort_documents(&mut docs, &keys);
        } else if let Some(skip) = stage.get("$skip").and_then(Value::as_u64) {
            docs = docs.into_iter().skip(skip as usize).collect();
        } else if let Some(limit) = stage.get("$limit").and_then(Value::as_u64) {
            docs.truncate(limit as usize);
        }
    }
    docs
}

pub(crate) fn sort_documents(docs: &mut [Value], keys: &[(String, i32)]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        keys.iter()
            .map(|(field, order)| {
                let ord = eval::sort_order(lookup(a, field), lookup(b, field));
                if *order < 0 {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}
