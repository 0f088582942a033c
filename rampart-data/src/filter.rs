//! The URI-style filter language.
//!
//! A request is a list of `field=value` pairs where the value may carry an
//! operator as `op(value)`. Reserved keys control paging and ordering:
//!
//! | key     | meaning                                                  |
//! |---------|----------------------------------------------------------|
//! | `limit` | page size, default 100, capped at 1000                   |
//! | `skip`  | records to skip                                          |
//! | `page`  | 0-based page index, `skip = page * limit` unless `skip` |
//! | `sort`  | `field` (ascending) or `{"field": "ASC" \| "DESC"}`      |
//!
//! Keys starting with `jwt_` or `oauth_` are ignored. Several values for
//! the same field are OR-ed; different fields are AND-ed.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use rampart_core::Subject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DataError;

pub const DEFAULT_LIMIT: u64 = 100;
pub const MAX_LIMIT: u64 = 1000;
/// Upper bound on the conjunctions a filter may expand into.
pub const MAX_BRANCHES: usize = 1024;

/// Placeholder value replaced by the calling subject's uid.
pub const ME: &str = "me";

const IGNORED_PREFIXES: [&str; 2] = ["jwt_", "oauth_"];

/// Raw filter input: path parameters plus query parameters.
///
/// Query parameters keep their order and may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRequest {
    pub path: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl FilterRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    /// A trailing `[]` on a key is dropped, so `tag[]=a&tag[]=b` repeats `tag`.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let query = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| {
                let key = k.strip_suffix("[]").unwrap_or(&*k).to_string();
                (key, v.into_owned())
            })
            .collect();
        Self {
            path: Vec::new(),
            query,
        }
    }

    /// Path parameters always apply as equality constraints.
    pub fn with_path(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.push((key.into(), value.into()));
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Comparison applied to a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "lowercase")]
pub enum Operator {
    Eq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Ne(Value),
    In(Vec<Value>),
    /// SQL-style pattern: `%` any run, `_` any single character.
    Like(String),
    /// Inclusive bounds.
    Range(Value, Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Operator) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq(value.into()))
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Ne(value.into()))
    }
}

/// Alternatives for one field; any of them may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub field: String,
    pub alternatives: Vec<Operator>,
}

/// A validated filter: a conjunction of [`Clause`]s plus paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFilter {
    pub clauses: Vec<Clause>,
    pub sort: Vec<(String, SortDirection)>,
    pub limit: u64,
    pub skip: u64,
}

impl Default for ParsedFilter {
    fn default() -> Self {
        Self {
            clauses: Vec::new(),
            sort: Vec::new(),
            limit: DEFAULT_LIMIT,
            skip: 0,
        }
    }
}

impl ParsedFilter {
    /// Add a constraint that must hold for every result.
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.clauses.push(Clause {
            field: predicate.field,
            alternatives: vec![predicate.op],
        });
        self
    }

    /// Expand into disjunctive normal form: one conjunction per combination
    /// of alternatives. An empty filter yields a single empty conjunction.
    pub fn branches(&self) -> Vec<Vec<Predicate>> {
        let mut branches: Vec<Vec<Predicate>> = vec![Vec::new()];
        for clause in &self.clauses {
            let mut next = Vec::with_capacity(branches.len() * clause.alternatives.len());
            for branch in &branches {
                for op in &clause.alternatives {
                    let mut extended = branch.clone();
                    extended.push(Predicate::new(clause.field.clone(), op.clone()));
                    next.push(extended);
                }
            }
            branches = next;
        }
        branches
    }
}

/// Validate `request` and resolve `me` against `subject`.
pub fn parse_filter(request: &FilterRequest, subject: Option<&Subject>) -> Result<ParsedFilter, DataError> {
    let mut filter = ParsedFilter::default();
    let mut limit = None;
    let mut skip = None;
    let mut page = None;

    for (key, raw) in &request.path {
        let value = resolve_me(raw, subject)?.map_or_else(|| parse_value(raw), Value::String);
        filter.clauses.push(Clause {
            field: key.clone(),
            alternatives: vec![Operator::Eq(value)],
        });
    }

    let from_path = filter.clauses.len();
    for (key, raw) in &request.query {
        match key.as_str() {
            "limit" => limit = Some(parse_count(key, raw)?),
            "skip" => skip = Some(parse_count(key, raw)?),
            "page" => page = Some(parse_count(key, raw)?),
            "sort" => filter.sort.extend(parse_sort(raw)?),
            k if IGNORED_PREFIXES.iter().any(|p| k.starts_with(p)) => {}
            _ => {
                let op = parse_operator(raw, subject)?;
                match filter.clauses[from_path..].iter_mut().find(|c| c.field == *key) {
                    Some(clause) => clause.alternatives.push(op),
                    None => filter.clauses.push(Clause {
                        field: key.clone(),
                        alternatives: vec![op],
                    }),
                }
            }
        }
    }

    let expansion = filter
        .clauses
        .iter()
        .fold(1usize, |acc, c| acc.saturating_mul(c.alternatives.len()));
    if expansion > MAX_BRANCHES {
        return Err(DataError::Validation(format!(
            "filter expands to more than {MAX_BRANCHES} alternatives"
        )));
    }

    filter.limit = limit.map_or(DEFAULT_LIMIT, |l| l.min(MAX_LIMIT));
    filter.skip = match (skip, page) {
        (Some(skip), _) => skip,
        (None, Some(page)) => page.saturating_mul(filter.limit),
        (None, None) => 0,
    };
    Ok(filter)
}

fn operator_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(eq|gt|gte|lt|lte|ne|not|in|like|range)\((.*)\)$").ok())
        .as_ref()
}

/// Parse `op(args)` or a bare value (equality).
pub fn parse_operator(raw: &str, subject: Option<&Subject>) -> Result<Operator, DataError> {
    let Some(caps) = operator_pattern().and_then(|re| re.captures(raw.trim())) else {
        return Ok(Operator::Eq(argument(raw, subject)?));
    };
    let name = caps.get(1).map_or("", |m| m.as_str());
    let args = caps.get(2).map_or("", |m| m.as_str());

    let op = match name {
        "eq" => Operator::Eq(argument(args, subject)?),
        "gt" => Operator::Gt(argument(args, subject)?),
        "gte" => Operator::Gte(argument(args, subject)?),
        "lt" => Operator::Lt(argument(args, subject)?),
        "lte" => Operator::Lte(argument(args, subject)?),
        "ne" | "not" => Operator::Ne(argument(args, subject)?),
        "like" => Operator::Like(args.to_string()),
        "in" => Operator::In(
            split_args(args)
                .map(|a| argument(a, subject))
                .collect::<Result<_, _>>()?,
        ),
        "range" => {
            let bounds: Vec<&str> = split_args(args).collect();
            let [low, high] = bounds.as_slice() else {
                return Err(DataError::Validation(format!(
                    "range() takes exactly two arguments, got {}",
                    bounds.len()
                )));
            };
            Operator::Range(argument(low, subject)?, argument(high, subject)?)
        }
        _ => Operator::Eq(argument(raw, subject)?),
    };
    Ok(op)
}

fn split_args(args: &str) -> impl Iterator<Item = &str> {
    args.split(',').map(str::trim).filter(|a| !a.is_empty())
}

fn argument(raw: &str, subject: Option<&Subject>) -> Result<Value, DataError> {
    Ok(resolve_me(raw, subject)?.map_or_else(|| parse_value(raw), Value::String))
}

fn resolve_me(raw: &str, subject: Option<&Subject>) -> Result<Option<String>, DataError> {
    if raw.trim() != ME {
        return Ok(None);
    }
    subject
        .map(|s| Some(s.uid.clone()))
        .ok_or_else(|| DataError::Validation("'me' requires an authenticated subject".into()))
}

/// Structured literal first, then a date, else the raw string.
pub fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    if let Some(date) = parse_date(trimmed) {
        return Value::String(date.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    Value::String(raw.to_string())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_count(key: &str, raw: &str) -> Result<u64, DataError> {
    raw.trim()
        .parse()
        .map_err(|_| DataError::Validation(format!("'{key}' must be a non-negative integer, got '{raw}'")))
}

fn parse_sort(raw: &str) -> Result<Vec<(String, SortDirection)>, DataError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return Ok(vec![(trimmed.to_string(), SortDirection::Asc)]);
    }
    let spec: serde_json::Map<String, Value> = serde_json::from_str(trimmed)
        .map_err(|e| DataError::Validation(format!("invalid sort '{raw}': {e}")))?;
    spec.into_iter()
        .map(|(field, dir)| {
            let direction = match &dir {
                Value::String(s) if s.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Value::String(s) if s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                Value::Number(n) if n.as_i64() == Some(1) => SortDirection::Asc,
                Value::Number(n) if n.as_i64() == Some(-1) => SortDirection::Desc,
                other => {
                    return Err(DataError::Validation(format!(
                        "invalid sort direction {other} for '{field}'"
                    )))
                }
            };
            Ok((field, direction))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_prefer_literals_then_dates() {
        assert_eq!(parse_value("5"), json!(5));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("[1,2]"), json!([1, 2]));
        assert_eq!(parse_value("2024-03-01"), json!("2024-03-01T00:00:00Z"));
        assert_eq!(parse_value("bolt"), json!("bolt"));
    }

    #[test]
    fn branches_expand_alternatives() {
        let filter = ParsedFilter {
            clauses: vec![
                Clause {
                    field: "a".into(),
                    alternatives: vec![Operator::Eq(json!(1)), Operator::Eq(json!(2))],
                },
                Clause {
                    field: "b".into(),
                    alternatives: vec![Operator::Eq(json!("x")), Operator::Eq(json!("y"))],
                },
                Clause {
                    field: "c".into(),
                    alternatives: vec![Operator::Gt(json!(0))],
                },
            ],
            ..ParsedFilter::default()
        };
        let branches = filter.branches();
        assert_eq!(branches.len(), 4);
        assert!(branches.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn empty_filter_has_one_branch() {
        assert_eq!(ParsedFilter::default().branches(), vec![Vec::new()]);
    }
}
