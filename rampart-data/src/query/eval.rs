use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::Value;

use crate::filter::{Operator, Predicate};

/// Resolve a dotted path inside `doc`.
pub(crate) fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

/// Equality where a missing field equals `null` and numbers compare by value.
pub(crate) fn values_equal(value: Option<&Value>, expected: &Value) -> bool {
    match (value.unwrap_or(&Value::Null), expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

/// Ordering between two values of the same JSON type. Mixed types do not compare.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used for sorting: missing and `null` first, mixed types equal.
pub(crate) fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null)) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (a, b) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

pub(crate) fn is_ordered(value: Option<&Value>, bound: &Value, accept: &[Ordering]) -> bool {
    value
        .and_then(|v| compare_values(v, bound))
        .is_some_and(|ord| accept.contains(&ord))
}

/// Anchored regex source for a SQL `LIKE` pattern.
pub(crate) fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

pub(crate) fn regex_matches(value: Option<&Value>, pattern: &str, case_insensitive: bool) -> bool {
    let Some(Value::String(text)) = value else {
        return false;
    };
    match RegexBuilder::new(pattern).case_insensitive(case_insensitive).build() {
        Ok(re) => re.is_match(text),
        Err(err) => {
            tracing::debug!(pattern, error = %err, "invalid pattern never matches");
            false
        }
    }
}

pub(crate) fn predicate_matches(predicate: &Predicate, doc: &Value) -> bool {
    let value = lookup(doc, &predicate.field);
    match &predicate.op {
        Operator::Eq(expected) => values_equal(value, expected),
        Operator::Ne(expected) => !values_equal(value, expected),
        Operator::Gt(bound) => is_ordered(value, bound, &[Ordering::Greater]),
        Operator::Gte(bound) => is_ordered(value, bound, &[Ordering::Greater, Ordering::Equal]),
        Operator::Lt(bound) => is_ordered(value, bound, &[Ordering::Less]),
        Operator::Lte(bound) => is_ordered(value, bound, &[Ordering::Less, Ordering::Equal]),
        Operator::In(options) => options.iter().any(|o| values_equal(value, o)),
        Operator::Like(pattern) => regex_matches(value, &like_to_regex(pattern), true),
        Operator::Range(low, high) => {
            is_ordered(value, low, &[Ordering::Greater, Ordering::Equal])
                && is_ordered(value, high, &[Ordering::Less, Ordering::Equal])
        }
    }
}
