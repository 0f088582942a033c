//! SQLite rendering of [`RelationalQuery`] values over tables that keep
//! each record as a JSON document column.
//!
//! ```ignore
//! let renderer = SqlRenderer::new("body");
//! let (sql, params) = renderer.select("widgets", &["body"], &query)?;
//! ```

use serde_json::Value;

use crate::error::DataError;
use crate::filter::{Operator, Predicate, SortDirection};
use crate::query::RelationalQuery;

/// A bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&Value> for SqlParam {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Int(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::Int(i),
                None => SqlParam::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueryError {
    InvalidIdentifier { kind: &'static str, ident: String },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::InvalidIdentifier { kind, ident } => {
                write!(f, "Invalid {kind} identifier: {ident}")
            }
        }
    }
}

impl std::error::Error for QueryError {}

impl From<QueryError> for DataError {
    fn from(err: QueryError) -> Self {
        DataError::Validation(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SqlRenderer {
    /// Column holding the JSON document; fields are addressed inside it.
    body: String,
}

struct Builder {
    sql: String,
    params: Vec<SqlParam>,
}

impl Builder {
    fn bind(&mut self, value: &Value) -> String {
        self.params.push(SqlParam::from(value));
        "?".to_string()
    }

    fn bind_text(&mut self, value: &str) -> String {
        self.params.push(SqlParam::Text(value.to_string()));
        "?".to_string()
    }
}

impl SqlRenderer {
    pub fn new(body_column: &str) -> Self {
        Self {
            body: body_column.to_string(),
        }
    }

    /// `SELECT {columns} FROM {table} WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
    pub fn select(
        &self,
        table: &str,
        columns: &[&str],
        query: &RelationalQuery,
    ) -> Result<(String, Vec<SqlParam>), QueryError> {
        let table = self.identifier(table, false, "table")?;
        let columns = columns
            .iter()
            .map(|c| self.identifier(c, true, "column"))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let mut b = Builder {
            sql: format!("SELECT {columns} FROM {table}"),
            params: Vec::new(),
        };
        self.append_where(&mut b, &query.criteria)?;
        self.append_order(&mut b, &query.order)?;
        if let Some(limit) = query.limit {
            b.sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            if query.limit.is_none() {
                // OFFSET is only accepted after LIMIT.
                b.sql.push_str(" LIMIT -1");
            }
            b.sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok((b.sql, b.params))
    }

    /// `SELECT COUNT(*)` over the selection; ordering and paging are dropped.
    pub fn count(&self, table: &str, query: &RelationalQuery) -> Result<(String, Vec<SqlParam>), QueryError> {
        let table = self.identifier(table, false, "table")?;
        let mut b = Builder {
            sql: format!("SELECT COUNT(*) FROM {table}"),
            params: Vec::new(),
        };
        self.append_where(&mut b, &query.criteria)?;
        Ok((b.sql, b.params))
    }

    /// `DELETE FROM {table} WHERE ...`; ordering and paging are dropped.
    pub fn delete(&self, table: &str, query: &RelationalQuery) -> Result<(String, Vec<SqlParam>), QueryError> {
        let table = self.identifier(table, false, "table")?;
        let mut b = Builder {
            sql: format!("DELETE FROM {table}"),
            params: Vec::new(),
        };
        self.append_where(&mut b, &query.criteria)?;
        Ok((b.sql, b.params))
    }

    /// Validated and quoted table name.
    pub fn table(&self, name: &str) -> Result<String, QueryError> {
        self.identifier(name, false, "table")
    }

    fn append_where(&self, b: &mut Builder, criteria: &[Vec<Predicate>]) -> Result<(), QueryError> {
        if criteria.len() == 1 && criteria[0].is_empty() {
            return Ok(());
        }
        if criteria.is_empty() {
            b.sql.push_str(" WHERE 1 = 0");
            return Ok(());
        }
        let mut branches = Vec::with_capacity(criteria.len());
        for branch in criteria {
            let mut parts = Vec::with_capacity(branch.len());
            for predicate in branch {
                parts.push(self.condition(b, predicate)?);
            }
            branches.push(if parts.is_empty() {
                "1 = 1".to_string()
            } else {
                parts.join(" AND ")
            });
        }
        b.sql.push_str(" WHERE ");
        if branches.len() == 1 {
            b.sql.push_str(&branches[0]);
        } else {
            let wrapped: Vec<String> = branches.iter().map(|c| format!("({c})")).collect();
            b.sql.push_str(&wrapped.join(" OR "));
        }
        Ok(())
    }

    fn condition(&self, b: &mut Builder, predicate: &Predicate) -> Result<String, QueryError> {
        let expr = self.field(&predicate.field)?;
        let sql = match &predicate.op {
            Operator::Eq(Value::Null) => format!("{expr} IS NULL"),
            Operator::Eq(v) => format!("{expr} = {}", b.bind(v)),
            Operator::Ne(Value::Null) => format!("{expr} IS NOT NULL"),
            Operator::Ne(v) => format!("({expr} IS NULL OR {expr} != {})", b.bind(v)),
            Operator::Gt(v) => format!("{expr} > {}", b.bind(v)),
            Operator::Gte(v) => format!("{expr} >= {}", b.bind(v)),
            Operator::Lt(v) => format!("{expr} < {}", b.bind(v)),
            Operator::Lte(v) => format!("{expr} <= {}", b.bind(v)),
            Operator::In(values) if values.is_empty() => "1 = 0".to_string(),
            Operator::In(values) => {
                let placeholders: Vec<String> = values.iter().map(|v| b.bind(v)).collect();
                format!("{expr} IN ({})", placeholders.join(", "))
            }
            Operator::Like(pattern) => format!("{expr} LIKE {}", b.bind_text(pattern)),
            Operator::Range(low, high) => {
                let low = b.bind(low);
                format!("{expr} BETWEEN {low} AND {}", b.bind(high))
            }
        };
        Ok(sql)
    }

    fn append_order(&self, b: &mut Builder, order: &[(String, SortDirection)]) -> Result<(), QueryError> {
        if order.is_empty() {
            return Ok(());
        }
        let mut clauses = Vec::with_capacity(order.len());
        for (field, dir) in order {
            let expr = self.field(field)?;
            clauses.push(match dir {
                SortDirection::Asc => format!("{expr} ASC"),
                SortDirection::Desc => format!("{expr} DESC"),
            });
        }
        b.sql.push_str(" ORDER BY ");
        b.sql.push_str(&clauses.join(", "));
        Ok(())
    }

    /// SQL expression addressing `field` inside the document column.
    pub fn field(&self, field: &str) -> Result<String, QueryError> {
        if !is_valid_identifier(field, false) {
            return Err(QueryError::InvalidIdentifier {
                kind: "field",
                ident: field.to_string(),
            });
        }
        let column = self.identifier(&self.body, false, "column")?;
        Ok(format!("json_extract({column}, '$.{field}')"))
    }

    fn identifier(&self, ident: &str, allow_star: bool, kind: &'static str) -> Result<String, QueryError> {
        if !is_valid_identifier(ident, allow_star) {
            return Err(QueryError::InvalidIdentifier {
                kind,
                ident: ident.to_string(),
            });
        }
        Ok(quote_identifier(ident, allow_star))
    }
}

pub fn is_valid_identifier(ident: &str, allow_star: bool) -> bool {
    if ident.is_empty() {
        return false;
    }
    let parts: Vec<&str> = ident.split('.').collect();
    for (idx, part) in parts.iter().enumerate() {
        if allow_star && *part == "*" {
            return idx + 1 == parts.len();
        }
        if !is_valid_segment(part) {
            return false;
        }
    }
    true
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote_identifier(ident: &str, allow_star: bool) -> String {
    let parts: Vec<&str> = ident.split('.').collect();
    let last_idx = parts.len().saturating_sub(1);
    parts
        .into_iter()
        .enumerate()
        .map(|(idx, part)| {
            if allow_star && part == "*" && idx == last_idx {
                part.to_string()
            } else {
                format!("\"{part}\"")
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterRequest, Predicate};
    use crate::query::{translator, BackendKind, NativeQuery};
    use serde_json::json;

    fn relational(query: &str) -> RelationalQuery {
        let filter = crate::filter::parse_filter(&FilterRequest::from_query(query), None).unwrap();
        match translator(BackendKind::Relational).translate(&filter) {
            NativeQuery::Relational(q) => q,
            other => panic!("unexpected query {other:?}"),
        }
    }

    #[test]
    fn test_simple_select() {
        let q = RelationalQuery {
            criteria: vec![vec![]],
            order: vec![],
            limit: None,
            offset: Some(10),
        };
        let (sql, params) = SqlRenderer::new("body").select("widgets", &["*"], &q).unwrap();
        assert_eq!(sql, "SELECT * FROM \"widgets\" LIMIT -1 OFFSET 10");
        assert!(params.is_empty());
    }

    #[test]
    fn test_or_branches() {
        let (sql, params) = SqlRenderer::new("body")
            .select("widgets", &["uid"], &relational("color=red&color=blue&size=gt(3)&limit=5"))
            .unwrap();
        let color = "json_extract(\"body\", '$.color')";
        let size = "json_extract(\"body\", '$.size')";
        assert_eq!(
            sql,
            format!(
                "SELECT \"uid\" FROM \"widgets\" WHERE ({color} = ? AND {size} > ?) OR ({color} = ? AND {size} > ?) LIMIT 5"
            )
        );
        assert_eq!(
            params,
            vec![
                SqlParam::Text("red".into()),
                SqlParam::Int(3),
                SqlParam::Text("blue".into()),
                SqlParam::Int(3),
            ]
        );
    }

    #[test]
    fn test_json_body_fields() {
        let q = RelationalQuery {
            criteria: vec![vec![
                Predicate::ne("deleted", json!(true)),
                Predicate::new("age", Operator::Range(json!(10), json!(20))),
            ]],
            order: vec![("version".into(), SortDirection::Desc)],
            limit: Some(1),
            offset: None,
        };
        let (sql, params) = SqlRenderer::new("body").count("widgets", &q).unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM \"widgets\" WHERE (json_extract(\"body\", '$.deleted') IS NULL OR json_extract(\"body\", '$.deleted') != ?) AND json_extract(\"body\", '$.age') BETWEEN ? AND ?"
        );
        assert_eq!(params, vec![SqlParam::Int(1), SqlParam::Int(10), SqlParam::Int(20)]);
    }

    #[test]
    fn test_invalid_field_is_rejected() {
        let q = RelationalQuery {
            criteria: vec![vec![Predicate::eq("name'; drop", "x")]],
            order: vec![],
            limit: None,
            offset: None,
        };
        let err = SqlRenderer::new("body").select("widgets", &["body"], &q).unwrap_err();
        assert!(matches!(err, QueryError::InvalidIdentifier { .. }));
    }
}
