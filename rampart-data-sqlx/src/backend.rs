use std::sync::Arc;

use dashmap::DashSet;
use rampart_core::{BeanContext, BeanError, BoxFuture, Dependency, Producer, RampartConfig};
use rampart_data::entity::{UID_FIELD, VERSION_FIELD};
use rampart_data::{
    BackendKind, DataError, NativeQuery, RecordKey, RelationalQuery, SqlParam, SqlRenderer, StorageBackend,
};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite};

use crate::error::{SqlxErrorExt, SqlxResult};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite-backed relational store.
#[derive(Clone)]
pub struct SqlxBackend {
    pool: SqlitePool,
    renderer: SqlRenderer,
    tables: Arc<DashSet<String>>,
}

impl SqlxBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            renderer: SqlRenderer::new("body"),
            tables: Arc::new(DashSet::new()),
        }
    }

    /// Open a pool on `url`. In-memory databases are per connection, so
    /// `sqlite::memory:` gets a single-connection pool.
    pub async fn connect(url: &str) -> SqlxResult<Self> {
        let max = if url.contains(":memory:") { 1 } else { 5 };
        Self::connect_with(url, max).await
    }

    pub async fn connect_with(url: &str, max_connections: u32) -> SqlxResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| e.into_data_error())?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_table(&self, collection: &str) -> SqlxResult<String> {
        let table = self.renderer.table(collection)?;
        if self.tables.contains(collection) {
            return Ok(table);
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (uid TEXT NOT NULL, version INTEGER NOT NULL, body TEXT NOT NULL, PRIMARY KEY (uid, version))"
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        tracing::debug!(collection, "table ready");
        self.tables.insert(collection.to_string());
        Ok(table)
    }

    async fn select_rows(&self, collection: &str, query: &RelationalQuery) -> SqlxResult<Vec<Value>> {
        self.ensure_table(collection).await?;
        let (sql, params) = self.renderer.select(collection, &["body"], query)?;
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.into_data_error())?;
        rows.iter()
            .map(|row| -> SqlxResult<Value> {
                let body: String = row.try_get("body").map_err(|e| e.into_data_error())?;
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }
}

fn relational(query: &NativeQuery) -> SqlxResult<&RelationalQuery> {
    match query {
        NativeQuery::Relational(q) => Ok(q),
        NativeQuery::Document(_) => Err(DataError::Validation(
            "the SQL backend only runs relational queries".into(),
        )),
    }
}

fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &[SqlParam]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

fn version_of(doc: &Value) -> i64 {
    doc.get(VERSION_FIELD).and_then(Value::as_i64).unwrap_or(0)
}

impl StorageBackend for SqlxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn find<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<Vec<Value>, DataError>> {
        Box::pin(async move { self.select_rows(collection, relational(query)?).await })
    }

    fn count<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<u64, DataError>> {
        Box::pin(async move {
            self.ensure_table(collection).await?;
            let (sql, params) = self.renderer.count(collection, relational(query)?)?;
            let row = bind_params(sqlx::query(&sql), &params)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| e.into_data_error())?;
            let count: i64 = row.try_get(0).map_err(|e| e.into_data_error())?;
            Ok(count.max(0) as u64)
        })
    }

    fn insert<'a>(&'a self, collection: &'a str, key: RecordKey, doc: Value) -> BoxFuture<'a, Result<(), DataError>> {
        Box::pin(async move {
            let table = self.ensure_table(collection).await?;
            let version = key.version.map_or_else(|| version_of(&doc), |v| v as i64);
            let body = doc.to_string();
            // Single statement, so the existence check and the write are atomic.
            let result = match key.version {
                Some(_) => {
                    let sql = format!(
                        "INSERT INTO {table} (uid, version, body) SELECT ?, ?, ? WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE uid = ? AND version = ?)"
                    );
                    sqlx::query(&sql)
                        .bind(key.uid.as_str())
                        .bind(version)
                        .bind(body)
                        .bind(key.uid.as_str())
                        .bind(version)
                        .execute(&self.pool)
                        .await
                }
                None => {
                    let sql = format!(
                        "INSERT INTO {table} (uid, version, body) SELECT ?, ?, ? WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE uid = ?)"
                    );
                    sqlx::query(&sql)
                        .bind(key.uid.as_str())
                        .bind(version)
                        .bind(body)
                        .bind(key.uid.as_str())
                        .execute(&self.pool)
                        .await
                }
            }
            .map_err(|e| e.into_data_error())?;

            if result.rows_affected() == 0 {
                return Err(DataError::Duplicate(format!("{collection}/{}", key.uid)));
            }
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
            let table = self.ensure_table(collection).await?;
            let sql = format!("UPDATE {table} SET version = ?, body = ? WHERE uid = ? AND version = ?");
            let result = sqlx::query(&sql)
                .bind(version_of(&doc))
                .bind(doc.to_string())
                .bind(uid)
                .bind(expected_version as i64)
                .execute(&self.pool)
                .await
                .map_err(|e| e.into_data_error())?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn update_many<'a>(
        &'a self,
        collection: &'a str,
        query: &'a NativeQuery,
        patch: Map<String, Value>,
    ) -> BoxFuture<'a, Result<u64, DataError>> {
        Box::pin(async move {
            let table = self.ensure_table(collection).await?;
            let docs = self.select_rows(collection, relational(query)?).await?;
            let statement = format!("UPDATE {table} SET body = ? WHERE uid = ? AND version = ?");
            let mut touched = 0;
            for mut doc in docs {
                let Some(uid) = doc.get(UID_FIELD).and_then(Value::as_str).map(str::to_string) else {
                    continue;
                };
                let version = version_of(&doc);
                if let Value::Object(fields) = &mut doc {
                    fields.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                touched += sqlx::query(&statement)
                    .bind(doc.to_string())
                    .bind(uid)
                    .bind(version)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| e.into_data_error())?
                    .rows_affected();
            }
            Ok(touched)
        })
    }

    fn delete_many<'a>(&'a self, collection: &'a str, query: &'a NativeQuery) -> BoxFuture<'a, Result<u64, DataError>> {
        Box::pin(async move {
            let (sql, params) = self.renderer.delete(collection, relational(query)?)?;
            match bind_params(sqlx::query(&sql), &params).execute(&self.pool).await {
                Ok(result) => Ok(result.rows_affected()),
                Err(err) if err.is_missing_table() => Ok(0),
                Err(err) => Err(err.into_data_error()),
            }
        })
    }

    fn truncate<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<(), DataError>> {
        Box::pin(async move {
            let table = self.renderer.table(collection)?;
            let sql = format!("DELETE FROM {table}");
            match sqlx::query(&sql).execute(&self.pool).await {
                Ok(_) => Ok(()),
                Err(err) if err.is_missing_table() => {
                    tracing::debug!(collection, "truncate of missing collection ignored");
                    Ok(())
                }
                Err(err) => Err(err.into_data_error()),
            }
        })
    }
}

/// Builds an `Arc<dyn StorageBackend>` from `rampart.datasource.url`
/// (default `sqlite::memory:`) and `rampart.datasource.max_connections`.
pub struct SqliteBackendProducer;

impl Producer for SqliteBackendProducer {
    type Output = Arc<dyn StorageBackend>;

    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<RampartConfig>()]
    }

    async fn produce(ctx: &BeanContext) -> Result<Self::Output, BeanError> {
        let config: RampartConfig = ctx.get()?;
        let url: String = config
            .get_or("rampart.datasource.url", "sqlite::memory:".to_string())
            .map_err(BeanError::construction::<Self>)?;
        let default_max = if url.contains(":memory:") { 1 } else { 5 };
        let max: u32 = config
            .get_or("rampart.datasource.max_connections", default_max)
            .map_err(BeanError::construction::<Self>)?;
        let backend = SqlxBackend::connect_with(&url, max)
            .await
            .map_err(BeanError::construction::<Self>)?;
        tracing::info!(url = %url, max_connections = max, "sqlite backend ready");
        Ok(Arc::new(backend))
    }
}
