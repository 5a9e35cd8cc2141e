use crate::backend::{RelationalStore, Row};
use async_trait::async_trait;
use fieldguard_core::{SqlParam, StoreError};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::Arc;

/// Relational store backed by SQLite.
///
/// `??` placeholders are expanded into quoted identifiers before the
/// statement is prepared; `?` placeholders are bound as values.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StoreError::with_source(format!("cannot open {}", path.display()), e))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::with_source("cannot open in-memory database", e))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run one or more statements without parameters (schema setup, seeding)
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute_batch(sql)
            .map_err(|e| StoreError::with_source("statement batch failed", e))
    }

    /// Expand identifiers and collect the values to bind, in order
    pub fn render(sql: &str, params: &[SqlParam]) -> Result<(String, Vec<SqlValue>), StoreError> {
        let mut rendered = String::with_capacity(sql.len() + params.len() * 8);
        let mut binds = Vec::new();
        let mut params = params.iter();
        let mut chars = sql.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '?' {
                rendered.push(c);
                continue;
            }

            let identifier = chars.peek() == Some(&'?');
            if identifier {
                chars.next();
            }

            match (identifier, params.next()) {
                (true, Some(SqlParam::Ident(name))) => rendered.push_str(&quote_identifier(name)),
                (false, Some(SqlParam::Value(value))) => {
                    rendered.push('?');
                    binds.push(to_sql_value(value));
                }
                (true, Some(SqlParam::Value(_))) => {
                    return Err(StoreError::new("identifier placeholder bound to a value"));
                }
                (false, Some(SqlParam::Ident(name))) => {
                    return Err(StoreError::new(format!("value placeholder bound to identifier {name}")));
                }
                (_, None) => return Err(StoreError::new("fewer parameters than placeholders")),
            }
        }

        if params.next().is_some() {
            return Err(StoreError::new("more parameters than placeholders"));
        }
        Ok((rendered, binds))
    }

    fn run(conn: &Connection, sql: &str, binds: Vec<SqlValue>) -> rusqlite::Result<Vec<Row>> {
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt.query_map(params_from_iter(binds.iter()), |row| {
            let mut out = Row::new();
            for (i, name) in names.iter().enumerate() {
                out.insert(name.clone(), from_sql_value(row.get_ref(i)?));
            }
            Ok(out)
        })?;

        rows.collect()
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, StoreError> {
        let (sql, binds) = Self::render(sql, params)?;
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            Self::run(&conn, &sql, binds).map_err(|e| StoreError::with_source(format!("query failed: {sql}"), e))
        })
        .await
        .map_err(|e| StoreError::with_source("sqlite worker failed", e))?
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested values are stored as JSON text
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(name: &str) -> SqlParam {
        SqlParam::Ident(name.to_string())
    }

    #[test]
    fn test_render_expands_identifiers() {
        let (sql, binds) = SqliteStore::render(
            "SELECT COUNT(*) AS cnt FROM ?? WHERE ?? = ? AND ?? != ?",
            &[
                ident("users"),
                ident("user\"name"),
                SqlParam::Value(json!("takenuser")),
                ident("id"),
                SqlParam::Value(json!(4)),
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS cnt FROM \"users\" WHERE \"user\"\"name\" = ? AND \"id\" != ?"
        );
        assert_eq!(binds, vec![SqlValue::Text("takenuser".to_string()), SqlValue::Integer(4)]);
    }

    #[test]
    fn test_render_rejects_misaligned_params() {
        assert!(SqliteStore::render("?? = ?", &[ident("a")]).is_err());
        assert!(SqliteStore::render("?? = ?", &[SqlParam::Value(json!(1)), ident("a")]).is_err());
        assert!(SqliteStore::render("?", &[SqlParam::Value(json!(1)), SqlParam::Value(json!(2))]).is_err());
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, score REAL);
                 INSERT INTO users (id, username, score) VALUES (1, 'takenuser', 1.5), (2, 'other', NULL);",
            )
            .unwrap();

        let rows = store
            .query(
                "SELECT ?? AS name, ?? AS score FROM ?? WHERE ?? = ?",
                &[ident("username"), ident("score"), ident("users"), ident("id"), SqlParam::Value(json!(1))],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&json!("takenuser")));
        assert_eq!(rows[0].get("score"), Some(&json!(1.5)));
    }

    #[tokio::test]
    async fn test_query_failure_is_store_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .query("SELECT COUNT(*) AS cnt FROM ??", &[ident("missing_table")])
            .await
            .unwrap_err();
        assert!(err.message().contains("query failed"));
    }
}
