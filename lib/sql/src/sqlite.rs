use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tracing::debug;

use crate::store::{Row, SQLError, SQLStore, Statement, Value};

/// Statements slower than this get a debug log entry.
const SLOW_STATEMENT: Duration = Duration::from_millis(250);

fn log_slow(sql: &str, started: Instant) {
    let elapsed = started.elapsed();
    if elapsed >= SLOW_STATEMENT {
        debug!(elapsed_ms = elapsed.as_millis() as u64, sql, "slow SQL statement");
    }
}

/// [`SQLStore`] implementation backed by rusqlite (bundled SQLite).
///
/// A single connection behind a mutex: SQLite serializes writers anyway,
/// and every verisafe deployment is single-process.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self, SQLError> {
        let conn = Connection::open(path)
            .map_err(|e| SQLError::Connection(e.to_string()))?;

        // WAL mode for better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| SQLError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (used by tests).
    pub fn open_in_memory() -> Result<Self, SQLError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Convert our Value enum to rusqlite's ToSql.
fn bind_params(params: &[Value]) -> Vec<Box<dyn rusqlite::types::ToSql + '_>> {
    params
        .iter()
        .map(|v| -> Box<dyn rusqlite::types::ToSql + '_> {
            match v {
                Value::Null => Box::new(rusqlite::types::Null),
                Value::Integer(i) => Box::new(*i),
                Value::Real(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.as_str()),
                Value::Blob(b) => Box::new(b.as_slice()),
            }
        })
        .collect()
}

/// Extract a Value from a rusqlite row at a given column index.
fn row_value_at(row: &rusqlite::Row, idx: usize) -> Value {
    if let Ok(i) = row.get::<_, i64>(idx) {
        return Value::Integer(i);
    }
    if let Ok(f) = row.get::<_, f64>(idx) {
        return Value::Real(f);
    }
    if let Ok(s) = row.get::<_, String>(idx) {
        return Value::Text(s);
    }
    if let Ok(b) = row.get::<_, Vec<u8>>(idx) {
        return Value::Blob(b);
    }
    Value::Null
}

impl SQLStore for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let bound = bind_params(params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let started = Instant::now();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let mut columns = Vec::new();
                for (i, name) in column_names.iter().enumerate() {
                    columns.push((name.clone(), row_value_at(row, i)));
                }
                Ok(Row { columns })
            })
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|e| SQLError::Query(e.to_string()))?);
        }
        log_slow(sql, started);
        Ok(result)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let bound = bind_params(params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();

        let started = Instant::now();
        let affected = conn
            .execute(sql, param_refs.as_slice())
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        log_slow(sql, started);
        Ok(affected as u64)
    }

    fn exec_tx(&self, statements: &[Statement]) -> Result<u64, SQLError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Transaction(e.to_string()))?;

        let tx = conn
            .transaction()
            .map_err(|e| SQLError::Transaction(e.to_string()))?;

        let started = Instant::now();
        let mut affected = 0u64;
        for (sql, params) in statements {
            let bound = bind_params(params);
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                bound.iter().map(|b| b.as_ref()).collect();

            affected += tx
                .execute(sql, param_refs.as_slice())
                .map_err(|e| SQLError::Transaction(e.to_string()))?
                as u64;
        }

        tx.commit()
            .map_err(|e| SQLError::Transaction(e.to_string()))?;
        log_slow("<transaction batch>", started);
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let s = SqliteStore::open_in_memory().unwrap();
        s.exec("CREATE TABLE t (id TEXT PRIMARY KEY, n INTEGER NOT NULL)", &[])
            .unwrap();
        s
    }

    #[test]
    fn exec_and_query_round_trip() {
        let s = store();
        s.exec(
            "INSERT INTO t (id, n) VALUES (?1, ?2)",
            &[Value::Text("a".into()), Value::Integer(7)],
        )
        .unwrap();

        let rows = s.query("SELECT id, n FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("id"), Some("a"));
        assert_eq!(rows[0].get_i64("n"), Some(7));
    }

    #[test]
    fn exec_tx_commits_all_statements() {
        let s = store();
        let affected = s
            .exec_tx(&[
                (
                    "INSERT INTO t (id, n) VALUES (?1, ?2)".into(),
                    vec![Value::Text("a".into()), Value::Integer(1)],
                ),
                (
                    "INSERT INTO t (id, n) VALUES (?1, ?2)".into(),
                    vec![Value::Text("b".into()), Value::Integer(2)],
                ),
            ])
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(s.query("SELECT id FROM t", &[]).unwrap().len(), 2);
    }

    #[test]
    fn exec_tx_rolls_back_on_failure() {
        let s = store();
        let result = s.exec_tx(&[
            (
                "INSERT INTO t (id, n) VALUES (?1, ?2)".into(),
                vec![Value::Text("a".into()), Value::Integer(1)],
            ),
            // Duplicate primary key, whole batch must roll back.
            (
                "INSERT INTO t (id, n) VALUES (?1, ?2)".into(),
                vec![Value::Text("a".into()), Value::Integer(2)],
            ),
        ]);
        assert!(result.is_err());
        assert_eq!(s.query("SELECT id FROM t", &[]).unwrap().len(), 0);
    }

    #[test]
    fn guarded_counter_update_is_atomic() {
        let s = store();
        s.exec(
            "INSERT INTO t (id, n) VALUES (?1, ?2)",
            &[Value::Text("cap".into()), Value::Integer(0)],
        )
        .unwrap();

        // Increment with an upper bound of 2 in the WHERE guard.
        for expected in [1u64, 1, 0] {
            let affected = s
                .exec(
                    "UPDATE t SET n = n + 1 WHERE id = ?1 AND n < 2",
                    &[Value::Text("cap".into())],
                )
                .unwrap();
            assert_eq!(affected, expected);
        }

        let rows = s.query("SELECT n FROM t WHERE id = ?1", &[Value::Text("cap".into())]).unwrap();
        assert_eq!(rows[0].get_i64("n"), Some(2));
    }
}
