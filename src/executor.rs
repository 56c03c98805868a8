//! Query execution seam.
//!
//! The core only needs "run this resolved query, give me a table". Warehouse
//! session handling lives behind [`QueryExecutor`]; [`SqliteExecutor`] runs the
//! same templates against a local metered-query log.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags, ToSql, params_from_iter};
use tracing::debug;

use crate::error::ExecutorError;
use crate::resolve::ResolvedQuery;
use crate::types::{MetricTable, Value};

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs a resolved query and returns its rows.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query: &ResolvedQuery) -> Result<MetricTable, ExecutorError>;
}

impl<F> QueryExecutor for F
where
    F: Fn(&ResolvedQuery) -> Result<MetricTable, ExecutorError> + Send + Sync,
{
    fn execute(&self, query: &ResolvedQuery) -> Result<MetricTable, ExecutorError> {
        self(query)
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(i) => ToSqlOutput::from(*i),
            Value::Float(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Date(d) => ToSqlOutput::from(d.format("%Y-%m-%d").to_string()),
        })
    }
}

fn value_from_sqlite(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(hex::encode(bytes)),
    }
}

/// [`QueryExecutor`] over one SQLite connection.
#[derive(Debug)]
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
    busy_timeout: Duration,
}

impl SqliteExecutor {
    /// Open an existing database read-only.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, ExecutorError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!(path = %path.display(), "Opened SQLite query log");
        Self::from_connection(conn, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self, ExecutorError> {
        Self::from_connection(Connection::open_in_memory()?, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self, ExecutorError> {
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            busy_timeout,
        })
    }

    /// Run raw statements (schema setup, fixtures).
    pub fn execute_batch(&self, sql: &str) -> Result<(), ExecutorError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn run(&self, query: &ResolvedQuery) -> rusqlite::Result<MetricTable> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&query.sql)?;
        let mut table = MetricTable::new(stmt.column_names());
        let width = stmt.column_count();

        let mut rows = stmt.query(params_from_iter(query.binds.iter()))?;
        while let Some(row) = rows.next()? {
            let mut out = Vec::with_capacity(width);
            for idx in 0..width {
                out.push(value_from_sqlite(row.get_ref(idx)?));
            }
            table.push_row(out);
        }
        Ok(table)
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, query: &ResolvedQuery) -> Result<MetricTable, ExecutorError> {
        self.run(query).map_err(|err| match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                ExecutorError::Timeout(self.busy_timeout)
            }
            other => ExecutorError::Sqlite(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::QueryAddress;
    use crate::types::ParameterSet;
    use chrono::NaiveDate;

    fn query(sql: &str, binds: Vec<Value>) -> ResolvedQuery {
        ResolvedQuery {
            address: QueryAddress::new("t", "q"),
            sql: sql.to_string(),
            binds,
            parameters: ParameterSet::new(),
        }
    }

    fn seeded() -> SqliteExecutor {
        let exec = SqliteExecutor::open_in_memory().unwrap();
        exec.execute_batch(
            "CREATE TABLE qh (user_name TEXT, start_time TEXT, credits REAL, payload BLOB);
             INSERT INTO qh VALUES ('alice', '2024-01-02', 1.5, x'cafe');
             INSERT INTO qh VALUES ('bob', '2024-01-03', 2.0, NULL);",
        )
        .unwrap();
        exec
    }

    #[test]
    fn binds_values_positionally() {
        let exec = seeded();
        let t = exec
            .execute(&query(
                "SELECT user_name, credits FROM qh WHERE user_name = ? AND start_time >= ?",
                vec![
                    Value::from("alice"),
                    Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
                ],
            ))
            .unwrap();
        assert_eq!(t.columns(), ["user_name", "credits"]);
        assert_eq!(t.rows(), [vec![Value::from("alice"), Value::Float(1.5)]]);
    }

    #[test]
    fn blobs_come_back_as_hex() {
        let exec = seeded();
        let t = exec
            .execute(&query("SELECT payload FROM qh ORDER BY user_name", vec![]))
            .unwrap();
        assert_eq!(t.rows()[0][0], Value::from("cafe"));
        assert_eq!(t.rows()[1][0], Value::Null);
    }

    #[test]
    fn empty_result_keeps_columns() {
        let exec = seeded();
        let t = exec
            .execute(&query(
                "SELECT user_name FROM qh WHERE user_name = ?",
                vec![Value::from("nobody")],
            ))
            .unwrap();
        assert!(t.is_empty());
        assert_eq!(t.columns(), ["user_name"]);
    }

    #[test]
    fn bad_sql_is_a_sqlite_error() {
        let exec = seeded();
        let err = exec.execute(&query("SELEC nope", vec![])).unwrap_err();
        assert!(matches!(err, ExecutorError::Sqlite(_)));
    }

    #[test]
    fn closures_are_executors() {
        let exec = |q: &ResolvedQuery| -> Result<MetricTable, ExecutorError> {
            Ok(MetricTable::new(["sql"]).with_row(vec![Value::from(q.sql.as_str())]))
        };
        let t = exec.execute(&query("SELECT 1", vec![])).unwrap();
        assert_eq!(t.first_value(), Some(&Value::from("SELECT 1")));
    }
}
