use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use finops_query::{
    ExecutorError, MetricTable, QueryExecutor, ResolvedQuery, ResolverConfig, SqliteExecutor,
};

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

#[allow(dead_code)]
struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Wraps an executor and counts how often it actually runs.
#[allow(dead_code)]
pub struct CountingExecutor {
    inner: Arc<dyn QueryExecutor>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl CountingExecutor {
    pub fn new(inner: Arc<dyn QueryExecutor>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QueryExecutor for CountingExecutor {
    fn execute(&self, query: &ResolvedQuery) -> Result<MetricTable, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(query)
    }
}

/// Schema and rows for the fixture query log: five users across two weeks
/// of January 2024.
#[allow(dead_code)]
pub const SEED_SQL: &str = "
    CREATE TABLE query_history (
        user_name TEXT NOT NULL,
        role_name TEXT NOT NULL,
        start_date TEXT NOT NULL,
        start_hour INTEGER NOT NULL,
        credits REAL NOT NULL,
        status TEXT NOT NULL
    );
    INSERT INTO query_history VALUES
        ('alice', 'ANALYST', '2024-01-02', 9, 12.0, 'SUCCESS'),
        ('alice', 'ANALYST', '2024-01-03', 10, 8.0, 'SUCCESS'),
        ('bob', 'ENGINEER', '2024-01-02', 9, 30.0, 'SUCCESS'),
        ('bob', 'ENGINEER', '2024-01-04', 14, 5.0, 'FAIL'),
        ('carol', 'ANALYST', '2024-01-05', 16, 2.5, 'SUCCESS'),
        ('dave', 'ADMIN', '2024-01-06', 23, 1.0, 'SUCCESS'),
        ('erin', 'ANALYST', '2024-01-06', 0, 0.5, 'SUCCESS'),
        ('alice', 'ANALYST', '2024-01-09', 9, 20.0, 'SUCCESS'),
        ('bob', 'ENGINEER', '2024-01-10', 11, 40.0, 'SUCCESS');
";

#[allow(dead_code)]
pub fn seeded_query_log() -> SqliteExecutor {
    let exec = SqliteExecutor::open_in_memory().expect("in-memory sqlite");
    exec.execute_batch(SEED_SQL).expect("seed query log");
    exec
}

/// Resolver pointing the structural table names at the local fixture tables.
#[allow(dead_code)]
pub fn local_resolver_config() -> ResolverConfig {
    let mut config = ResolverConfig::default();
    config
        .tables
        .insert("query_history_table".into(), "query_history".into());
    config
}

/// Template file contents for the `ops` namespace used across tests.
#[allow(dead_code)]
pub const OPS_TEMPLATES: &str = r#"
credits_by_user = """
SELECT user_name, SUM(credits) AS credits
FROM {query_history_table}
WHERE start_date >= {start_date} AND start_date < {end_date} {user_filter}
GROUP BY user_name
ORDER BY credits DESC, user_name
"""

total_credits = """
SELECT COALESCE(SUM(credits), 0) AS metric_value
FROM {query_history_table}
WHERE start_date >= {start_date} AND start_date < {end_date}
"""

queries_for_user = """
SELECT COUNT(*) AS metric_value
FROM {query_history_table}
WHERE user_name = {:user_name}
"""

hourly_credits = """
SELECT user_name, start_hour, SUM(credits) AS credits
FROM {query_history_table}
WHERE start_date >= {start_date} AND start_date < {end_date}
GROUP BY user_name, start_hour
ORDER BY user_name, start_hour
"""
"#;
