//! End-to-end: template file → resolver → cache → SQLite executor.

mod util;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use finops_query::derive::DeltaDirection;
use finops_query::{
    DataFetcher, DateRange, ManualClock, ParameterSet, QueryError, QueryExecutor, QueryResolver,
    ResultCache, SharedRegistry, SqliteExecutor, TemplateRegistry, Value,
};
use tempfile::TempDir;
use util::{CountingExecutor, OPS_TEMPLATES, TestTracing, local_resolver_config, seeded_query_log};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn first_week() -> DateRange {
    DateRange::new(d(2024, 1, 1), d(2024, 1, 8)).unwrap()
}

fn week_params() -> ParameterSet {
    let mut params = ParameterSet::new();
    first_week().apply(&mut params);
    params
}

fn ops_registry() -> TemplateRegistry {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ops_queries.toml");
    std::fs::write(&path, OPS_TEMPLATES).unwrap();
    let mut registry = TemplateRegistry::builtin();
    registry.load_file(&path).unwrap();
    registry
}

struct Harness {
    fetcher: DataFetcher,
    executor: Arc<CountingExecutor>,
}

fn harness_with_cache(cache: Arc<ResultCache>) -> Harness {
    let executor = CountingExecutor::new(Arc::new(seeded_query_log()));
    let fetcher = DataFetcher::new(
        Arc::new(SharedRegistry::new(ops_registry())),
        Arc::clone(&executor) as Arc<dyn QueryExecutor>,
    )
    .with_resolver(QueryResolver::new(local_resolver_config()))
    .with_cache(cache);
    Harness { fetcher, executor }
}

fn harness() -> Harness {
    harness_with_cache(Arc::new(ResultCache::default()))
}

fn column_f64(table: &finops_query::MetricTable, column: &str) -> Vec<f64> {
    let idx = table.column_index(column).unwrap();
    table
        .rows()
        .iter()
        .map(|r| r[idx].as_f64().unwrap())
        .collect()
}

#[test]
fn template_file_namespace_is_file_stem() {
    let registry = ops_registry();
    assert!(registry.lookup("ops", "credits_by_user").is_ok());
    assert!(registry.lookup("user_360", "credits_by_user").is_ok());
    assert!(matches!(
        registry.lookup("ops_queries", "credits_by_user"),
        Err(QueryError::NamespaceNotFound(_))
    ));
}

#[test]
fn fetch_runs_against_sqlite() {
    let h = harness();
    let table = h
        .fetcher
        .fetch("ops.credits_by_user", &week_params())
        .unwrap();

    let users: Vec<String> = table.rows().iter().map(|r| r[0].to_string()).collect();
    assert_eq!(users, ["bob", "alice", "carol", "dave", "erin"]);
    assert_eq!(column_f64(&table, "credits"), [35.0, 20.0, 2.5, 1.0, 0.5]);
}

#[test]
fn optional_clause_narrows_by_bound_user() {
    let h = harness();
    let params = week_params().with("user_name", "alice");
    let resolved = h.fetcher.resolve("ops.credits_by_user", &params).unwrap();
    assert!(resolved.sql.contains("AND user_name = ?"));
    assert_eq!(resolved.binds, vec![Value::from("alice")]);

    let table = h.fetcher.fetch("ops.credits_by_user", &params).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.value(0, "credits"), Some(&Value::Float(20.0)));
}

#[test]
fn hostile_text_only_ever_travels_as_a_bind() {
    let h = harness();
    let hostile = "x'; DROP TABLE query_history; --";
    let params = ParameterSet::new().with("user_name", hostile);

    let resolved = h.fetcher.resolve("ops.queries_for_user", &params).unwrap();
    assert!(!resolved.sql.contains("DROP"));
    assert_eq!(resolved.binds, vec![Value::from(hostile)]);

    let count = h
        .fetcher
        .fetch_scalar("ops.queries_for_user", &params)
        .unwrap();
    assert_eq!(count, Some(0.0));

    // The table survived.
    let total = h.fetcher.fetch_scalar("ops.total_credits", &week_params()).unwrap();
    assert_eq!(total, Some(59.0));
}

#[test]
fn hostile_text_in_a_literal_slot_is_refused() {
    let h = harness();
    let params = ParameterSet::new()
        .with("start_date", "2024-01-01' OR '1'='1")
        .with("end_date", Value::Date(d(2024, 1, 8)));
    let err = h
        .fetcher
        .fetch("ops.total_credits", &params)
        .unwrap_err();
    assert!(matches!(err, QueryError::UnsafeLiteral { ref name, .. } if name == "start_date"));
    assert!(err.is_caller_error());
    assert_eq!(h.executor.calls(), 0);
}

#[test]
fn negative_literal_keeps_the_rest_of_the_line() {
    let mut registry = TemplateRegistry::new();
    registry
        .register("t", [("q", "SELECT 10-{offset} AS v, 'tail' AS w")])
        .unwrap();
    let fetcher = DataFetcher::new(
        Arc::new(SharedRegistry::new(registry)),
        Arc::new(SqliteExecutor::open_in_memory().unwrap()),
    );

    let table = fetcher
        .fetch("t.q", &ParameterSet::new().with("offset", -5i64))
        .unwrap();
    assert_eq!(table.columns(), ["v", "w"]);
    assert_eq!(table.value(0, "v"), Some(&Value::Int(15)));
    assert_eq!(table.value(0, "w"), Some(&Value::from("tail")));

    let table = fetcher
        .fetch("t.q", &ParameterSet::new().with("offset", -2.5))
        .unwrap();
    assert_eq!(table.value(0, "v"), Some(&Value::Float(12.5)));
}

#[test]
fn repeated_fetch_executes_once_until_ttl_lapses() {
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(ResultCache::with_clock(16, clock.clone()));
    let h = harness_with_cache(Arc::clone(&cache));
    let ttl = Duration::from_secs(600);

    let first = h
        .fetcher
        .fetch_with_ttl("ops.total_credits", &week_params(), ttl)
        .unwrap();
    let second = h
        .fetcher
        .fetch_with_ttl("ops.total_credits", &week_params(), ttl)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.executor.calls(), 1);

    clock.advance(ttl + Duration::from_secs(1));
    h.fetcher
        .fetch_with_ttl("ops.total_credits", &week_params(), ttl)
        .unwrap();
    assert_eq!(h.executor.calls(), 2);

    let stats = cache.stats().snapshot();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.expirations, 1);
}

#[test]
fn different_parameters_are_different_entries() {
    let h = harness();
    let mut later = ParameterSet::new();
    DateRange::new(d(2024, 1, 8), d(2024, 1, 15))
        .unwrap()
        .apply(&mut later);

    assert_eq!(
        h.fetcher.fetch_scalar("ops.total_credits", &week_params()).unwrap(),
        Some(59.0)
    );
    assert_eq!(
        h.fetcher.fetch_scalar("ops.total_credits", &later).unwrap(),
        Some(60.0)
    );
    assert_eq!(h.executor.calls(), 2);
}

#[test]
fn execution_failures_are_not_cached() {
    let mut registry = ops_registry();
    registry
        .register("broken", [("missing_table", "SELECT * FROM no_such_table")])
        .unwrap();
    let executor = CountingExecutor::new(Arc::new(seeded_query_log()));
    let fetcher = DataFetcher::new(
        Arc::new(SharedRegistry::new(registry)),
        Arc::clone(&executor) as Arc<dyn QueryExecutor>,
    );

    for attempt in 1..=2 {
        let err = fetcher
            .fetch("broken.missing_table", &ParameterSet::new())
            .unwrap_err();
        assert!(matches!(err, QueryError::ExecutionFailed { .. }));
        assert!(!err.is_caller_error());
        assert_eq!(executor.calls(), attempt);
    }
    assert!(fetcher.cache().is_empty());
}

#[test]
fn compare_periods_reports_cost_growth_as_regression() {
    let h = harness();
    let second_week = DateRange::new(d(2024, 1, 8), d(2024, 1, 15)).unwrap();
    let delta = h
        .fetcher
        .compare_periods("ops.total_credits", &second_week, &ParameterSet::new(), false)
        .unwrap();
    assert_eq!(delta.current, Some(60.0));
    assert_eq!(delta.previous, Some(59.0));
    assert_eq!(delta.direction, DeltaDirection::Regressed);
    assert_eq!(delta.formatted(), "+1.7%");
}

#[test]
fn registry_swap_serves_new_text_immediately() {
    let h = harness();
    assert_eq!(
        h.fetcher.fetch_scalar("ops.total_credits", &week_params()).unwrap(),
        Some(59.0)
    );

    let mut replacement = TemplateRegistry::new();
    replacement
        .register(
            "ops",
            [(
                "total_credits",
                "SELECT COUNT(*) AS metric_value FROM {query_history_table} \
                 WHERE start_date >= {start_date} AND start_date < {end_date}",
            )],
        )
        .unwrap();
    let previous = h.fetcher.registry().replace(replacement);
    assert!(previous.lookup("ops", "credits_by_user").is_ok());

    assert_eq!(
        h.fetcher.fetch_scalar("ops.total_credits", &week_params()).unwrap(),
        Some(7.0)
    );
    assert_eq!(h.executor.calls(), 2);
    // The old text's entry lingers until dropped or expired.
    assert_eq!(h.fetcher.cache().invalidate_namespace("ops"), 2);
}

#[test]
fn shared_cache_keeps_table_mappings_apart() {
    let cache = Arc::new(ResultCache::default());
    let local = harness_with_cache(Arc::clone(&cache));
    let archive_log = SqliteExecutor::open_in_memory().unwrap();
    archive_log
        .execute_batch(
            "CREATE TABLE archived_history (user_name TEXT, start_date TEXT, credits REAL);
             INSERT INTO archived_history VALUES ('old', '2024-01-02', 1000.0);",
        )
        .unwrap();
    let mut archived = local_resolver_config();
    archived
        .tables
        .insert("query_history_table".into(), "archived_history".into());
    let archive = DataFetcher::new(
        Arc::new(SharedRegistry::new(ops_registry())),
        Arc::new(archive_log),
    )
    .with_resolver(QueryResolver::new(archived))
    .with_cache(Arc::clone(&cache));

    assert_eq!(
        local.fetcher.fetch_scalar("ops.total_credits", &week_params()).unwrap(),
        Some(59.0)
    );
    assert_eq!(
        archive.fetch_scalar("ops.total_credits", &week_params()).unwrap(),
        Some(1000.0)
    );
    assert_eq!(cache.len(), 2);
}

#[test]
fn execution_is_logged_with_template_and_row_count() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let h = harness();
    h.fetcher
        .fetch("ops.credits_by_user", &week_params())
        .unwrap();
    tracing.assert_contains("Executed query");
    tracing.assert_contains("template=ops.credits_by_user");
    tracing.assert_contains("rows=5");
}
