//! Caller-facing facade: resolve, consult the cache, execute on miss.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cache::{CacheKey, DEFAULT_TTL, ResultCache};
use crate::derive::MetricDelta;
use crate::error::{QueryError, Result};
use crate::executor::QueryExecutor;
use crate::period::DateRange;
use crate::registry::SharedRegistry;
use crate::resolve::{QueryResolver, ResolvedQuery};
use crate::types::{MetricTable, ParameterSet, Value};

pub struct DataFetcher {
    registry: Arc<SharedRegistry>,
    resolver: QueryResolver,
    cache: Arc<ResultCache>,
    executor: Arc<dyn QueryExecutor>,
    default_ttl: Duration,
}

impl DataFetcher {
    pub fn new(registry: Arc<SharedRegistry>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            registry,
            resolver: QueryResolver::default(),
            cache: Arc::new(ResultCache::default()),
            executor,
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_resolver(mut self, resolver: QueryResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Share an existing cache (typically the process-wide one).
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.registry
    }

    pub fn resolve(&self, address: &str, params: &ParameterSet) -> Result<ResolvedQuery> {
        self.resolver.resolve(&self.registry.snapshot(), address, params)
    }

    /// Fetch with the default ttl.
    pub fn fetch(&self, address: &str, params: &ParameterSet) -> Result<Arc<MetricTable>> {
        self.fetch_with_ttl(address, params, self.default_ttl)
    }

    pub fn fetch_with_ttl(
        &self,
        address: &str,
        params: &ParameterSet,
        ttl: Duration,
    ) -> Result<Arc<MetricTable>> {
        let query = self.resolve(address, params)?;
        let key = CacheKey::for_query(&query);
        self.cache.get_or_compute(&key, ttl, || self.execute(&query))
    }

    fn execute(&self, query: &ResolvedQuery) -> Result<MetricTable> {
        let start = Instant::now();
        match self.executor.execute(query) {
            Ok(table) => {
                info!(
                    template = %query.address,
                    rows = table.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Executed query"
                );
                Ok(table)
            }
            Err(source) => {
                warn!(
                    template = %query.address,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %source,
                    "Query execution failed"
                );
                Err(QueryError::ExecutionFailed {
                    address: query.address.to_string(),
                    source,
                })
            }
        }
    }

    /// First cell of the first row as a number. An empty result is `Ok(None)`.
    pub fn fetch_scalar(&self, address: &str, params: &ParameterSet) -> Result<Option<f64>> {
        let table = self.fetch(address, params)?;
        Ok(table.first_value().and_then(Value::as_f64))
    }

    /// Fetch a scalar metric for `range` and for the equal-length window
    /// before it, and compare the two.
    pub fn compare_periods(
        &self,
        address: &str,
        range: &DateRange,
        params: &ParameterSet,
        higher_is_better: bool,
    ) -> Result<MetricDelta> {
        let mut current_params = params.clone();
        range.apply(&mut current_params);
        let current = self.fetch_scalar(address, &current_params)?;

        let mut previous_params = params.clone();
        range.previous().apply(&mut previous_params);
        let previous = self.fetch_scalar(address, &previous_params)?;

        Ok(MetricDelta::new(current, previous, higher_is_better))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::DeltaDirection;
    use crate::error::ExecutorError;
    use crate::registry::TemplateRegistry;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> Arc<SharedRegistry> {
        let mut r = TemplateRegistry::new();
        r.register(
            "m",
            [
                (
                    "count",
                    "SELECT COUNT(*) FROM {query_history_table} \
                     WHERE d >= {start_date} AND d < {end_date}",
                ),
                ("fixed", "SELECT 1 {user_filter}"),
            ],
        )
        .unwrap();
        Arc::new(SharedRegistry::new(r))
    }

    /// Answers 150 for the window starting 2024-01-08 and 100 for anything else.
    fn day_executor(calls: Arc<AtomicUsize>) -> Arc<dyn QueryExecutor> {
        Arc::new(move |q: &ResolvedQuery| -> std::result::Result<MetricTable, ExecutorError> {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = if q.sql.contains(">= '2024-01-08'") { 150 } else { 100 };
            Ok(MetricTable::new(["metric_value"]).with_row(vec![Value::Int(value)]))
        })
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn compare_periods_fetches_both_windows() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = DataFetcher::new(registry(), day_executor(Arc::clone(&calls)));
        let range = DateRange::new(d(2024, 1, 8), d(2024, 1, 15)).unwrap();
        let delta = fetcher
            .compare_periods("m.count", &range, &ParameterSet::new(), true)
            .unwrap();
        assert_eq!(delta.current, Some(150.0));
        assert_eq!(delta.previous, Some(100.0));
        assert_eq!(delta.delta_pct, Some(50.0));
        assert_eq!(delta.direction, DeltaDirection::Improved);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unreferenced_params_share_a_cache_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = DataFetcher::new(registry(), day_executor(Arc::clone(&calls)));
        fetcher.fetch("m.fixed", &ParameterSet::new()).unwrap();
        fetcher
            .fetch("m.fixed", &ParameterSet::new().with("irrelevant", 1i64))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        fetcher
            .fetch("m.fixed", &ParameterSet::new().with("user_name", "bob"))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_result_scalar_is_none() {
        let exec: Arc<dyn QueryExecutor> =
            Arc::new(|_: &ResolvedQuery| -> std::result::Result<MetricTable, ExecutorError> {
                Ok(MetricTable::new(["metric_value"]))
            });
        let fetcher = DataFetcher::new(registry(), exec);
        assert_eq!(fetcher.fetch_scalar("m.fixed", &ParameterSet::new()).unwrap(), None);
    }

    #[test]
    fn execution_failure_names_the_template() {
        let exec: Arc<dyn QueryExecutor> =
            Arc::new(|_: &ResolvedQuery| -> std::result::Result<MetricTable, ExecutorError> {
                Err(ExecutorError::Backend("warehouse suspended".into()))
            });
        let fetcher = DataFetcher::new(registry(), exec);
        let err = fetcher.fetch("m.fixed", &ParameterSet::new()).unwrap_err();
        assert!(matches!(&err, QueryError::ExecutionFailed { address, .. } if address == "m.fixed"));
        assert!(!err.is_caller_error());
        assert!(fetcher.cache().is_empty());
    }

    #[test]
    fn resolution_errors_skip_the_executor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = DataFetcher::new(registry(), day_executor(Arc::clone(&calls)));
        let err = fetcher.fetch("m.count", &ParameterSet::new()).unwrap_err();
        assert!(matches!(err, QueryError::MissingParameter { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
