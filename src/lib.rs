//! Cached, injection-safe SQL templates and derived cost metrics.
//!
//! # Module structure
//!
//! - [`registry`]: namespaced template catalog and `"<namespace>.<key>"` addressing
//! - [`builtin`]: the statically declared template library
//! - [`resolve`]: placeholder substitution and bound values
//! - [`cache`]: sharded, ttl-bounded result cache with single-flight misses
//! - [`executor`]: the execution seam and the SQLite executor
//! - [`fetcher`]: resolve → cache → execute facade
//! - [`derive`]: deltas, priority buckets, top-N, pivots
//! - [`period`]: reporting date ranges
//! - [`config`]: TOML configuration

pub mod builtin;
pub mod cache;
pub mod config;
pub mod derive;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod period;
pub mod registry;
pub mod resolve;
pub mod types;

pub use cache::{CacheKey, CacheStats, Clock, ManualClock, ResultCache, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use error::{ExecutorError, QueryError, Result};
pub use executor::{QueryExecutor, SqliteExecutor};
pub use fetcher::DataFetcher;
pub use period::{DateRange, DateRangePreset};
pub use registry::{QueryAddress, QueryTemplate, SharedRegistry, TemplateRegistry};
pub use resolve::{ClauseSpec, Placeholder, QueryResolver, ResolvedQuery, ResolverConfig};
pub use types::{MetricRow, MetricTable, ParameterSet, Value};
