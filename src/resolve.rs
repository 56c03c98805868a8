//! Template resolution.
//!
//! Placeholder syntax inside template text:
//!
//! | Form      | Meaning                                                         |
//! |-----------|-----------------------------------------------------------------|
//! | `{name}`  | structural table name, optional clause, or literal-safe value   |
//! | `{:name}` | bound value: emitted as `?`, value appended to the bind list    |
//! | `{{` `}}` | literal braces                                                  |
//!
//! Caller parameters never reach the SQL text unless they are dates or finite
//! numbers. Everything else travels as a bound value.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::registry::{QueryAddress, QueryTemplate, TemplateRegistry};
use crate::types::{ParameterSet, Value};

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{(:?)([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex compiles")
});

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

/// A placeholder occurrence in template text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    /// `{name}`
    Structural(String),
    /// `{:name}`
    Bound(String),
}

impl Placeholder {
    pub fn name(&self) -> &str {
        match self {
            Self::Structural(n) | Self::Bound(n) => n,
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural(n) => write!(f, "{{{n}}}"),
            Self::Bound(n) => write!(f, "{{:{n}}}"),
        }
    }
}

/// Every placeholder occurrence in `text`, in order, escapes skipped.
pub fn scan_placeholders(text: &str) -> Vec<Placeholder> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|caps| placeholder_of(&caps))
        .collect()
}

fn placeholder_of(caps: &Captures<'_>) -> Option<Placeholder> {
    let name = caps.get(2)?.as_str().to_string();
    if caps.get(1).is_some_and(|m| !m.as_str().is_empty()) {
        Some(Placeholder::Bound(name))
    } else {
        Some(Placeholder::Structural(name))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// An optional equality filter: `AND <column> = ?` when `param` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseSpec {
    pub param: String,
    pub column: String,
}

impl ClauseSpec {
    pub fn new(param: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            column: column.into(),
        }
    }
}

/// Trusted inputs to resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Structural placeholder → table or view name.
    pub tables: BTreeMap<String, String>,
    /// Optional clause placeholder → clause definition.
    pub clauses: BTreeMap<String, ClauseSpec>,
    /// Literal placeholders that must be supplied by the caller.
    pub value_params: BTreeSet<String>,
}

pub fn default_tables() -> BTreeMap<String, String> {
    [
        ("query_history_table", "SNOWFLAKE.ACCOUNT_USAGE.QUERY_HISTORY"),
        ("metering_history_table", "SNOWFLAKE.ACCOUNT_USAGE.METERING_HISTORY"),
        ("login_history_table", "SNOWFLAKE.ACCOUNT_USAGE.LOGIN_HISTORY"),
        (
            "warehouse_metering_history_table",
            "SNOWFLAKE.ACCOUNT_USAGE.WAREHOUSE_METERING_HISTORY",
        ),
        ("users_table", "SNOWFLAKE.ACCOUNT_USAGE.USERS"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn default_clauses() -> BTreeMap<String, ClauseSpec> {
    BTreeMap::from([(
        "user_filter".to_string(),
        ClauseSpec::new("user_name", "user_name"),
    )])
}

pub fn default_value_params() -> BTreeSet<String> {
    ["start_date", "end_date", "prev_start_date", "prev_end_date"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            tables: default_tables(),
            clauses: default_clauses(),
            value_params: default_value_params(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Output of resolution: executable SQL plus its positional binds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedQuery {
    #[serde(serialize_with = "serialize_address")]
    pub address: QueryAddress,
    pub sql: String,
    pub binds: Vec<Value>,
    /// The parameters the template actually consumed.
    pub parameters: ParameterSet,
}

fn serialize_address<S: serde::Serializer>(
    address: &QueryAddress,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(address)
}

#[derive(Debug, Clone, Default)]
pub struct QueryResolver {
    config: ResolverConfig,
}

impl QueryResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Look up `"<namespace>.<key>"` and resolve it against `params`.
    pub fn resolve(
        &self,
        registry: &TemplateRegistry,
        address: &str,
        params: &ParameterSet,
    ) -> Result<ResolvedQuery> {
        let address = QueryAddress::parse(address)?;
        let template = registry.lookup_address(&address)?;
        self.resolve_template(template, params)
    }

    pub fn resolve_template(
        &self,
        template: &QueryTemplate,
        params: &ParameterSet,
    ) -> Result<ResolvedQuery> {
        let text = template.text();
        let label = template.address().to_string();
        let mut sql = String::with_capacity(text.len());
        let mut binds = Vec::new();
        let mut consumed = ParameterSet::new();
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            sql.push_str(&text[last..whole.start()]);
            last = whole.end();

            match placeholder_of(&caps) {
                None => sql.push_str(&whole.as_str()[..1]),
                Some(Placeholder::Bound(name)) => {
                    let value = params.get(&name).ok_or_else(|| QueryError::MissingParameter {
                        template: label.clone(),
                        name: name.clone(),
                    })?;
                    sql.push('?');
                    binds.push(value.clone());
                    consumed.insert(name, value.clone());
                }
                Some(Placeholder::Structural(name)) => {
                    self.substitute(&label, &name, params, &mut sql, &mut binds, &mut consumed)?;
                }
            }
        }
        sql.push_str(&text[last..]);

        debug!(
            template = %label,
            binds = binds.len(),
            consumed = consumed.len(),
            "Resolved template"
        );
        Ok(ResolvedQuery {
            address: template.address().clone(),
            sql,
            binds,
            parameters: consumed,
        })
    }

    fn substitute(
        &self,
        label: &str,
        name: &str,
        params: &ParameterSet,
        sql: &mut String,
        binds: &mut Vec<Value>,
        consumed: &mut ParameterSet,
    ) -> Result<()> {
        if let Some(table) = self.config.tables.get(name) {
            sql.push_str(table);
            return Ok(());
        }

        if let Some(clause) = self.config.clauses.get(name) {
            if let Some(value) = params.get(&clause.param).filter(|v| !v.is_null()) {
                sql.push_str("AND ");
                sql.push_str(&clause.column);
                sql.push_str(" = ?");
                binds.push(value.clone());
                consumed.insert(clause.param.clone(), value.clone());
            }
            return Ok(());
        }

        let missing = || QueryError::MissingParameter {
            template: label.to_string(),
            name: name.to_string(),
        };

        match params.get(name) {
            Some(Value::Text(_)) => Err(QueryError::UnsafeLiteral {
                template: label.to_string(),
                name: name.to_string(),
            }),
            Some(value) => {
                let literal = value.sql_literal().ok_or_else(missing)?;
                sql.push_str(&literal);
                consumed.insert(name, value.clone());
                Ok(())
            }
            None if self.config.value_params.contains(name) => Err(missing()),
            None => Err(QueryError::UnknownPlaceholder {
                template: label.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
