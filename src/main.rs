use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use finops_query::derive::{
    DeltaDirection, bucket_by_percentile, format_delta, percentage_delta, top_n_with_overflow,
};
use finops_query::{
    AppConfig, DataFetcher, DateRange, DateRangePreset, ParameterSet, QueryError, QueryResolver,
    ResultCache, SharedRegistry, SqliteExecutor, Value,
};

#[derive(Parser, Debug)]
#[command(
    name = "finq",
    version,
    about = "Resolve and run cost/usage query templates against a metered-query log"
)]
struct Cli {
    /// Config file (default: $FINQ_CONFIG, then $XDG_CONFIG_HOME/finq/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Extra template file; the namespace is the file stem minus `_queries`
    #[arg(long = "templates-file", value_name = "PATH", global = true)]
    template_files: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List template addresses
    Templates {
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Print a template and its placeholders
    Show { address: String },
    /// Resolve a template to SQL plus bound values (JSON)
    Resolve {
        address: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Execute a template against a SQLite database and print the rows (JSON)
    Run {
        /// SQLite database holding the query log
        #[arg(long)]
        db: PathBuf,
        address: String,
        #[command(flatten)]
        params: ParamArgs,
        /// Keep the top N rows and fold the rest into "Others"
        #[arg(long, requires_all = ["name_col", "value_col"])]
        top: Option<usize>,
        #[arg(long)]
        name_col: Option<String>,
        #[arg(long)]
        value_col: Option<String>,
        /// Label each row with a percentile priority bucket over this column
        #[arg(long, value_name = "COLUMN", conflicts_with = "top")]
        priority: Option<String>,
    },
    /// Percentage change between two values
    Delta {
        #[arg(allow_negative_numbers = true)]
        current: f64,
        #[arg(allow_negative_numbers = true)]
        previous: f64,
        #[arg(long)]
        lower_is_better: bool,
    },
}

#[derive(Args, Debug)]
struct ParamArgs {
    /// Period start (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Period end, exclusive (YYYY-MM-DD; default: tomorrow)
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
    /// Last N days including today
    #[arg(long, conflicts_with_all = ["start", "range"])]
    last_days: Option<u32>,
    /// Preset window: 7d, 30d, 90d, 180d, 270d, 365d
    #[arg(long, conflicts_with = "start")]
    range: Option<DateRangePreset>,
    /// Restrict to one user (fills the `user_filter` clause)
    #[arg(long)]
    user: Option<String>,
    /// Extra parameter; the value is typed as integer, float, date, or text
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((name.to_string(), Value::infer(value)))
}

impl ParamArgs {
    fn to_parameter_set(&self, today: NaiveDate) -> anyhow::Result<ParameterSet> {
        let mut params = ParameterSet::new();

        let range = match (self.start, self.last_days, self.range) {
            (Some(start), _, _) => {
                let end = self
                    .end
                    .or_else(|| today.succ_opt())
                    .context("no valid end date")?;
                let Some(range) = DateRange::new(start, end) else {
                    bail!("--end ({end}) is before --start ({start})");
                };
                Some(range)
            }
            (None, Some(days), _) => Some(DateRange::last_n_days(today, days)),
            (None, None, Some(preset)) => Some(preset.range(today)),
            (None, None, None) => None,
        };
        if let Some(range) = range {
            range.apply(&mut params);
        }
        if let Some(user) = &self.user {
            params.insert("user_name", user.as_str());
        }
        for (name, value) in &self.params {
            params.insert(name.as_str(), value.clone());
        }
        Ok(params)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FINQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::load().context("loading config")?,
    };
    config.template_files.extend(cli.template_files.iter().cloned());
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let today = Local::now().date_naive();

    match &cli.command {
        Command::Delta {
            current,
            previous,
            lower_is_better,
        } => {
            let delta = percentage_delta(*current, *previous);
            let direction = DeltaDirection::classify(Some(delta), !lower_is_better);
            print_json(&serde_json::json!({
                "current": current,
                "previous": previous,
                "delta_pct": delta,
                "formatted": format_delta(Some(delta)),
                "direction": direction.as_str(),
            }))
        }
        Command::Templates { namespace } => {
            let registry = config.build_registry().context("loading templates")?;
            for template in registry.templates() {
                if namespace.as_deref().is_none_or(|ns| ns == template.namespace()) {
                    println!("{}", template.address());
                }
            }
            Ok(())
        }
        Command::Show { address } => {
            let registry = config.build_registry().context("loading templates")?;
            let template = registry.lookup_address(&address.parse()?)?;
            let placeholders: Vec<String> = template
                .placeholders()
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("-- {}", template.address());
            println!("-- placeholders: {}", placeholders.join(", "));
            println!("{}", template.text().trim());
            Ok(())
        }
        Command::Resolve { address, params } => {
            let registry = config.build_registry().context("loading templates")?;
            let resolver = QueryResolver::new(config.resolver_config());
            let params = params.to_parameter_set(today)?;
            print_json(&resolver.resolve(&registry, address, &params)?)
        }
        Command::Run {
            db,
            address,
            params,
            top,
            name_col,
            value_col,
            priority,
        } => {
            let registry = config.build_registry().context("loading templates")?;
            let executor = SqliteExecutor::open(db, config.sqlite.busy_timeout())
                .with_context(|| format!("opening {}", db.display()))?;
            let registry = Arc::new(SharedRegistry::new(registry));
            let fetcher = DataFetcher::new(registry, Arc::new(executor))
                .with_resolver(QueryResolver::new(config.resolver_config()))
                .with_cache(Arc::new(ResultCache::new(config.cache.capacity_per_shard)))
                .with_default_ttl(config.cache.ttl());

            let table = fetcher.fetch(address, &params.to_parameter_set(today)?)?;
            let output = match (top, name_col, value_col, priority) {
                (Some(n), Some(name), Some(value), _) => {
                    top_n_with_overflow(&table, value, name, *n)
                }
                (_, _, _, Some(column)) => bucket_by_percentile(
                    &table,
                    column,
                    config.priority.high_percentile,
                    config.priority.medium_percentile,
                )
                .to_metric_table(&table),
                _ => (*table).clone(),
            };
            fetcher.cache().log_stats();
            print_json(&serde_json::json!({
                "template": address,
                "table": output.to_json(),
            }))
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        let caller_error = err
            .downcast_ref::<QueryError>()
            .is_some_and(QueryError::is_caller_error);
        std::process::exit(if caller_error { 2 } else { 1 });
    }
    Ok(())
}
