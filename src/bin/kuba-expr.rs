//! Kuba Expr command line
//!
//! Parses and evaluates expressions against series loaded from a JSON file.
//!
//! # Commands
//!
//! - `eval` - Evaluate an expression and print the results as JSON
//! - `check` - Parse an expression and print its type and result tags
//! - `functions` - List the built-in functions
//! - `check-config` - Validate a configuration file
//!
//! # Data file
//!
//! ```json
//! {
//!   "series": [
//!     {"metric": "cpu", "tags": {"host": "web-01"}, "points": [[1700000000, 42.5]]}
//!   ]
//! }
//! ```
//!
//! Timestamps are unix seconds.
//!
//! # Configuration
//!
//! Read from `--config`, then `KUBA_EXPR_CONFIG`, then `./kuba-expr.toml`,
//! then defaults. Environment overrides apply in every case.

use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use kuba_expr::backend::{Backends, InMemoryBackend};
use kuba_expr::{EvalConfig, ExecuteContext, Expr, FunctionRegistry, Series, TagSet};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// CLI Definition
// =============================================================================

/// Kuba Expr - expression evaluator for tagged time-series data
#[derive(Parser)]
#[command(name = "kuba-expr")]
#[command(version)]
#[command(about = "Evaluate alerting expressions over tagged time series", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (overrides KUBA_EXPR_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression
    Eval {
        /// Expression text
        expr: String,

        /// JSON file with the series to query
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<String>,

        /// Drop unjoined groups instead of pairing them with NaN
        #[arg(long)]
        unjoined_ok: bool,

        /// Record intermediate computations
        #[arg(long)]
        computations: bool,
    },

    /// Parse an expression without evaluating it
    Check {
        /// Expression text
        expr: String,
    },

    /// List built-in functions
    Functions,

    /// Validate configuration file
    CheckConfig,
}

// =============================================================================
// Data loading
// =============================================================================

#[derive(Debug, Deserialize)]
struct DataFile {
    #[serde(default)]
    series: Vec<SeriesRecord>,
}

#[derive(Debug, Deserialize)]
struct SeriesRecord {
    metric: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    points: Vec<(i64, f64)>,
}

fn load_data(path: &Path) -> Result<InMemoryBackend, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let data: DataFile = serde_json::from_str(&contents)?;
    let backend = InMemoryBackend::new();
    for record in data.series {
        let mut series = Series::new();
        for (ts, value) in record.points {
            let instant = Utc
                .timestamp_opt(ts, 0)
                .single()
                .ok_or_else(|| format!("timestamp {} out of range", ts))?;
            series.insert(instant, value);
        }
        let tags: TagSet = record.tags.into_iter().collect();
        backend.add_series(&record.metric, tags, series);
    }
    Ok(backend)
}

fn load_config(path: Option<&Path>) -> Result<EvalConfig, Box<dyn std::error::Error>> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("KUBA_EXPR_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let local = PathBuf::from("kuba-expr.toml");
            local.exists().then_some(local)
        });
    let config = match path {
        Some(path) => EvalConfig::from_file_with_env(&path)?,
        None => {
            let config = EvalConfig::from_env()?;
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn parse_now(now: Option<&str>) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    Ok(match now {
        Some(text) => DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc),
        None => Utc::now(),
    })
}

// =============================================================================
// Command Handlers
// =============================================================================

fn cmd_eval(
    config: &EvalConfig,
    expr: &str,
    data: Option<&Path>,
    now: Option<&str>,
    unjoined_ok: bool,
    computations: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut backends = Backends::new();
    if let Some(path) = data {
        backends.register("file", Arc::new(load_data(path)?));
        debug!(path = %path.display(), "loaded series");
    }

    let mut ctx = ExecuteContext::new(backends).with_config(config)?.at(parse_now(now)?);
    if unjoined_ok {
        ctx = ctx.with_unjoined_ok(true);
    }
    if computations {
        ctx = ctx.with_computations(true);
    }

    let expr = Expr::new(expr, &FunctionRegistry::builtin())?;
    let execution = expr.execute(&ctx)?;
    info!(
        results = execution.results.len(),
        queries = execution.queries.len(),
        "evaluated {}",
        expr
    );
    println!("{}", serde_json::to_string_pretty(&execution)?);
    Ok(())
}

fn cmd_check(expr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let expr = Expr::new(expr, &FunctionRegistry::builtin())?;
    println!("Expression: {}", expr.root());
    println!("Type: {}", expr.return_type());
    match expr.tags()? {
        Some(keys) => println!("Tags: {}", keys.into_iter().collect::<Vec<_>>().join(",")),
        None => println!("Tags: unknown"),
    }
    Ok(())
}

fn cmd_functions() {
    let registry = FunctionRegistry::builtin();
    for name in registry.names() {
        if let Some(spec) = registry.get(name) {
            let args: Vec<String> = spec.args.iter().map(ToString::to_string).collect();
            println!("{}({}) -> {}", name, args.join(", "), spec.ret);
        }
    }
}

fn cmd_check_config(config: &EvalConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Configuration is valid!");
    println!();
    println!("Evaluation:");
    println!("  Computations: {}", config.evaluation.enable_computations);
    println!("  Unjoined ok: {}", config.evaluation.unjoined_ok);
    println!("  Auto downsample: {}", config.evaluation.autods);
    println!();
    println!("Cache:");
    println!("  Enabled: {}", config.cache.enabled);
    println!("  Max entries: {}", config.cache.max_entries);
    println!();
    println!("Squelch rules: {}", config.squelch.rules.len());
    println!("Log level: {}", config.logging.log_level);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Eval {
            expr,
            data,
            now,
            unjoined_ok,
            computations,
        } => cmd_eval(
            &config,
            expr,
            data.as_deref(),
            now.as_deref(),
            *unjoined_ok,
            *computations,
        ),
        Commands::Check { expr } => cmd_check(expr),
        Commands::Functions => {
            cmd_functions();
            Ok(())
        }
        Commands::CheckConfig => cmd_check_config(&config),
    }
}
