//! Metrica CLI - compile, validate and diagnose metric definitions
//!
//! Usage:
//!   metrica compile <catalog.json> --metric <id> [--variant <file>] [--dialect <dialect>]
//!   metrica validate <catalog.json> [--check-sql]
//!   metrica diagnose <catalog.json> --variant <file>
//!
//! Examples:
//!   metrica compile catalog.json --metric monthly_revenue --params '{"since": "2024-01-01"}'
//!   metrica compile catalog.json --metric monthly_revenue --dialect tsql --context region=EU
//!   metrica diagnose catalog.json --variant revenue_eu.json

use clap::{Parser, Subcommand, ValueEnum};
use metrica::binder::TenantContext;
use metrica::config::Settings;
use metrica::execution::ConnectorRegistry;
use metrica::model::variant::{MetricVariantRequest, SourceRef};
use metrica::planner::plan_query;
use metrica::resolver::{CatalogFile, InMemoryCatalog, MetricCatalog, Resolver};
use metrica::service::{MetricService, QueryRequest, QueryTarget};
use metrica::sql::syntax::check_syntax;
use metrica::sql::{render_plan, Dialect};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metrica")]
#[command(about = "Metrica - compile semantic-layer metrics to multi-dialect SQL")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $METRICA_CONFIG, ./metrica.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a metric or variant to SQL
    Compile {
        /// Path to the catalog file
        catalog: PathBuf,

        /// Metric (or stored variant) id
        #[arg(short, long, required_unless_present = "variant")]
        metric: Option<String>,

        /// Exact metric version (latest if not specified)
        #[arg(long)]
        version: Option<u32>,

        /// Variant request file (JSON)
        #[arg(long)]
        variant: Option<PathBuf>,

        /// SQL dialect to generate (the data source's dialect if not specified)
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// Request parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,

        /// Environment id for the tenant context
        #[arg(short, long, default_value = "default")]
        environment: String,

        /// Consumer-context attribute as key=value (repeatable)
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, Value)>,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// Validate every metric in a catalog
    Validate {
        /// Path to the catalog file
        catalog: PathBuf,

        /// Also parse the generated SQL for each metric's dialect
        #[arg(long)]
        check_sql: bool,
    },

    /// Suggest fixes for a variant request that does not resolve
    Diagnose {
        /// Path to the catalog file
        catalog: PathBuf,

        /// Variant request file (JSON)
        #[arg(long)]
        variant: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Tsql,
    Duckdb,
    Bigquery,
    Snowflake,
    Databricks,
    Redshift,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Bigquery => Dialect::BigQuery,
            DialectArg::Snowflake => Dialect::Snowflake,
            DialectArg::Databricks => Dialect::Databricks,
            DialectArg::Redshift => Dialect::Redshift,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// SQL followed by the bound parameters
    Sql,
    /// The full compiled query as JSON
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Compile {
            catalog,
            metric,
            version,
            variant,
            dialect,
            params,
            environment,
            context,
            output,
        } => {
            let target = match (variant, metric) {
                (Some(path), _) => match read_json::<MetricVariantRequest>(&path) {
                    Ok(request) => QueryTarget::Variant(request),
                    Err(e) => {
                        eprintln!("{}", e);
                        return ExitCode::FAILURE;
                    }
                },
                (None, Some(id)) => QueryTarget::Metric(SourceRef {
                    metric_id: id,
                    version,
                }),
                (None, None) => {
                    eprintln!("Either --metric or --variant is required");
                    return ExitCode::FAILURE;
                }
            };
            let parameters = match parse_params(params.as_deref()) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let mut tenant = TenantContext::new(&environment);
            tenant.attributes.extend(context);

            let request = QueryRequest {
                target,
                parameters,
                dialect: dialect.map(Dialect::from),
                tenant,
            };
            cmd_compile(&catalog, settings, &request, output)
        }
        Commands::Validate { catalog, check_sql } => cmd_validate(&catalog, &settings, check_sql),
        Commands::Diagnose { catalog, variant } => cmd_diagnose(&catalog, settings, &variant),
    }
}

fn cmd_compile(
    catalog: &Path,
    settings: Settings,
    request: &QueryRequest,
    output: OutputFormat,
) -> ExitCode {
    let service = match load_service(catalog, settings) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match service.compile(request) {
        Ok(compiled) => {
            match output {
                OutputFormat::Sql => {
                    println!("{}", compiled.sql);
                    let bound: Map<String, Value> = compiled
                        .parameters
                        .named()
                        .iter()
                        .map(|(name, value)| (name.clone(), value.to_json()))
                        .collect();
                    if !bound.is_empty() {
                        println!();
                        println!("-- Parameters ({})", compiled.dialect);
                        println!("{}", to_pretty_json(&bound));
                    }
                }
                OutputFormat::Json => println!("{}", to_pretty_json(&compiled)),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Compilation error [{}]: {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate(catalog: &Path, settings: &Settings, check_sql: bool) -> ExitCode {
    let catalog = match load_catalog(catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut failures = 0;
    let mut resolver =
        Resolver::new(&catalog).with_max_depth(settings.compiler.max_combine_depth);

    for metric in catalog.metrics() {
        let dialect = settings.dialect_for(&metric.data_model.data_source);
        let checked = resolver
            .resolve_id(&metric.id, Some(metric.version))
            .and_then(|effective| plan_query(&effective.metric))
            .and_then(|plan| render_plan(&plan, dialect))
            .map_err(|e| format!("[{}] {}", e.kind(), e))
            .and_then(|rendered| {
                if check_sql {
                    check_syntax(&rendered.sql, dialect)
                } else {
                    Ok(())
                }
            });

        match checked {
            Ok(()) => println!("ok    {}@{} ({})", metric.id, metric.version, dialect),
            Err(e) => {
                failures += 1;
                println!("FAIL  {}@{}: {}", metric.id, metric.version, e);
            }
        }
    }

    if failures > 0 {
        eprintln!("{} metric(s) failed validation", failures);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn cmd_diagnose(catalog: &Path, settings: Settings, variant: &Path) -> ExitCode {
    let service = match load_service(catalog, settings) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let request = match read_json::<MetricVariantRequest>(variant) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let diagnosis = service.diagnose(&request);
    println!("{}", to_pretty_json(&diagnosis));

    if diagnosis.corrected.is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn load_catalog(path: &Path) -> Result<InMemoryCatalog, String> {
    let file: CatalogFile = read_json(path)?;
    InMemoryCatalog::from_file(file)
        .map_err(|e| format!("Invalid catalog '{}': {}", path.display(), e))
}

fn load_service(path: &Path, settings: Settings) -> Result<MetricService, String> {
    let catalog: Arc<dyn MetricCatalog> = Arc::new(load_catalog(path)?);
    MetricService::new(catalog, settings, ConnectorRegistry::new())
        .map_err(|e| format!("Configuration error: {}", e))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let source = fs::read_to_string(path)
        .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
    serde_json::from_str(&source).map_err(|e| format!("Error parsing '{}': {}", path.display(), e))
}

fn parse_params(params: Option<&str>) -> Result<Map<String, Value>, String> {
    match params {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err("--params must be a JSON object".to_string()),
            Err(e) => Err(format!("Error parsing --params: {}", e)),
        },
    }
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_key_value(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}
