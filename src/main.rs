use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use fieldguard::prelude::*;
use fieldguard::rules;
use futures::future::join_all;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Rule {
    Exists,
    Unique,
    NotExists,
}

/// Check whether values already exist in a database
#[derive(Parser, Debug)]
#[command(name = "fieldguard")]
#[command(about = "Batched existence and uniqueness checks", long_about = None)]
struct Args {
    /// SQLite database file (relational backend)
    #[arg(long, conflicts_with = "documents")]
    sqlite: Option<PathBuf>,

    /// JSON file mapping collection names to document arrays (document backend)
    #[arg(long)]
    documents: Option<PathBuf>,

    /// Rule to evaluate for every value
    #[arg(long, value_enum, default_value_t = Rule::Unique)]
    rule: Rule,

    /// Table or collection to search
    #[arg(long)]
    collection: String,

    /// Field compared against each value
    #[arg(long)]
    field: Option<String>,

    /// Value to check; parsed as JSON, otherwise taken as a string
    #[arg(long = "value", required = true)]
    values: Vec<String>,

    /// Extra conditions as a JSON array of condition nodes
    #[arg(long)]
    conditions: Option<String>,

    /// Exclusion as a JSON condition node or array of nodes
    #[arg(long)]
    exclude: Option<String>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn constraint(args: &Args) -> anyhow::Result<ConstraintSpec> {
    let mut spec = ConstraintSpec {
        collection: args.collection.clone(),
        field: args.field.clone(),
        ..ConstraintSpec::default()
    };
    if let Some(raw) = &args.conditions {
        spec.conditions = serde_json::from_str(raw).context("--conditions must be a JSON array of nodes")?;
    }
    if let Some(raw) = &args.exclude {
        spec.exclude = serde_json::from_str(raw).context("--exclude must be a JSON node or array of nodes")?;
    }
    Ok(spec)
}

fn backend(args: &Args) -> anyhow::Result<Backend> {
    match (&args.sqlite, &args.documents) {
        (Some(path), None) => Ok(Backend::relational(SqliteStore::open(path)?)),
        (None, Some(path)) => Ok(Backend::document(MemoryDocumentStore::from_json_file(path)?)),
        _ => bail!("choose exactly one backend: --sqlite or --documents"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let spec = constraint(&args)?;
    let engine = ExistenceEngine::builder()
        .backend(backend(&args)?)
        .config(config)
        .build()?;
    info!(backend = %engine.backend_kind(), rule = ?args.rule, values = args.values.len(), "checking");

    let values: Vec<Value> = args.values.iter().map(|raw| parse_value(raw)).collect();
    let answers = join_all(values.iter().map(|value| async {
        match args.rule {
            Rule::Exists => rules::exists(value, &spec, Some(&engine)).await,
            Rule::Unique => rules::unique(value, &spec, Some(&engine)).await,
            Rule::NotExists => rules::not_exists(value, &spec, Some(&engine)).await,
        }
    }))
    .await;

    let mut failed = false;
    for (value, answer) in values.iter().zip(answers) {
        let line = match answer {
            Ok(passed) => json!({ "value": value, "passed": passed }),
            Err(e) => {
                failed = true;
                json!({ "value": value, "error": e.to_string() })
            }
        };
        println!("{line}");
    }

    info!(flushes = engine.flushes(), "done");
    if failed {
        bail!("one or more checks failed");
    }
    Ok(())
}
