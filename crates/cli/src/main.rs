//! `agentflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`: execute a flow JSON file once and print the outcome.
//! - `validate`: validate a flow JSON file.
//! - `schema`: print a node's output schema, optionally by sample run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine::{EngineConfig, Flow, GraphExecutor};

#[derive(Parser)]
#[command(name = "agentflow", about = "Flow node execution engine", version)]
struct Cli {
    /// Engine configuration file (TOML).
    #[arg(long, global = true, env = "AGENTFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a flow once and print the terminal result.
    Run {
        /// Path to the flow JSON file.
        path: PathBuf,
        /// Trigger input as inline JSON.
        #[arg(long, default_value = "{}")]
        input: String,
        /// Print every node's result, not just the terminal one.
        #[arg(long)]
        all: bool,
    },
    /// Validate a flow definition JSON file.
    Validate {
        /// Path to the flow JSON file.
        path: PathBuf,
    },
    /// Print a node's output schema.
    Schema {
        /// Path to the flow JSON file.
        path: PathBuf,
        /// Node to describe.
        #[arg(long)]
        node: String,
        /// Sample input; when given, the schema is resolved by a live run.
        #[arg(long)]
        sample: Option<String>,
        /// Print the node's parameters with the resolved schema cached instead.
        #[arg(long, requires = "sample")]
        cache: bool,
    },
}

fn load_flow(path: &Path) -> Result<Flow> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid flow document {}", path.display()))
}

fn parse_json(label: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("--{label} is not valid JSON"))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("engine=info,nodes=info,warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            EngineConfig::from_toml_file(path)?
        }
        None => EngineConfig::default(),
    };
    let registry = config.build_registry()?;

    match cli.command {
        Command::Run { path, input, all } => {
            let flow = load_flow(&path)?;
            let input = parse_json("input", &input)?;
            let executor = GraphExecutor::new(registry, config.executor.clone());

            let outcome = executor.run(Arc::new(flow), input).await?;
            if all {
                print_json(&outcome)?;
            } else {
                print_json(&outcome.result)?;
            }
            if !outcome.result.success {
                std::process::exit(2);
            }
        }
        Command::Validate { path } => {
            let flow = load_flow(&path)?;
            match engine::validate_flow(&flow, &registry) {
                Ok(order) => {
                    println!("✅ Flow is valid. Topological order: {order:?}");
                    for dangling in engine::dag::dangling_references(&flow) {
                        println!(
                            "⚠️  node '{}' references unknown node '{}'; it will resolve to an empty value",
                            dangling.node_id, dangling.target
                        );
                    }
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Schema {
            path,
            node,
            sample,
            cache,
        } => {
            let flow = load_flow(&path)?;
            let instance = flow
                .node(&node)
                .with_context(|| format!("flow has no node '{node}'"))?;

            match sample {
                None => print_json(&engine::schema::output_schema(&registry, instance)?)?,
                Some(raw) if cache => {
                    let sample = parse_json("sample", &raw)?;
                    let parameters = engine::schema::resolve_and_cache(&registry, instance, &sample).await?;
                    print_json(&parameters)?;
                }
                Some(raw) => {
                    let sample = parse_json("sample", &raw)?;
                    print_json(&engine::schema::infer_output_schema(&registry, instance, &sample).await?)?;
                }
            }
        }
    }

    Ok(())
}
