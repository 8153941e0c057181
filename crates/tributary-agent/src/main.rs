//! tributary - Pluggable ingestion agent
//!
//! # Usage
//!
//! ```bash
//! # Run all enabled sources, events go to stdout as JSON lines
//! tributary -c tributary.yaml
//!
//! # Validate configuration
//! tributary -c tributary.yaml validate
//!
//! # Print the schema snapshot of a SQL source
//! tributary -c tributary.yaml schema orders-db
//!
//! # Run a statement through a SQL source
//! tributary -c tributary.yaml query orders-db "SELECT id, total FROM orders LIMIT 10"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tributary_agent::source::SOURCE_QUERY;
use tributary_agent::{
    build_source, create_source_registry, Agent, AgentConfig, Source, SourceRegistry,
};

#[derive(Parser)]
#[command(name = "tributary")]
#[command(version, about = "Pluggable ingestion agent with checkpointed offsets")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "tributary.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all enabled sources (default)
    Run,
    /// Validate configuration file
    Validate,
    /// Print the schema snapshot of a SQL source
    Schema {
        /// Source name
        source: String,
    },
    /// Execute a statement through a SQL source and print the emitted rows
    Query {
        /// Source name
        source: String,
        /// SQL statement
        sql: String,
    },
    /// List available connector types
    Connectors,
    /// Show config schema for a connector type
    ConfigSchema {
        /// Connector type (e.g., MysqlQuery)
        connector: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let registry = create_source_registry();

    // Commands that don't need config
    match &cli.command {
        Some(Commands::Connectors) => return list_connectors(&registry),
        Some(Commands::ConfigSchema { connector }) => {
            return show_config_schema(&registry, connector)
        }
        _ => {}
    }

    let config = AgentConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    config
        .validate(&registry)
        .with_context(|| format!("Invalid config in {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, &registry).await,
        Commands::Validate => validate_config(&config),
        Commands::Schema { source } => show_schema(&config, &registry, &source).await,
        Commands::Query { source, sql } => run_query(&config, &registry, &source, &sql).await,
        Commands::Connectors | Commands::ConfigSchema { .. } => unreachable!(), // handled above
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries events, logs go to stderr
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(config: AgentConfig, registry: &SourceRegistry) -> Result<()> {
    info!(
        tenant = %config.agent.tenant,
        environment = %config.agent.environment,
        agent_id = %config.agent.uuid,
        "Starting tributary"
    );

    let agent = Agent::from_config(&config, registry).context("Failed to build agent")?;
    agent
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal (Ctrl+C)");
        })
        .await
        .context("Agent failed")
}

fn validate_config(config: &AgentConfig) -> Result<()> {
    println!("✓ Configuration valid!\n");

    println!("Agent:");
    println!("  Tenant:      {}", config.agent.tenant);
    println!("  Environment: {}", config.agent.environment);
    println!("  Agent id:    {}", config.agent.uuid);
    println!(
        "  Mode:        {}",
        if config.agent.standalone {
            "standalone"
        } else {
            "supervised"
        }
    );
    println!("  Checkpoint:  {}", config.agent.checkpoint);
    println!("  Commit:      every {}ms", config.agent.commit_interval_ms);
    println!();

    println!("Sources ({}):", config.sources.len());
    for (name, source) in &config.sources {
        println!(
            "  {} [{}]{}",
            name,
            source.connector_type,
            if source.enabled { "" } else { " (disabled)" }
        );
    }
    Ok(())
}

/// Build a single source outside the runner. CLI one-shots never wait for
/// a controller, so the source is forced into standalone mode.
fn one_shot_source(
    config: &AgentConfig,
    registry: &SourceRegistry,
    name: &str,
) -> Result<Arc<dyn Source>> {
    let source_config = config
        .sources
        .get(name)
        .with_context(|| format!("Source '{}' not found in config", name))?;

    let mut settings = config.agent.clone();
    settings.standalone = true;
    let source = build_source(name, source_config, &settings, registry)?;

    if !source.available_actions().contains_key(SOURCE_QUERY) {
        anyhow::bail!(
            "Source '{}' ({}) is not a SQL source",
            name,
            source.connector_type()
        );
    }
    Ok(source)
}

async fn show_schema(config: &AgentConfig, registry: &SourceRegistry, name: &str) -> Result<()> {
    let source = one_shot_source(config, registry, name)?;
    source
        .init()
        .await
        .with_context(|| format!("Failed to read schema of '{}'", name))?;

    println!("{}", serde_json::to_string_pretty(&source.schema())?);
    Ok(())
}

async fn run_query(
    config: &AgentConfig,
    registry: &SourceRegistry,
    name: &str,
    sql: &str,
) -> Result<()> {
    let source = one_shot_source(config, registry, name)?;
    let mut events = source
        .take_output()
        .context("Output channel already taken")?;

    if let Err(e) = source.init().await {
        warn!("Continuing without schema snapshot: {}", e);
    }
    // rows are buffered in the output channel, so drain it concurrently
    let printer = tokio::spawn(async move {
        let mut printed = 0u64;
        while let Some(event) = events.recv().await {
            match event.to_json_line() {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
            printed += 1;
        }
        printed
    });

    let payload = serde_json::json!({ "query": sql }).to_string();
    let result = source.process(SOURCE_QUERY, payload.as_bytes()).await;
    source.stop().await?;
    drop(source);

    let printed = printer.await.context("Printer task failed")?;
    result.with_context(|| format!("Query on '{}' failed", name))?;
    info!(rows = printed, "Query complete");
    Ok(())
}

fn list_connectors(registry: &SourceRegistry) -> Result<()> {
    println!("Available connectors:\n");
    for (connector_type, description) in registry.list() {
        println!("  {:<22} {}", connector_type, description);
    }
    Ok(())
}

fn show_config_schema(registry: &SourceRegistry, connector: &str) -> Result<()> {
    let factory = registry
        .get(connector)
        .with_context(|| format!("Unknown connector type '{}'", connector))?;
    println!("{}", serde_json::to_string_pretty(&factory.config_schema())?);
    Ok(())
}
