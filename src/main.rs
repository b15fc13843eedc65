use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodeflow_agent::{
    AgentNode, AgentNodeInput, ExecutionContext, HostSettings, NodeOutcome, RunHost, WaitOutcome,
};
use nodeflow_core::config::AppConfig;
use nodeflow_core::event::EventBus;
use nodeflow_core::types::{NodeOutput, ToolReference};
use nodeflow_llm::PricingTable;
use nodeflow_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "nodeflow", version, about = "Agent node runner for workflow executions")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "nodeflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agent node invocation and print its output as JSON
    Run {
        /// Node identifier; names the completion event
        #[arg(long, default_value = "agent")]
        node_id: String,
        /// Task for the agent (read from stdin if omitted)
        #[arg(long)]
        input: Option<String>,
        /// System instructions
        #[arg(long)]
        instructions: Option<String>,
        /// Extra context placed before the task
        #[arg(long)]
        context: Option<String>,
        /// Step budget (defaults to agent.max_steps)
        #[arg(long)]
        max_steps: Option<usize>,
        /// JSON file with an array of tool references
        #[arg(long)]
        tools: Option<PathBuf>,
        /// Owning workflow execution
        #[arg(long)]
        execution_id: Option<String>,
        /// Run in async mode: print the pending event, then wait for completion
        #[arg(long, requires = "execution_id")]
        suspend: bool,
    },
    /// Validate the config file and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodeflow=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::Run {
            node_id,
            input,
            instructions,
            context,
            max_steps,
            tools,
            execution_id,
            suspend,
        } => {
            let input = match input {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let node_input = AgentNodeInput {
                instructions: instructions.unwrap_or_default(),
                context,
                input: Some(input),
                max_steps,
                tools: match tools {
                    Some(path) => load_tools(&path)?,
                    None => Vec::new(),
                },
            };
            let ctx = ExecutionContext {
                execution_id,
                supports_suspension: suspend,
            };
            run_node(&config, &node_id, node_input, &ctx).await
        }
    }
}

async fn run_node(
    config: &AppConfig,
    node_id: &str,
    input: AgentNodeInput,
    ctx: &ExecutionContext,
) -> anyhow::Result<()> {
    let event_bus = Arc::new(EventBus::new(config.agent.event_capacity));
    // No workflow catalog from the CLI, so only external tools resolve
    let host = Arc::new(
        RunHost::new(event_bus, Arc::new(ToolRegistry::new()))
            .with_settings(HostSettings::from_config(&config.agent, config.credits)),
    );
    let adapter = Arc::from(nodeflow_llm::create_retrying_adapter(config)?);
    let node = AgentNode::from_config(node_id, config, adapter, host.clone());

    match node.execute(input, ctx).await? {
        NodeOutcome::Complete(output) => print_output(&output),
        NodeOutcome::Pending(pending) => {
            println!("{}", serde_json::to_string_pretty(pending.event())?);
            let run_id = pending.run_id().clone();

            tokio::select! {
                outcome = pending.wait() => match outcome? {
                    WaitOutcome::Completed(event) => {
                        println!("{}", serde_json::to_string_pretty(&event)?);
                        Ok(())
                    }
                    WaitOutcome::TimedOut(event) => {
                        anyhow::bail!("timed out after {}s waiting for {}", event.timeout_secs, event.name)
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!(run_id = %run_id, "Interrupted, cancelling run");
                    host.cancel(&run_id);
                    Ok(())
                }
            }
        }
    }
}

fn print_output(output: &NodeOutput) -> anyhow::Result<()> {
    if let Some(error) = &output.error {
        warn!(error = %error, "Agent run ended with an error");
    }
    println!("{}", serde_json::to_string_pretty(output)?);
    Ok(())
}

fn load_tools(path: &Path) -> anyhow::Result<Vec<ToolReference>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading tool references from {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    let pricing = PricingTable::from_config(config).lookup(&config.model);
    println!("model:           {}", config.model.pricing_key());
    println!("fallback models: {}", config.fallback_models.len());
    println!(
        "pricing:         ${}/M input, ${}/M output",
        pricing.input_cost_per_million, pricing.output_cost_per_million
    );
    println!("max steps:       {}", config.agent.max_steps);
    println!("async timeout:   {}s", config.agent.async_timeout_secs);
    println!("tool timeout:    {}s", config.agent.tool_timeout_secs);
    println!(
        "credits:         {} per dollar, minimum {}",
        config.credits.credits_per_dollar, config.credits.minimum
    );
    match config.agent.log.as_ref().filter(|l| l.enabled) {
        Some(log) => println!("run logs:        {} (level {})", log.dir().display(), log.level),
        None => println!("run logs:        disabled"),
    }
    if config.model.api_key.is_none() {
        warn!("model.api_key is not set");
    }
    Ok(())
}
