use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nodeflow_core::config::{AppConfig, ModelConfig};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ProviderAdapter;
use nodeflow_core::types::{NodeOutput, PendingEvent, Pricing, RunId, ToolReference};
use nodeflow_llm::PricingTable;

use crate::agent_loop::{RunConfig, DEFAULT_MAX_STEPS};
use crate::host::RunHost;
use crate::pending::PendingRun;

/// How long a suspended workflow waits for an async run by default.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Inputs an agent node receives from the workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentNodeInput {
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub tools: Vec<ToolReference>,
}

impl AgentNodeInput {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Default::default()
        }
    }
}

/// What the surrounding engine tells the node about the execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub execution_id: Option<String>,
    pub supports_suspension: bool,
}

impl ExecutionContext {
    /// An execution that can suspend and resume on an event.
    pub fn suspendable(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: Some(execution_id.into()),
            supports_suspension: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

/// Result of executing an agent node.
pub enum NodeOutcome {
    /// The run finished before `execute` returned.
    Complete(NodeOutput),
    /// The run continues in the background; suspend on `event()`.
    Pending(PendingRun),
}

/// Workflow-facing entry point for agent runs.
///
/// Binds a provider and model to a node, then turns each invocation into a
/// run on the shared [`RunHost`].
pub struct AgentNode {
    node_id: String,
    model: ModelConfig,
    pricing: Pricing,
    adapter: Arc<dyn ProviderAdapter>,
    host: Arc<RunHost>,
    async_timeout: Duration,
    default_max_steps: usize,
}

impl AgentNode {
    pub fn new(
        node_id: impl Into<String>,
        model: ModelConfig,
        adapter: Arc<dyn ProviderAdapter>,
        host: Arc<RunHost>,
    ) -> Self {
        let pricing = PricingTable::builtin().lookup(&model);
        Self {
            node_id: node_id.into(),
            model,
            pricing,
            adapter,
            host,
            async_timeout: DEFAULT_ASYNC_TIMEOUT,
            default_max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Build from config: model, pricing overrides, timeout and step budget.
    pub fn from_config(
        node_id: impl Into<String>,
        config: &AppConfig,
        adapter: Arc<dyn ProviderAdapter>,
        host: Arc<RunHost>,
    ) -> Self {
        let pricing = PricingTable::from_config(config).lookup(&config.model);
        Self::new(node_id, config.model.clone(), adapter, host)
            .with_pricing(pricing)
            .with_async_timeout(Duration::from_secs(config.agent.async_timeout_secs))
            .with_default_max_steps(config.agent.max_steps)
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_async_timeout(mut self, timeout: Duration) -> Self {
        self.async_timeout = timeout;
        self
    }

    pub fn with_default_max_steps(mut self, max_steps: usize) -> Self {
        self.default_max_steps = max_steps;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    /// Async only when the engine can suspend and there is an execution to
    /// resume.
    pub fn mode(ctx: &ExecutionContext) -> ExecutionMode {
        match (&ctx.execution_id, ctx.supports_suspension) {
            (Some(_), true) => ExecutionMode::Async,
            _ => ExecutionMode::Sync,
        }
    }

    /// Run the agent for one node invocation.
    ///
    /// Input is validated before any run identity is created. Errors are
    /// returned only when no run could be started; failures inside a run
    /// come back as output with `finish_reason = error`.
    pub async fn execute(&self, input: AgentNodeInput, ctx: &ExecutionContext) -> Result<NodeOutcome> {
        let config = self.run_config(input)?;

        match Self::mode(ctx) {
            ExecutionMode::Async => {
                let execution_id = ctx.execution_id.as_deref().unwrap_or_default();
                let run_id = RunId::derive(execution_id, &self.node_id);
                let event = PendingEvent::for_node(&self.node_id, self.async_timeout);

                let accepted = self
                    .host
                    .start(run_id, execution_id, &event.name, config, self.adapter.clone())
                    .await?;
                info!(
                    node = %self.node_id,
                    run_id = %accepted.handle.run_id(),
                    event = %event.name,
                    kind = ?accepted.kind,
                    "Agent node suspended"
                );
                Ok(NodeOutcome::Pending(PendingRun::new(
                    event,
                    accepted.handle,
                    accepted.cancel,
                    self.host.event_bus(),
                )))
            }
            ExecutionMode::Sync => {
                let (run_id, ephemeral) = match &ctx.execution_id {
                    Some(exec) => (RunId::derive(exec, &self.node_id), false),
                    None => (RunId::ephemeral(&self.node_id), true),
                };
                debug!(node = %self.node_id, run_id = %run_id, "Agent node running inline");

                let result = self.host.run(run_id.clone(), config, self.adapter.clone()).await?;
                if ephemeral {
                    self.host.evict(&run_id);
                }
                Ok(NodeOutcome::Complete(NodeOutput::from_result(&result)))
            }
        }
    }

    fn run_config(&self, input: AgentNodeInput) -> Result<RunConfig> {
        let task = input
            .input
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| NodeflowError::InvalidInput("input is required".into()))?;

        let mut config = RunConfig::new(self.model.clone(), task)
            .with_instructions(input.instructions)
            .with_pricing(self.pricing)
            .with_max_steps(input.max_steps.unwrap_or(self.default_max_steps))
            .with_tools(input.tools);
        config.context = input.context;
        config.validate()?;
        Ok(config)
    }
}
