use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodeflow_core::config::{CreditsConfig, ModelConfig};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::EventBus;
use nodeflow_core::traits::ProviderAdapter;
use nodeflow_core::types::*;
use nodeflow_llm::pricing::DEFAULT_PRICING;
use nodeflow_tools::{ToolCallTracker, ToolRegistry};

use crate::usage::UsageMeter;

pub const DEFAULT_MAX_STEPS: usize = 10;

/// Everything one run needs, fixed before the loop starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: ModelConfig,
    pub pricing: Pricing,
    pub instructions: String,
    pub context: Option<String>,
    pub input: String,
    pub max_steps: usize,
    pub tools: Vec<ToolReference>,
}

impl RunConfig {
    pub fn new(model: ModelConfig, input: impl Into<String>) -> Self {
        Self {
            model,
            pricing: DEFAULT_PRICING,
            instructions: String::new(),
            context: None,
            input: input.into(),
            max_steps: DEFAULT_MAX_STEPS,
            tools: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolReference>) -> Self {
        self.tools = tools;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(NodeflowError::InvalidInput("input is required".into()));
        }
        if self.max_steps == 0 {
            return Err(NodeflowError::InvalidInput(
                "max_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Opening transcript: instructions as the system turn, then the task.
    pub fn initial_transcript(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.instructions.trim().is_empty() {
            messages.push(ChatMessage::system(self.instructions.clone()));
        }
        let task = match self.context.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(context) => format!("Context:\n{}\n\nTask:\n{}", context, self.input),
            None => self.input.clone(),
        };
        messages.push(ChatMessage::user(task));
        messages
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    ToolDispatch,
    Completed,
    MaxStepsReached,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::MaxStepsReached | Self::Failed)
    }

    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, ToolDispatch)
                | (ToolDispatch, Running)
                | (Running, Completed)
                | (Running, MaxStepsReached)
                | (Running, Failed)
                | (ToolDispatch, Failed)
        )
    }
}

/// One agent run: a bounded loop of provider calls and tool dispatches.
///
/// Owns its transcript, steps and usage counters. Consumed by [`AgentRun::run`],
/// which always yields a [`RunResult`]; failures during the loop become a
/// result with `finish_reason = error` rather than an `Err`.
pub struct AgentRun {
    run_id: RunId,
    config: RunConfig,
    adapter: Arc<dyn ProviderAdapter>,
    tools: ToolCallTracker,
    event_bus: Arc<EventBus>,
    rates: CreditsConfig,
    cancel: CancellationToken,
    phase: RunPhase,
    transcript: Vec<ChatMessage>,
    steps: Vec<Step>,
    meter: UsageMeter,
}

impl AgentRun {
    pub fn new(
        run_id: RunId,
        config: RunConfig,
        adapter: Arc<dyn ProviderAdapter>,
        tools: ToolRegistry,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let transcript = config.initial_transcript();
        Self {
            run_id,
            config,
            adapter,
            tools: ToolCallTracker::new(tools),
            event_bus,
            rates: CreditsConfig::default(),
            cancel: CancellationToken::new(),
            phase: RunPhase::Idle,
            transcript,
            steps: Vec::new(),
            meter: UsageMeter::default(),
        }
    }

    pub fn with_rates(mut self, rates: CreditsConfig) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(run_id = %self.run_id, from = ?self.phase, to = ?next, "Run phase");
        self.phase = next;
    }

    /// Drive the run to a terminal phase.
    pub async fn run(mut self) -> RunResult {
        let max_steps = self.config.max_steps;
        self.transition(RunPhase::Running);
        self.event_bus.publish(AgentEvent::RunStarted {
            run_id: self.run_id.clone(),
            max_steps,
        });
        info!(
            run_id = %self.run_id,
            model = %self.config.model.model_id,
            max_steps,
            tools = self.tools.definitions().len(),
            "Agent run started"
        );

        let tool_defs = self.tools.definitions();
        let mut final_text = String::new();

        let outcome: Result<FinishReason> = loop {
            if self.cancel.is_cancelled() {
                break Err(NodeflowError::Cancelled);
            }
            // Completed steps end the loop, so every recorded step here dispatched tools
            if self.steps.len() >= max_steps {
                break Ok(FinishReason::MaxStepsReached);
            }

            let index = self.steps.len();
            debug!(run_id = %self.run_id, step = index, "Starting step");
            self.event_bus.publish(AgentEvent::StepStarted {
                run_id: self.run_id.clone(),
                step: index,
            });

            let response = tokio::select! {
                r = self.adapter.converse(&self.config.model, self.transcript.clone(), &tool_defs) => r,
                _ = self.cancel.cancelled() => Err(NodeflowError::Cancelled),
            };
            let response = match response {
                Ok(r) => r,
                Err(e) => break Err(e),
            };

            self.meter.record(&self.transcript, &response);
            self.transcript.push(ChatMessage::assistant(&response));
            final_text = response.text.clone();

            if !response.has_tool_calls() {
                self.record_step(index, response.text, vec![], vec![]);
                break Ok(FinishReason::Completed);
            }

            self.transition(RunPhase::ToolDispatch);
            let mark = self.tools.len();
            let blocks = match self.dispatch(&response.tool_calls).await {
                Ok(blocks) => blocks,
                Err(e) => {
                    // Keep the calls that ran before the interruption
                    let records = self.tools.records_since(mark);
                    self.record_step(index, response.text, response.tool_calls, records);
                    break Err(e);
                }
            };
            self.transcript.push(ChatMessage::tool_results(blocks));
            let records = self.tools.records_since(mark);
            self.record_step(index, response.text, response.tool_calls, records);
            self.transition(RunPhase::Running);
        };

        self.finish(outcome, final_text)
    }

    /// Execute one step's tool calls in order. Tool failures are fed back to
    /// the model as error results; only cancellation aborts the dispatch.
    async fn dispatch(&mut self, calls: &[ToolCallRequest]) -> Result<Vec<ContentBlock>> {
        let mut blocks = Vec::with_capacity(calls.len());

        for call in calls {
            self.event_bus.publish(AgentEvent::ToolStart {
                run_id: self.run_id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });

            let result = tokio::select! {
                r = self.tools.execute(&call.name, call.input.clone()) => r,
                _ = self.cancel.cancelled() => return Err(NodeflowError::Cancelled),
            };
            let tool_result = match result {
                Ok(r) => r,
                Err(e) => {
                    error!(run_id = %self.run_id, tool = %call.name, error = %e, "Tool execution failed");
                    ToolResult::error(e.to_string())
                }
            };

            self.event_bus.publish(AgentEvent::ToolEnd {
                run_id: self.run_id.clone(),
                name: call.name.clone(),
                result: tool_result.clone(),
            });

            blocks.push(ContentBlock::ToolResult {
                tool_use_id: call.id.clone(),
                content: tool_result.content,
                is_error: tool_result.is_error,
            });
        }

        Ok(blocks)
    }

    fn record_step(
        &mut self,
        index: usize,
        text: String,
        tool_calls: Vec<ToolCallRequest>,
        tool_results: Vec<ToolCallRecord>,
    ) {
        self.event_bus.publish(AgentEvent::StepComplete {
            run_id: self.run_id.clone(),
            step: index,
            tool_calls: tool_calls.len(),
        });
        self.steps.push(Step {
            index,
            text,
            tool_calls,
            tool_results,
            timestamp: Utc::now(),
        });
    }

    fn finish(mut self, outcome: Result<FinishReason>, text: String) -> RunResult {
        let (finish_reason, error) = match outcome {
            Ok(reason) => {
                let phase = match reason {
                    FinishReason::MaxStepsReached => RunPhase::MaxStepsReached,
                    _ => RunPhase::Completed,
                };
                self.transition(phase);
                (reason, None)
            }
            Err(e) => {
                self.transition(RunPhase::Failed);
                let message = e.to_string();
                self.event_bus.publish(AgentEvent::RunError {
                    run_id: self.run_id.clone(),
                    error: message.clone(),
                });
                (FinishReason::Error, Some(message))
            }
        };

        let usage = self.meter.metadata();
        let credits = self.meter.credits(&self.config.pricing, &self.rates);
        let total_steps = self.steps.len();

        match &error {
            Some(e) => warn!(run_id = %self.run_id, total_steps, error = %e, "Agent run failed"),
            None => info!(
                run_id = %self.run_id,
                %finish_reason,
                total_steps,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                credits,
                "Agent run complete"
            ),
        }
        self.event_bus.publish(AgentEvent::RunComplete {
            run_id: self.run_id.clone(),
            finish_reason,
            total_steps,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            credits,
        });

        RunResult {
            run_id: self.run_id,
            text,
            steps: self.steps,
            total_steps,
            finish_reason,
            usage_metadata: usage,
            credits,
            error,
        }
    }
}
