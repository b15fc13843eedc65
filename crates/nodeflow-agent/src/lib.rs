pub mod agent_loop;
pub mod host;
pub mod node;
pub mod pending;
pub mod run_log;
pub mod usage;

pub use agent_loop::{AgentRun, RunConfig, RunPhase};
pub use host::{Accepted, HostSettings, RunHost, RunStatus, StartKind};
pub use node::{AgentNode, AgentNodeInput, ExecutionContext, ExecutionMode, NodeOutcome};
pub use pending::{PendingRun, RunHandle, WaitOutcome};
pub use run_log::RunLogger;
pub use usage::{credits, credits_with, estimate_tokens, UsageMeter};
