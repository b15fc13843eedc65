use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodeflow_core::config::{AgentConfig, CreditsConfig, LogConfig};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::EventBus;
use nodeflow_core::traits::{CompletionSink, ProviderAdapter, ToolResolver};
use nodeflow_core::types::{CompletionEvent, FinishReason, RunId, RunResult};
use nodeflow_tools::resolve_tools;

use crate::agent_loop::{AgentRun, RunConfig};
use crate::pending::RunHandle;
use crate::run_log::RunLogger;

/// Host-wide settings applied to every run.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub tool_timeout_secs: u64,
    pub rates: CreditsConfig,
    pub log: Option<LogConfig>,
    /// Finished runs kept for replay; the oldest are dropped past this.
    pub retain_finished: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            rates: CreditsConfig::default(),
            log: None,
            retain_finished: 1024,
        }
    }
}

impl HostSettings {
    pub fn from_config(agent: &AgentConfig, rates: CreditsConfig) -> Self {
        Self {
            tool_timeout_secs: agent.tool_timeout_secs,
            rates,
            log: agent.log.clone().filter(|l| l.enabled),
            retain_finished: agent.retain_finished_runs,
        }
    }
}

/// How a `start` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    /// A new run was spawned.
    Started,
    /// The run was already in flight; the caller joined it.
    Joined,
    /// The run had finished; its cached result is replayed.
    Replayed,
}

/// Acknowledgement of a `start` call.
pub struct Accepted {
    pub kind: StartKind,
    pub handle: RunHandle,
    pub cancel: CancellationToken,
}

/// Observable state of a run identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Finished(FinishReason),
}

enum RunSlot {
    Running {
        handle: RunHandle,
        cancel: CancellationToken,
    },
    Finished(Arc<RunResult>),
}

#[derive(Default)]
struct SlotTable {
    slots: HashMap<RunId, RunSlot>,
    /// Finished identities, oldest first.
    finished: VecDeque<RunId>,
}

impl SlotTable {
    fn finish(&mut self, run_id: RunId, result: Arc<RunResult>, retain: usize) {
        self.slots.insert(run_id.clone(), RunSlot::Finished(result));
        self.finished.push_back(run_id);
        while self.finished.len() > retain {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            if matches!(self.slots.get(&oldest), Some(RunSlot::Finished(_))) {
                debug!(run_id = %oldest, "Dropping retained run result");
                self.slots.remove(&oldest);
            }
        }
    }

    fn evict(&mut self, run_id: &RunId) -> bool {
        if !matches!(self.slots.get(run_id), Some(RunSlot::Finished(_))) {
            return false;
        }
        self.slots.remove(run_id);
        self.finished.retain(|id| id != run_id);
        true
    }
}

type Slots = Arc<Mutex<SlotTable>>;

/// Keyed run registry. At most one live run exists per [`RunId`]; every
/// call for an identity is routed to that run.
///
/// Finished results stay cached, so repeated `start` calls are idempotent,
/// until [`RunHost::evict`] or until more than
/// [`HostSettings::retain_finished`] runs have finished after them.
pub struct RunHost {
    slots: Slots,
    event_bus: Arc<EventBus>,
    resolver: Arc<dyn ToolResolver>,
    sink: Option<Arc<dyn CompletionSink>>,
    settings: HostSettings,
}

impl RunHost {
    pub fn new(event_bus: Arc<EventBus>, resolver: Arc<dyn ToolResolver>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(SlotTable::default())),
            event_bus,
            resolver,
            sink: None,
            settings: HostSettings::default(),
        }
    }

    /// Destination for completion events of async runs.
    pub fn with_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_settings(mut self, settings: HostSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    fn slots(&self) -> MutexGuard<'_, SlotTable> {
        lock(&self.slots)
    }

    /// Begin a run in the background, or attach to the existing one.
    ///
    /// Fails only if the run can't be started: invalid config or tool
    /// references that don't resolve. `event` names the completion event
    /// delivered to the sink when the run terminates.
    pub async fn start(
        &self,
        run_id: RunId,
        execution_ref: &str,
        event: &str,
        config: RunConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<Accepted> {
        config.validate()?;

        let (run, logger, tx, handle, cancel) = {
            let mut table = self.slots();
            match table.slots.get(&run_id) {
                Some(RunSlot::Running { handle, cancel }) => {
                    debug!(run_id = %run_id, "Joining in-flight run");
                    return Ok(Accepted {
                        kind: StartKind::Joined,
                        handle: handle.clone(),
                        cancel: cancel.clone(),
                    });
                }
                Some(RunSlot::Finished(result)) => {
                    debug!(run_id = %run_id, "Replaying finished run");
                    return Ok(Accepted {
                        kind: StartKind::Replayed,
                        handle: RunHandle::resolved(result.clone()),
                        cancel: CancellationToken::new(),
                    });
                }
                None => {}
            }

            let (run, logger) = self.prepare(run_id.clone(), config, adapter)?;
            let (tx, rx) = watch::channel(None);
            let handle = RunHandle::new(run_id.clone(), rx);
            let cancel = run.cancel_token();
            table.slots.insert(
                run_id.clone(),
                RunSlot::Running {
                    handle: handle.clone(),
                    cancel: cancel.clone(),
                },
            );
            (run, logger, tx, handle, cancel)
        };

        info!(run_id = %run_id, execution = %execution_ref, event, "Agent run accepted");

        let mut guard = SlotGuard::new(
            self.slots.clone(),
            run_id,
            logger,
            self.settings.retain_finished,
        );
        let sink = self.sink.clone();
        let event = event.to_string();
        tokio::spawn(async move {
            let result = Arc::new(run.run().await);
            guard.finish(result.clone());
            let _ = tx.send(Some(result.clone()));

            if let Some(sink) = sink {
                let completion = CompletionEvent::from_result(event, &result);
                if let Err(e) = sink.deliver(completion).await {
                    error!(run_id = %result.run_id, error = %e, "Failed to deliver completion event");
                }
            }
        });

        Ok(Accepted {
            kind: StartKind::Started,
            handle,
            cancel,
        })
    }

    /// Execute a run in the caller's task and return its result.
    ///
    /// A finished identity replays its cached result; a live one is a
    /// [`NodeflowError::RunConflict`].
    pub async fn run(
        &self,
        run_id: RunId,
        config: RunConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<Arc<RunResult>> {
        config.validate()?;

        let (run, logger, tx) = {
            let mut table = self.slots();
            match table.slots.get(&run_id) {
                Some(RunSlot::Running { .. }) => {
                    return Err(NodeflowError::RunConflict(run_id.to_string()));
                }
                Some(RunSlot::Finished(result)) => return Ok(result.clone()),
                None => {}
            }

            let (run, logger) = self.prepare(run_id.clone(), config, adapter)?;
            let (tx, rx) = watch::channel(None);
            table.slots.insert(
                run_id.clone(),
                RunSlot::Running {
                    handle: RunHandle::new(run_id.clone(), rx),
                    cancel: run.cancel_token(),
                },
            );
            (run, logger, tx)
        };

        let mut guard = SlotGuard::new(
            self.slots.clone(),
            run_id,
            logger,
            self.settings.retain_finished,
        );
        let result = Arc::new(run.run().await);
        guard.finish(result.clone());
        let _ = tx.send(Some(result.clone()));
        Ok(result)
    }

    /// Resolve tools, attach the run logger and build the run. Called with
    /// the slot map locked so nothing else can claim the identity in between.
    fn prepare(
        &self,
        run_id: RunId,
        config: RunConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(AgentRun, Option<JoinHandle<()>>)> {
        let tools = resolve_tools(
            &config.tools,
            self.resolver.as_ref(),
            self.settings.tool_timeout_secs,
        )?;

        let logger = self
            .settings
            .log
            .as_ref()
            .map(|log| RunLogger::new(log.dir(), log.level).attach(&self.event_bus, run_id.clone()));

        let run = AgentRun::new(run_id, config, adapter, tools, self.event_bus.clone())
            .with_rates(self.settings.rates);
        Ok((run, logger))
    }

    /// Request cancellation of a live run. Returns false if it isn't running.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        match self.slots().slots.get(run_id) {
            Some(RunSlot::Running { cancel, .. }) => {
                info!(run_id = %run_id, "Cancelling agent run");
                cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, run_id: &RunId) -> Option<RunStatus> {
        self.slots().slots.get(run_id).map(|slot| match slot {
            RunSlot::Running { .. } => RunStatus::Running,
            RunSlot::Finished(result) => RunStatus::Finished(result.finish_reason),
        })
    }

    /// Cached result of a finished run.
    pub fn result(&self, run_id: &RunId) -> Option<Arc<RunResult>> {
        match self.slots().slots.get(run_id) {
            Some(RunSlot::Finished(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// Drop a finished run's cached result. Live runs are never evicted.
    pub fn evict(&self, run_id: &RunId) -> bool {
        self.slots().evict(run_id)
    }

    /// Number of runs currently executing.
    pub fn active_runs(&self) -> usize {
        self.slots()
            .slots
            .values()
            .filter(|s| matches!(s, RunSlot::Running { .. }))
            .count()
    }

    /// Number of finished results held for replay.
    pub fn retained_runs(&self) -> usize {
        self.slots().finished.len()
    }
}

fn lock(slots: &Mutex<SlotTable>) -> MutexGuard<'_, SlotTable> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees a run's slot and stops its logger if the run stops before
/// finishing, so a dropped caller can't leave the identity locked.
struct SlotGuard {
    slots: Slots,
    run_id: RunId,
    logger: Option<JoinHandle<()>>,
    retain: usize,
    finished: bool,
}

impl SlotGuard {
    fn new(slots: Slots, run_id: RunId, logger: Option<JoinHandle<()>>, retain: usize) -> Self {
        Self {
            slots,
            run_id,
            logger,
            retain,
            finished: false,
        }
    }

    /// The logger ends on its own once it sees the run's `RunComplete`.
    fn finish(&mut self, result: Arc<RunResult>) {
        lock(&self.slots).finish(self.run_id.clone(), result, self.retain);
        self.finished = true;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(run_id = %self.run_id, "Agent run dropped before finishing");
            lock(&self.slots).slots.remove(&self.run_id);
            if let Some(logger) = self.logger.take() {
                logger.abort();
            }
        }
    }
}
