use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::EventBus;
use nodeflow_core::types::{AgentEvent, CompletionEvent, PendingEvent, RunId, RunResult};

pub(crate) type ResultSlot = watch::Receiver<Option<Arc<RunResult>>>;

/// Read side of a run's terminal result. Cheap to clone; any number of
/// handles can wait on the same run.
#[derive(Clone)]
pub struct RunHandle {
    run_id: RunId,
    rx: ResultSlot,
}

impl RunHandle {
    pub(crate) fn new(run_id: RunId, rx: ResultSlot) -> Self {
        Self { run_id, rx }
    }

    /// Handle for a result that already exists.
    pub(crate) fn resolved(result: Arc<RunResult>) -> Self {
        let run_id = result.run_id.clone();
        let (_tx, rx) = watch::channel(Some(result));
        Self { run_id, rx }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The result, if the run has finished.
    pub fn result(&self) -> Option<Arc<RunResult>> {
        self.rx.borrow().clone()
    }

    /// Wait for the run's result.
    ///
    /// Fails with [`NodeflowError::RunAbandoned`] if the run task went away
    /// without producing one.
    pub async fn wait(mut self) -> Result<Arc<RunResult>> {
        loop {
            if let Some(result) = self.rx.borrow_and_update().clone() {
                return Ok(result);
            }
            if self.rx.changed().await.is_err() {
                return self
                    .rx
                    .borrow()
                    .clone()
                    .ok_or_else(|| NodeflowError::RunAbandoned(self.run_id.to_string()));
            }
        }
    }
}

/// What a suspended caller observes when its wait ends.
#[derive(Debug)]
pub enum WaitOutcome {
    Completed(CompletionEvent),
    TimedOut(PendingEvent),
}

/// A run started in async mode, plus the event the workflow suspends on.
pub struct PendingRun {
    event: PendingEvent,
    handle: RunHandle,
    cancel: CancellationToken,
    event_bus: Arc<EventBus>,
}

impl PendingRun {
    pub(crate) fn new(
        event: PendingEvent,
        handle: RunHandle,
        cancel: CancellationToken,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            event,
            handle,
            cancel,
            event_bus,
        }
    }

    pub fn event(&self) -> &PendingEvent {
        &self.event
    }

    pub fn run_id(&self) -> &RunId {
        self.handle.run_id()
    }

    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Wait for completion, bounded by the pending event's timeout.
    ///
    /// On timeout the run is cancelled; it still terminates and delivers its
    /// completion event, but this waiter no longer sees it.
    pub async fn wait(self) -> Result<WaitOutcome> {
        let run_id = self.handle.run_id().clone();
        match tokio::time::timeout(self.event.timeout(), self.handle.wait()).await {
            Ok(result) => {
                let result = result?;
                Ok(WaitOutcome::Completed(CompletionEvent::from_result(
                    self.event.name.clone(),
                    &result,
                )))
            }
            Err(_) => {
                warn!(
                    run_id = %run_id,
                    event = %self.event.name,
                    timeout_secs = self.event.timeout_secs,
                    "Timed out waiting for agent run"
                );
                self.cancel.cancel();
                self.event_bus.publish(AgentEvent::RunTimedOut {
                    run_id,
                    pending_event: self.event.name.clone(),
                });
                Ok(WaitOutcome::TimedOut(self.event))
            }
        }
    }
}
