use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use nodeflow_core::event::EventBus;
use nodeflow_core::types::{AgentEvent, RunId};

/// JSONL run logger.
///
/// Follows one run on the EventBus and writes one JSON object per line to
/// `{log_dir}/{run_id}/{timestamp}.jsonl`. Append-only, flushed per entry,
/// so a crash mid-run leaves every earlier line intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1 = run summary, 2 = per-step, 3 = per-tool-call.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Subscribe now and write the run's events in the background until it
    /// completes.
    ///
    /// The subscription is taken before returning, so events published after
    /// this call are never missed.
    pub fn attach(self, event_bus: &EventBus, run_id: RunId) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(async move { self.run(rx, run_id).await })
    }

    async fn run(self, mut rx: broadcast::Receiver<AgentEvent>, run_id: RunId) {
        let run_dir = self.log_dir.join(dir_name(&run_id));
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(run_id = %run_id, path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    debug!(skipped = n, "RunLogger lagged, skipped events");
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!("EventBus closed, RunLogger stopping");
                    break;
                }
            };
            if event.run_id() != &run_id {
                continue;
            }

            if let Some(entry) = self.event_to_entry(&event) {
                if let Ok(json) = serde_json::to_string(&entry) {
                    let line = format!("{}\n", json);
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        error!(error = %e, "Failed to write log entry");
                        break;
                    }
                    if let Err(e) = writer.flush().await {
                        error!(error = %e, "Failed to flush log");
                    }
                }
            }

            if matches!(event, AgentEvent::RunComplete { .. }) {
                break;
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert an event to a log entry, or None if filtered by level.
    fn event_to_entry(&self, event: &AgentEvent) -> Option<LogEntry> {
        let entry = |event_type, step, detail| LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().to_string(),
            event_type,
            step,
            detail,
        };

        match event {
            // L1: run summary
            AgentEvent::RunStarted { max_steps, .. } => Some(entry(
                "run_started",
                None,
                Some(serde_json::json!({ "max_steps": max_steps })),
            )),
            AgentEvent::RunComplete {
                finish_reason,
                total_steps,
                input_tokens,
                output_tokens,
                credits,
                ..
            } => Some(entry(
                "run_complete",
                Some(*total_steps),
                Some(serde_json::json!({
                    "finish_reason": finish_reason,
                    "input_tokens": input_tokens,
                    "output_tokens": output_tokens,
                    "credits": credits,
                })),
            )),
            AgentEvent::RunError { error, .. } => Some(entry(
                "run_error",
                None,
                Some(serde_json::json!({ "error": error })),
            )),
            AgentEvent::RunTimedOut { pending_event, .. } => Some(entry(
                "run_timed_out",
                None,
                Some(serde_json::json!({ "event": pending_event })),
            )),

            // L2: per-step
            AgentEvent::StepStarted { step, .. } if self.level >= 2 => {
                Some(entry("step_started", Some(*step), None))
            }
            AgentEvent::StepComplete {
                step, tool_calls, ..
            } if self.level >= 2 => Some(entry(
                "step_complete",
                Some(*step),
                Some(serde_json::json!({ "tool_calls": tool_calls })),
            )),

            // L3: per-tool-call
            AgentEvent::ToolStart { name, input, .. } if self.level >= 3 => Some(entry(
                "tool_start",
                None,
                Some(serde_json::json!({
                    "tool": name,
                    "input": truncate(&input.to_string(), 500),
                })),
            )),
            AgentEvent::ToolEnd { name, result, .. } if self.level >= 3 => Some(entry(
                "tool_end",
                None,
                Some(serde_json::json!({
                    "tool": name,
                    "is_error": result.is_error,
                    "content_preview": truncate(&result.content, 200),
                })),
            )),

            _ => None,
        }
    }
}

/// Directory-safe form of a run id (`exec:node` contains a colon).
fn dir_name(run_id: &RunId) -> String {
    run_id
        .0
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// Path of the newest log file for a run, if any.
pub fn latest_log(log_dir: &Path, run_id: &RunId) -> Option<PathBuf> {
    let dir = log_dir.join(dir_name(run_id));
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::{FinishReason, ToolResult};

    fn rid() -> RunId {
        RunId::derive("exec-1", "agent")
    }

    fn complete(run_id: RunId) -> AgentEvent {
        AgentEvent::RunComplete {
            run_id,
            finish_reason: FinishReason::Completed,
            total_steps: 2,
            input_tokens: 1000,
            output_tokens: 500,
            credits: 11,
        }
    }

    #[test]
    fn entry_skips_empty_fields() {
        let logger = RunLogger::new(PathBuf::from("/tmp"), 1);
        let entry = logger
            .event_to_entry(&AgentEvent::RunError {
                run_id: rid(),
                error: "boom".into(),
            })
            .unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("run_error"));
        assert!(json.contains("exec-1:agent"));
        assert!(!json.contains("\"step\""));
    }

    #[test]
    fn run_complete_carries_totals() {
        let logger = RunLogger::new(PathBuf::from("/tmp"), 1);
        let entry = logger.event_to_entry(&complete(rid())).unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["step"], 2);
        assert_eq!(json["detail"]["finish_reason"], "completed");
        assert_eq!(json["detail"]["credits"], 11);
    }

    #[test]
    fn level_filtering() {
        let step = AgentEvent::StepComplete {
            run_id: rid(),
            step: 0,
            tool_calls: 1,
        };
        let tool = AgentEvent::ToolEnd {
            run_id: rid(),
            name: "echo".into(),
            result: ToolResult::success("ok"),
        };

        let l1 = RunLogger::new(PathBuf::from("/tmp"), 1);
        assert!(l1.event_to_entry(&step).is_none());
        assert!(l1.event_to_entry(&tool).is_none());

        let l2 = RunLogger::new(PathBuf::from("/tmp"), 2);
        assert!(l2.event_to_entry(&step).is_some());
        assert!(l2.event_to_entry(&tool).is_none());

        let l3 = RunLogger::new(PathBuf::from("/tmp"), 3);
        assert!(l3.event_to_entry(&tool).is_some());
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        let long = "é".repeat(30);
        let t = truncate(&long, 20);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), 23);
    }

    #[test]
    fn run_dir_is_sanitized() {
        assert_eq!(dir_name(&rid()), "exec-1_agent");
    }

    #[tokio::test]
    async fn writes_only_its_own_run() {
        let tmp = tempfile::tempdir().unwrap();
        let bus = EventBus::new(16);
        let task = RunLogger::new(tmp.path().to_path_buf(), 2).attach(&bus, rid());

        bus.publish(AgentEvent::RunStarted {
            run_id: rid(),
            max_steps: 5,
        });
        bus.publish(AgentEvent::RunStarted {
            run_id: RunId::derive("exec-2", "agent"),
            max_steps: 5,
        });
        bus.publish(AgentEvent::StepStarted {
            run_id: rid(),
            step: 0,
        });
        bus.publish(complete(rid()));
        task.await.unwrap();

        let path = latest_log(tmp.path(), &rid()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let types: Vec<String> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["event_type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(types, vec!["run_started", "step_started", "run_complete"]);
    }
}
