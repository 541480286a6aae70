use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::DispatchConfig;
use crate::interactive::InteractiveExecutor;
use crate::oneshot::OneShotExecutor;
use crate::probe::SessionProbe;
use crate::process::CommandRunner;
use crate::store::TaskStore;
use crate::task::{DeferredTask, DispatchResult, ExecutionMode, TaskRequest, TaskStatus};

const DEFERRED_MESSAGE: &str =
    "Task recorded but not started: non-blocking execution is not supported yet. Use wait=true.";

/// Snapshot for health/status reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DispatcherStatus {
    pub active_tasks: usize,
    pub execution_mode: ExecutionMode,
    pub session_alive: bool,
}

/// Routes each task to the interactive or one-shot executor.
///
/// The probe runs once per dispatch; the chosen path is never re-evaluated
/// while the task is in flight.
pub struct TaskDispatcher {
    config: Arc<DispatchConfig>,
    store: Arc<TaskStore>,
    probe: SessionProbe,
    interactive: InteractiveExecutor,
    oneshot: OneShotExecutor,
}

impl TaskDispatcher {
    pub fn new(
        config: DispatchConfig,
        runner: Arc<dyn CommandRunner>,
        store: Arc<TaskStore>,
    ) -> Self {
        let config = Arc::new(config);
        let probe = SessionProbe::new(
            Arc::clone(&runner),
            config.gt_bin.clone(),
            config.gt_root.clone(),
            config.status_timeout,
        );
        let interactive =
            InteractiveExecutor::new(Arc::clone(&config), Arc::clone(&runner), Arc::clone(&store));
        let oneshot = OneShotExecutor::new(Arc::clone(&config), runner, Arc::clone(&store));

        Self {
            config,
            store,
            probe,
            interactive,
            oneshot,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub async fn dispatch(&self, request: TaskRequest) -> DispatchResult {
        let timeout = self.config.clamp_timeout(request.timeout_secs);
        let context = request.context.as_deref();

        if !request.wait {
            let record = self.store.create(&request.task, context, None);
            info!("[{}] deferred task recorded without execution", record.task_id);
            return DispatchResult::Deferred(DeferredTask {
                success: true,
                task_id: record.task_id,
                status: TaskStatus::Running,
                message: DEFERRED_MESSAGE.to_string(),
                supported: false,
            });
        }

        let outcome = if self.probe.is_running().await {
            info!("Mayor session is running - using interactive mode");
            self.interactive.run(&request.task, context, timeout).await
        } else {
            info!("Mayor session not running - using one-shot mode");
            self.oneshot.run(&request.task, context, timeout).await
        };

        DispatchResult::Finished(outcome)
    }

    pub async fn status(&self) -> DispatcherStatus {
        let session_alive = self.probe.is_running().await;
        DispatcherStatus {
            active_tasks: self.store.active_count(),
            execution_mode: if session_alive {
                ExecutionMode::Interactive
            } else {
                ExecutionMode::OneShot
            },
            session_alive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::testing::{has_args, ScriptedRunner};
    use crate::task::TaskOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const RUNNING: &str = "Mayor session is running";
    const STOPPED: &str = "Mayor session stopped";

    fn dispatcher(runner: Arc<ScriptedRunner>) -> TaskDispatcher {
        TaskDispatcher::new(DispatchConfig::default(), runner, Arc::new(TaskStore::new()))
    }

    fn finished(result: DispatchResult) -> TaskOutcome {
        match result {
            DispatchResult::Finished(outcome) => outcome,
            other => panic!("expected finished dispatch, got {other:?}"),
        }
    }

    /// Mayor up, one stale message in the inbox, reply lands on the second poll.
    #[tokio::test(start_paused = true)]
    async fn interactive_round_trip() {
        let listings = Arc::new(AtomicUsize::new(0));
        let thread = Arc::new(Mutex::new(String::new()));
        let (seen, sent_thread) = (Arc::clone(&listings), Arc::clone(&thread));

        let runner = ScriptedRunner::new(move |spec| {
            if has_args(spec, &["mayor", "status"]) {
                return Ok(CommandOutput::ok(RUNNING));
            }
            if has_args(spec, &["nudge", "mayor"]) {
                let text = &spec.args[2];
                let start = text.find("[MCP Thread ID: ").expect("thread tag") + 16;
                let end = start + text[start..].find(']').expect("tag end");
                *sent_thread.lock().expect("lock") = text[start..end].to_string();
                return Ok(CommandOutput::ok(""));
            }
            if has_args(spec, &["mail", "inbox"]) {
                let listing = match seen.fetch_add(1, Ordering::SeqCst) {
                    0 => r#"[{"id":"stale1","from":"deacon","subject":"old news"}]"#.to_string(),
                    1 => "null".to_string(),
                    _ => format!(
                        r#"[{{"id":"reply1","from":"someone","thread_id":"{}","body":"3 rigs active"}}]"#,
                        sent_thread.lock().expect("lock")
                    ),
                };
                return Ok(CommandOutput::ok(listing));
            }
            Ok(CommandOutput::ok(""))
        });
        let dispatcher = dispatcher(runner.clone());

        let outcome = finished(dispatcher.dispatch(TaskRequest::new("list active work")).await);

        assert!(outcome.success);
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.response.as_deref(), Some("3 rigs active"));
        assert_eq!(outcome.mode, ExecutionMode::Interactive);
        assert_eq!(*thread.lock().expect("lock"), format!("mcp-{}", outcome.task_id));
        assert_eq!(runner.count(&["mail", "archive", "stale1"]), 1);
        assert_eq!(runner.count(&["mail", "archive", "reply1"]), 1);
        assert_eq!(runner.count(&["mail", "inbox"]), 3);

        let record = dispatcher.store().get(&outcome.task_id).expect("record");
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result.as_deref(), Some("3 rigs active"));
    }

    #[tokio::test]
    async fn oneshot_when_session_is_down() {
        let runner = ScriptedRunner::new(|spec| {
            if has_args(spec, &["mayor", "status"]) {
                Ok(CommandOutput::ok(STOPPED))
            } else if spec.program == "claude" {
                Ok(CommandOutput::ok("Fixed in commit abc123"))
            } else {
                panic!("unexpected command {}", spec.display());
            }
        });
        let dispatcher = dispatcher(runner.clone());

        let result = dispatcher.dispatch(TaskRequest::new("fix bug")).await;
        assert_eq!(
            serde_json::to_value(&result).expect("serialize"),
            serde_json::json!({
                "success": true,
                "task_id": result.task_id(),
                "status": "completed",
                "response": "Fixed in commit abc123",
                "mode": "oneshot"
            })
        );
        assert_eq!(runner.count(&["mail"]), 0);
        assert_eq!(runner.count(&["nudge"]), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_never_polls() {
        let runner = ScriptedRunner::new(|spec| {
            if has_args(spec, &["mayor", "status"]) {
                Ok(CommandOutput::ok(RUNNING))
            } else if has_args(spec, &["nudge"]) {
                Ok(CommandOutput::exit(1, "", "no session"))
            } else {
                Ok(CommandOutput::ok("[]"))
            }
        });
        let dispatcher = dispatcher(runner.clone());

        let outcome = finished(dispatcher.dispatch(TaskRequest::new("deploy")).await);

        assert!(!outcome.success);
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Failed to send task to Mayor: no session")
        );
        assert_eq!(outcome.mode, ExecutionMode::Interactive);
        // the only listing is the pre-send clear
        assert_eq!(runner.count(&["mail", "inbox"]), 1);
        let record = dispatcher.store().get(&outcome.task_id).expect("record");
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Failed to nudge Mayor: no session"));
    }

    #[tokio::test]
    async fn no_wait_returns_without_running_anything() {
        let runner = ScriptedRunner::new(|spec| panic!("unexpected command {}", spec.display()));
        let dispatcher = dispatcher(runner.clone());

        let first = dispatcher.dispatch(TaskRequest::new("later").no_wait()).await;
        let second = dispatcher.dispatch(TaskRequest::new("later").no_wait()).await;

        assert!(runner.calls().is_empty());
        assert_eq!(first.status(), TaskStatus::Running);
        assert_ne!(first.task_id(), second.task_id());
        match &first {
            DispatchResult::Deferred(deferred) => {
                assert!(!deferred.supported);
                assert!(deferred.message.contains("not supported"));
            }
            other => panic!("expected deferred result, got {other:?}"),
        }

        let record = dispatcher.store().get(first.task_id()).expect("record");
        assert_eq!(record.status, TaskStatus::Running);
        assert!(record.mode.is_none());
    }

    #[tokio::test]
    async fn branch_follows_probe_deterministically() {
        for (status, expected) in [
            (RUNNING, ExecutionMode::Interactive),
            (STOPPED, ExecutionMode::OneShot),
        ] {
            for _ in 0..3 {
                let runner = ScriptedRunner::new(move |spec| {
                    if has_args(spec, &["mayor", "status"]) {
                        Ok(CommandOutput::ok(status))
                    } else if has_args(spec, &["nudge"]) {
                        // keep the interactive path short
                        Ok(CommandOutput::exit(1, "", "refused"))
                    } else {
                        Ok(CommandOutput::ok(""))
                    }
                });
                let outcome = finished(dispatcher(runner).dispatch(TaskRequest::new("t")).await);
                assert_eq!(outcome.mode, expected);
            }
        }
    }

    #[tokio::test]
    async fn caller_timeout_is_capped() {
        let runner = ScriptedRunner::new(|spec| {
            if has_args(spec, &["mayor", "status"]) {
                Ok(CommandOutput::ok(STOPPED))
            } else {
                Ok(CommandOutput::ok("ok"))
            }
        });
        let dispatcher = dispatcher(runner.clone());
        let max = dispatcher.config().max_task_timeout;

        for requested in [-30, 0, 10, 10_000, i64::MAX] {
            dispatcher
                .dispatch(TaskRequest::new("t").with_timeout(requested))
                .await;
        }

        let agent_timeouts: Vec<Duration> = runner
            .calls()
            .into_iter()
            .filter(|spec| spec.program == "claude")
            .map(|spec| spec.timeout)
            .collect();
        assert_eq!(agent_timeouts.len(), 5);
        assert!(agent_timeouts.iter().all(|timeout| *timeout <= max));
        assert_eq!(agent_timeouts[2], Duration::from_secs(10));
        assert_eq!(agent_timeouts[3], max);
    }

    #[tokio::test]
    async fn status_reports_mode_and_active_tasks() {
        let runner = ScriptedRunner::new(|_| Ok(CommandOutput::ok(RUNNING)));
        let dispatcher = dispatcher(runner);
        dispatcher.dispatch(TaskRequest::new("a").no_wait()).await;
        dispatcher.dispatch(TaskRequest::new("b").no_wait()).await;

        assert_eq!(
            dispatcher.status().await,
            DispatcherStatus {
                active_tasks: 2,
                execution_mode: ExecutionMode::Interactive,
                session_alive: true,
            }
        );
    }
}
