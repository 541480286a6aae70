use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::DispatchConfig;
use crate::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};
use crate::store::TaskStore;
use crate::task::{compose_prompt, ExecutionMode, TaskOutcome, TaskStatus};

const MODE: ExecutionMode = ExecutionMode::OneShot;

/// Stateless fallback: one fresh agent process per task, no polling, no retries.
pub struct OneShotExecutor {
    config: Arc<DispatchConfig>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<TaskStore>,
}

impl OneShotExecutor {
    pub fn new(
        config: Arc<DispatchConfig>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<TaskStore>,
    ) -> Self {
        Self {
            config,
            runner,
            store,
        }
    }

    fn command(&self, prompt: String, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.config.agent_bin, self.config.oneshot_dir())
            .arg("-p")
            .arg(prompt)
            .args(["--model", self.config.model.as_str()])
            .args(["--output-format", "text"])
            .arg("--dangerously-skip-permissions")
            .timeout(timeout)
    }

    pub async fn run(&self, task: &str, context: Option<&str>, timeout: Duration) -> TaskOutcome {
        let task_id = self.store.create(task, context, Some(MODE)).task_id;
        info!("[{task_id}] sending task to {} (one-shot)", self.config.agent_bin);

        let spec = self.command(compose_prompt(task, context), timeout);
        let update;
        let outcome = match self.runner.run(spec).await {
            Ok(output) if output.success() => {
                info!("[{task_id}] task completed via one-shot");
                update = self.store.complete(&task_id, output.stdout.clone());
                TaskOutcome::completed(&task_id, MODE, output.stdout)
            }
            Ok(output) => {
                let message = self.failure_text(&output);
                error!("[{task_id}] task failed via one-shot: {message}");
                update = self.store.fail(&task_id, message.clone());
                TaskOutcome::failed(&task_id, MODE, TaskStatus::Failed, message)
            }
            Err(ProcessError::Timeout { timeout, .. }) => {
                let message = format!("Task timed out after {} seconds", timeout.as_secs());
                warn!("[{task_id}] {message}");
                update = self.store.time_out(&task_id, message.clone());
                TaskOutcome::failed(&task_id, MODE, TaskStatus::Timeout, message)
            }
            Err(err @ ProcessError::Spawn { .. }) => {
                let message = format!("Failed to start one-shot agent: {err}");
                error!("[{task_id}] {message}");
                update = self.store.fail(&task_id, message.clone());
                TaskOutcome::failed(&task_id, MODE, TaskStatus::Failed, message)
            }
        };

        if let Err(err) = update {
            warn!("task store rejected update: {err}");
        }
        outcome
    }

    /// stderr, else stdout, else a generic exit message.
    fn failure_text(&self, output: &CommandOutput) -> String {
        if !output.diagnostic().is_empty() {
            return output.diagnostic().to_string();
        }
        match output.exit_code {
            Some(code) => format!("{} exited with code {code}", self.config.agent_bin),
            None => format!("{} was terminated by a signal", self.config.agent_bin),
        }
    }
}
