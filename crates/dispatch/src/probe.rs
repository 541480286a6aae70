use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::process::{CommandRunner, CommandSpec};

const RUNNING_KEYWORD: &str = "running";

/// Liveness check for the long-running Mayor session.
///
/// Fail-closed: anything short of a clean exit reporting the session as
/// running counts as "not running", which routes tasks to one-shot mode.
#[derive(Clone)]
pub struct SessionProbe {
    runner: Arc<dyn CommandRunner>,
    gt_bin: String,
    gt_root: PathBuf,
    timeout: Duration,
}

impl SessionProbe {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        gt_bin: impl Into<String>,
        gt_root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            gt_bin: gt_bin.into(),
            gt_root: gt_root.into(),
            timeout,
        }
    }

    pub async fn is_running(&self) -> bool {
        let spec = CommandSpec::new(&self.gt_bin, &self.gt_root)
            .args(["mayor", "status"])
            .timeout(self.timeout);

        match self.runner.run(spec).await {
            Ok(output) if output.success() => reports_running(&output.stdout),
            Ok(output) => {
                debug!(
                    "mayor status exited with {:?}: {}",
                    output.exit_code,
                    output.diagnostic()
                );
                false
            }
            Err(err) => {
                debug!("mayor status check failed: {err}");
                false
            }
        }
    }
}

fn reports_running(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains(RUNNING_KEYWORD) && !lower.contains("not running")
}
