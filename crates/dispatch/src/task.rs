use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Interactive,
    #[serde(rename = "oneshot")]
    OneShot,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub prompt: String,
    pub context: Option<String>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Absent for deferred (`wait=false`) records.
    pub mode: Option<ExecutionMode>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A task as submitted by a caller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_wait")]
    pub wait: bool,
    /// Seconds; clamped by the dispatcher.
    #[serde(default, rename = "timeout", deserialize_with = "lenient_seconds")]
    pub timeout_secs: Option<i64>,
}

fn default_wait() -> bool {
    true
}

/// Any JSON number: fractions round up to the next second and out-of-range
/// values saturate, leaving the range check to the dispatcher's clamp.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(number.map(|number| match (number.as_i64(), number.as_u64()) {
        (Some(secs), _) => secs,
        (None, Some(_)) => i64::MAX,
        // `as` saturates at the i64 bounds
        (None, None) => number.as_f64().map_or(i64::MAX, |secs| secs.ceil() as i64),
    }))
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: None,
            wait: true,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

/// Final result of a blocking dispatch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskOutcome {
    pub success: bool,
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub mode: ExecutionMode,
}

impl TaskOutcome {
    pub fn completed(task_id: &str, mode: ExecutionMode, response: String) -> Self {
        Self {
            success: true,
            task_id: task_id.to_string(),
            status: TaskStatus::Completed,
            response: Some(response),
            error: None,
            mode,
        }
    }

    pub fn failed(task_id: &str, mode: ExecutionMode, status: TaskStatus, error: String) -> Self {
        Self {
            success: false,
            task_id: task_id.to_string(),
            status,
            response: None,
            error: Some(error),
            mode,
        }
    }
}

/// Returned for `wait=false`: the record exists but nothing executes it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeferredTask {
    pub success: bool,
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
    pub supported: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DispatchResult {
    Finished(TaskOutcome),
    Deferred(DeferredTask),
}

impl DispatchResult {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Finished(outcome) => &outcome.task_id,
            Self::Deferred(deferred) => &deferred.task_id,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Finished(outcome) => outcome.status,
            Self::Deferred(deferred) => deferred.status,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Self::Finished(outcome) => outcome.success,
            Self::Deferred(deferred) => deferred.success,
        }
    }
}

/// Task text with the optional context block appended.
pub fn compose_prompt(task: &str, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|ctx| !ctx.is_empty()) {
        Some(ctx) => format!("{task}\n\nContext:\n{ctx}"),
        None => task.to_string(),
    }
}
