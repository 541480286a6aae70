use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::task::{ExecutionMode, TaskRecord, TaskStatus};

const TASK_ID_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task {task_id} is already {status}, refusing transition to {requested}")]
    AlreadyTerminal {
        task_id: String,
        status: &'static str,
        requested: &'static str,
    },
}

/// In-memory task table, shared by the dispatcher, executors and status queries.
///
/// Records live for the lifetime of the process. Terminal records are frozen:
/// any further transition is rejected with [`StoreError::AlreadyTerminal`].
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new running record under a freshly generated id.
    pub fn create(
        &self,
        prompt: &str,
        context: Option<&str>,
        mode: Option<ExecutionMode>,
    ) -> TaskRecord {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);

        let task_id = loop {
            let candidate = short_id();
            if !tasks.contains_key(&candidate) {
                break candidate;
            }
        };

        let record = TaskRecord {
            task_id: task_id.clone(),
            prompt: prompt.to_string(),
            context: context.map(str::to_string),
            status: TaskStatus::Running,
            result: None,
            error: None,
            mode,
            created_at: Utc::now(),
            completed_at: None,
        };
        tasks.insert(task_id, record.clone());
        record
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }

    pub fn complete(&self, task_id: &str, result: impl Into<String>) -> Result<(), StoreError> {
        self.finish(task_id, TaskStatus::Completed, Some(result.into()), None)
    }

    pub fn fail(&self, task_id: &str, error: impl Into<String>) -> Result<(), StoreError> {
        self.finish(task_id, TaskStatus::Failed, None, Some(error.into()))
    }

    pub fn time_out(&self, task_id: &str, error: impl Into<String>) -> Result<(), StoreError> {
        self.finish(task_id, TaskStatus::Timeout, None, Some(error.into()))
    }

    fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        debug_assert!(status.is_terminal());

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::UnknownTask(task_id.to_string()))?;

        if record.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                task_id: task_id.to_string(),
                status: record.status.as_str(),
                requested: status.as_str(),
            });
        }

        record.status = status;
        record.result = result;
        record.error = error;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Records that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|record| !record.status.is_terminal())
            .count()
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..TASK_ID_LEN].to_string()
}
