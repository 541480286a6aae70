use std::sync::Arc;

use async_trait::async_trait;
use gastown_dispatch::{TaskDispatcher, TaskRequest};
use serde_json::{json, Value};

use crate::protocol::{text_content, McpError, McpResult, McpTool};

pub const MAYOR_TASK: &str = "mayor_task";

const DESCRIPTION: &str = "Send a task to the Gastown Mayor. The Mayor is a Claude Code agent that \
orchestrates work across multiple AI agents, repositories (rigs), and work streams (convoys). Just \
describe what you want done - the Mayor handles the rest. When the Mayor session is running \
(interactive mode), conversations preserve context. When stopped, falls back to stateless one-shot \
execution.";

/// The single tool exposed by the server.
pub struct MayorTaskTool {
    dispatcher: Arc<TaskDispatcher>,
}

impl MayorTaskTool {
    pub fn new(dispatcher: Arc<TaskDispatcher>) -> Self {
        Self { dispatcher }
    }
}

fn parse_request(params: Value) -> McpResult<TaskRequest> {
    let params = match params {
        Value::Null => return Err(McpError::InvalidParams("missing 'task' argument".into())),
        other => other,
    };

    let request: TaskRequest = serde_json::from_value(params)
        .map_err(|err| McpError::InvalidParams(format!("invalid mayor_task arguments: {err}")))?;

    if request.task.trim().is_empty() {
        return Err(McpError::InvalidParams("'task' must not be empty".into()));
    }

    Ok(request)
}

#[async_trait]
impl McpTool for MayorTaskTool {
    fn name(&self) -> &str {
        MAYOR_TASK
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn execute(&self, params: Value) -> McpResult<Value> {
        let request = parse_request(params)?;
        let result = self.dispatcher.dispatch(request).await;

        let text = serde_json::to_string_pretty(&result)
            .map_err(|err| McpError::Internal(format!("failed to encode result: {err}")))?;
        Ok(text_content(text, !result.is_success()))
    }

    fn input_schema(&self) -> Value {
        let config = self.dispatcher.config();
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What you want the Mayor to do. Can be anything: 'add user auth to the app', 'fix the bug in checkout', 'list all active work', 'what's the status of the frontend rig?', etc."
                },
                "context": {
                    "type": "string",
                    "description": "Optional additional context (e.g., error messages, requirements, preferences)"
                },
                "wait": {
                    "type": "boolean",
                    "description": "If true, wait for task completion (up to timeout). If false, the task is only recorded; non-blocking execution is not supported yet. Default: true"
                },
                "timeout": {
                    "type": "number",
                    "description": format!(
                        "Timeout in seconds when wait=true (default: {}, max: {})",
                        config.default_task_timeout.as_secs(),
                        config.max_task_timeout.as_secs()
                    )
                }
            },
            "required": ["task"]
        })
    }
}
