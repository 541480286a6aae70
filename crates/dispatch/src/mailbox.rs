use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{CommandRunner, CommandSpec, ProcessError};

/// Output printed by `gt mail inbox --json` for an empty inbox.
const NO_DATA: &str = "null";

/// A message as listed by the mailbox. Only read, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub from: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Missing and `null` both read as an empty string.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("mailbox command exited with {}: {stderr}", exit_label(.exit_code))]
    Command {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("malformed inbox listing: {0}")]
    Decode(#[source] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|code| format!("code {code}"))
        .unwrap_or_else(|| "a signal".to_string())
}

/// Result of a best-effort archive. Logged by callers, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived,
    Failed(String),
}

/// Summary of a best-effort inbox clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub listed: usize,
    pub archived: usize,
    pub failed: usize,
    /// Why the listing itself failed, if it did.
    pub list_error: Option<String>,
}

/// Thin client over the `gt mail` commands.
#[derive(Clone)]
pub struct MailboxClient {
    runner: Arc<dyn CommandRunner>,
    gt_bin: String,
    gt_root: PathBuf,
    timeout: Duration,
}

impl MailboxClient {
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

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.gt_bin, &self.gt_root).timeout(self.timeout)
    }

    pub async fn list_inbox(&self, identity: &str) -> Result<Vec<MailMessage>, MailboxError> {
        let spec = self
            .command()
            .args(["mail", "inbox", "--identity", identity, "--json"]);
        let output = self.runner.run(spec).await?;

        if !output.success() {
            return Err(MailboxError::Command {
                exit_code: output.exit_code,
                stderr: output.diagnostic().to_string(),
            });
        }

        decode_listing(&output.stdout)
    }

    pub async fn archive(&self, message_id: &str) -> ArchiveOutcome {
        let spec = self.command().args(["mail", "archive", message_id]);
        match self.runner.run(spec).await {
            Ok(output) if output.success() => ArchiveOutcome::Archived,
            Ok(output) => {
                let reason = format!(
                    "exit {}: {}",
                    exit_label(&output.exit_code),
                    output.diagnostic()
                );
                debug!("archive of message {message_id} failed: {reason}");
                ArchiveOutcome::Failed(reason)
            }
            Err(err) => {
                debug!("archive of message {message_id} failed: {err}");
                ArchiveOutcome::Failed(err.to_string())
            }
        }
    }

    /// Archive everything currently in `identity`'s inbox. Never fails.
    pub async fn clear_inbox(&self, identity: &str) -> ClearReport {
        let messages = match self.list_inbox(identity).await {
            Ok(messages) => messages,
            Err(err) => {
                debug!("could not list inbox {identity} for clearing: {err}");
                return ClearReport {
                    list_error: Some(err.to_string()),
                    ..ClearReport::default()
                };
            }
        };

        let mut report = ClearReport {
            listed: messages.len(),
            ..ClearReport::default()
        };

        for message in messages.iter().filter(|message| !message.id.is_empty()) {
            match self.archive(&message.id).await {
                ArchiveOutcome::Archived => report.archived += 1,
                ArchiveOutcome::Failed(_) => report.failed += 1,
            }
        }

        if report.listed > 0 {
            info!(
                "cleared inbox {identity} | listed={} archived={} failed={}",
                report.listed, report.archived, report.failed
            );
        }
        report
    }
}

fn decode_listing(stdout: &str) -> Result<Vec<MailMessage>, MailboxError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == NO_DATA {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(MailboxError::Decode)
}
