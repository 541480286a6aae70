//! Interactive execution against a live Mayor session.
//!
//! The task is pushed into the session with `gt nudge`, and the answer comes
//! back asynchronously as mail in the configured identity's inbox:
//!
//! ```text
//! Created -> InboxCleared -> TaskSent -> AwaitingReply -> Replied
//!                               |              |--------> TimedOut
//!                               |              `--------> Errored
//!                               `----------------------> SendFailed
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{DispatchConfig, ReplyMatching};
use crate::mailbox::{ArchiveOutcome, MailMessage, MailboxClient, MailboxError};
use crate::process::{CommandRunner, CommandSpec, ProcessError};
use crate::store::{StoreError, TaskStore};
use crate::task::{compose_prompt, ExecutionMode, TaskOutcome, TaskStatus};

const MODE: ExecutionMode = ExecutionMode::Interactive;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const REPLY_PLACEHOLDER: &str = "Task completed";

/// How a reply was tied to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchConfidence {
    /// The message echoed the correlation id.
    Correlated,
    /// Sent by the peer, correlation id absent or different.
    Sender,
    /// Typed as a reply, correlation id absent or different.
    ReplyType,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyMatch<'a> {
    pub message: &'a MailMessage,
    pub confidence: MatchConfidence,
}

/// Pick the reply for `thread_id` out of an inbox listing.
///
/// The first qualifying message in listing order wins. Under
/// [`ReplyMatching::Permissive`] a message qualifies when it carries the
/// correlation id, comes from the peer, or is typed as a reply; under
/// [`ReplyMatching::Thread`] only the correlation id counts.
pub fn find_reply<'a>(
    messages: &'a [MailMessage],
    thread_id: &str,
    peer: &str,
    matching: ReplyMatching,
) -> Option<ReplyMatch<'a>> {
    let peer = peer.to_lowercase();
    messages.iter().find_map(|message| {
        let confidence = if message.thread_id.as_deref() == Some(thread_id) {
            MatchConfidence::Correlated
        } else if matching == ReplyMatching::Thread {
            return None;
        } else if !peer.is_empty() && message.from.to_lowercase().contains(&peer) {
            MatchConfidence::Sender
        } else if message.kind.as_deref() == Some("reply") {
            MatchConfidence::ReplyType
        } else {
            return None;
        };
        Some(ReplyMatch {
            message,
            confidence,
        })
    })
}

/// Body, then subject, then a generic placeholder.
pub fn reply_text(message: &MailMessage) -> String {
    [message.body.as_deref(), message.subject.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .unwrap_or(REPLY_PLACEHOLDER)
        .to_string()
}

pub fn thread_id_for(task_id: &str) -> String {
    format!("mcp-{task_id}")
}

/// The nudge payload: the prompt followed by the correlation block and reply instructions.
pub fn compose_message(
    task: &str,
    context: Option<&str>,
    task_id: &str,
    thread_id: &str,
    identity: &str,
) -> String {
    format!(
        "{prompt}\n\n[MCP Task ID: {task_id}]\n[MCP Thread ID: {thread_id}]\n\
         Please reply to {identity} when complete with your response, \
         using thread {thread_id}.",
        prompt = compose_prompt(task, context),
    )
}

pub struct InteractiveExecutor {
    config: Arc<DispatchConfig>,
    runner: Arc<dyn CommandRunner>,
    mailbox: MailboxClient,
    store: Arc<TaskStore>,
}

impl InteractiveExecutor {
    pub fn new(
        config: Arc<DispatchConfig>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<TaskStore>,
    ) -> Self {
        let mailbox = MailboxClient::new(
            Arc::clone(&runner),
            config.gt_bin.clone(),
            config.gt_root.clone(),
            config.mailbox_timeout,
        );
        Self {
            config,
            runner,
            mailbox,
            store,
        }
    }

    pub async fn run(&self, task: &str, context: Option<&str>, timeout: Duration) -> TaskOutcome {
        let task_id = self.store.create(task, context, Some(MODE)).task_id;
        let thread_id = thread_id_for(&task_id);

        info!(
            "[{task_id}] sending task to Mayor via nudge: {}",
            preview(task)
        );

        self.mailbox.clear_inbox(&self.config.identity).await;

        let message = compose_message(task, context, &task_id, &thread_id, &self.config.identity);
        if let Err(outcome) = self.send(&task_id, message).await {
            return outcome;
        }

        info!("[{task_id}] task sent to Mayor, waiting up to {}s for reply", timeout.as_secs());

        match self.await_reply(&task_id, &thread_id, timeout).await {
            Ok(Some(reply)) => self.accept_reply(&task_id, &reply).await,
            Ok(None) => {
                let secs = timeout.as_secs();
                warn!("[{task_id}] no reply from Mayor within {secs}s");
                self.record(self.store.time_out(&task_id, format!("No reply from Mayor within {secs}s")));
                TaskOutcome::failed(
                    &task_id,
                    MODE,
                    TaskStatus::Timeout,
                    format!(
                        "Mayor did not reply within {secs} seconds. The task may still be \
                         processing - check Gastown terminal for status."
                    ),
                )
            }
            Err(err) => {
                let message = format!("Failed to read Mayor reply: {err}");
                error!("[{task_id}] {message}");
                self.record(self.store.fail(&task_id, message.clone()));
                TaskOutcome::failed(&task_id, MODE, TaskStatus::Failed, message)
            }
        }
    }

    async fn send(&self, task_id: &str, message: String) -> Result<(), TaskOutcome> {
        let spec = CommandSpec::new(&self.config.gt_bin, &self.config.gt_root)
            .args(["nudge", self.config.peer.as_str()])
            .arg(message)
            .timeout(self.config.send_timeout);

        // (status, recorded error, returned error)
        let (status, recorded, error) = match self.runner.run(spec).await {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => (
                TaskStatus::Failed,
                format!("Failed to nudge Mayor: {}", output.diagnostic()),
                format!("Failed to send task to Mayor: {}", output.diagnostic()),
            ),
            Err(err @ ProcessError::Timeout { .. }) => {
                let error = format!("Timed out sending task to Mayor: {err}");
                (TaskStatus::Timeout, error.clone(), error)
            }
            Err(err @ ProcessError::Spawn { .. }) => {
                let error = format!("Failed to send task to Mayor: {err}");
                (TaskStatus::Failed, error.clone(), error)
            }
        };

        error!("[{task_id}] {recorded}");
        let update = if status == TaskStatus::Timeout {
            self.store.time_out(task_id, recorded)
        } else {
            self.store.fail(task_id, recorded)
        };
        self.record(update);
        Err(TaskOutcome::failed(task_id, MODE, status, error))
    }

    /// Poll the inbox until a reply shows up or `timeout` worth of intervals has elapsed.
    ///
    /// Elapsed time is accounted in whole poll intervals, so an interval of 2s
    /// against a 5s timeout polls at most three times. Transient listing failures
    /// count as an empty poll; a malformed listing aborts.
    async fn await_reply(
        &self,
        task_id: &str,
        thread_id: &str,
        timeout: Duration,
    ) -> Result<Option<MailMessage>, MailboxError> {
        let interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let mut elapsed = Duration::ZERO;

        while elapsed < timeout {
            match self.mailbox.list_inbox(&self.config.identity).await {
                Ok(messages) => {
                    if let Some(found) = find_reply(
                        &messages,
                        thread_id,
                        &self.config.peer,
                        self.config.reply_matching,
                    ) {
                        if found.confidence == MatchConfidence::Correlated {
                            info!("[{task_id}] received reply from {}", found.message.from);
                        } else {
                            warn!(
                                "[{task_id}] accepted uncorrelated reply from {} ({:?} match, thread {:?})",
                                found.message.from, found.confidence, found.message.thread_id
                            );
                        }
                        return Ok(Some(found.message.clone()));
                    }
                }
                Err(err @ MailboxError::Decode(_)) => return Err(err),
                Err(err) => tracing::debug!("[{task_id}] poll error: {err}"),
            }

            tokio::time::sleep(interval).await;
            elapsed += interval;
        }

        Ok(None)
    }

    async fn accept_reply(&self, task_id: &str, reply: &MailMessage) -> TaskOutcome {
        let text = reply_text(reply);
        self.record(self.store.complete(task_id, text.clone()));
        info!("[{task_id}] task completed via Mayor nudge+mail");

        if !reply.id.is_empty() {
            if let ArchiveOutcome::Failed(reason) = self.mailbox.archive(&reply.id).await {
                tracing::debug!("[{task_id}] reply {} left in inbox: {reason}", reply.id);
            }
        }

        TaskOutcome::completed(task_id, MODE, text)
    }

    fn record(&self, update: Result<(), StoreError>) {
        if let Err(err) = update {
            warn!("task store rejected update: {err}");
        }
    }
}

fn preview(task: &str) -> String {
    let mut chars = task.chars();
    let head: String = chars.by_ref().take(100).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
