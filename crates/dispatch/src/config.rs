use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GT_ROOT: &str = "/home/gastown/gt";
pub const DEFAULT_MODEL: &str = "claude-opus-4-5-20251101";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// How strictly an inbox message must be tied to the outbound task to count as its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMatching {
    /// Only a message echoing the correlation id is accepted.
    Thread,
    /// Correlation id first, then any message from the peer or typed as a reply.
    #[default]
    Permissive,
}

impl FromStr for ReplyMatching {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "thread" | "strict" => Ok(Self::Thread),
            "permissive" => Ok(Self::Permissive),
            other => Err(format!("expected 'thread' or 'permissive', got '{other}'")),
        }
    }
}

/// Tunables for the dispatch engine.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Root of the Gastown workspace; every `gt` command runs here.
    pub gt_root: PathBuf,
    pub gt_bin: String,
    pub agent_bin: String,
    pub model: String,
    /// Inbox that replies are delivered to.
    pub identity: String,
    /// Nudge target; also the sender marker for permissive reply matching.
    pub peer: String,
    pub poll_interval: Duration,
    pub status_timeout: Duration,
    pub mailbox_timeout: Duration,
    pub send_timeout: Duration,
    pub default_task_timeout: Duration,
    pub max_task_timeout: Duration,
    pub reply_matching: ReplyMatching,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            gt_root: PathBuf::from(DEFAULT_GT_ROOT),
            gt_bin: "gt".to_string(),
            agent_bin: "claude".to_string(),
            model: DEFAULT_MODEL.to_string(),
            identity: "overseer".to_string(),
            peer: "mayor".to_string(),
            poll_interval: Duration::from_secs(2),
            status_timeout: Duration::from_secs(5),
            mailbox_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(30),
            default_task_timeout: Duration::from_secs(300),
            max_task_timeout: Duration::from_secs(600),
            reply_matching: ReplyMatching::Permissive,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from an environment-style lookup. Unset or blank keys keep the current value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("GT_ROOT") {
            self.gt_root = PathBuf::from(value);
        }
        if let Some(value) = get("GT_BIN") {
            self.gt_bin = value;
        }
        if let Some(value) = get("CLAUDE_BIN") {
            self.agent_bin = value;
        }
        if let Some(value) = get("CLAUDE_MODEL") {
            self.model = value;
        }
        if let Some(value) = get("MCP_IDENTITY") {
            self.identity = value;
        }
        if let Some(value) = get("MAYOR_TARGET") {
            self.peer = value;
        }

        let seconds = [
            ("POLL_INTERVAL", &mut self.poll_interval),
            ("MAYOR_STATUS_TIMEOUT", &mut self.status_timeout),
            ("MAIL_INBOX_TIMEOUT", &mut self.mailbox_timeout),
            ("NUDGE_TIMEOUT", &mut self.send_timeout),
            ("DEFAULT_TASK_TIMEOUT", &mut self.default_task_timeout),
            ("MAX_TASK_TIMEOUT", &mut self.max_task_timeout),
        ];
        for (key, slot) in seconds {
            if let Some(value) = get(key) {
                *slot = parse_seconds(key, &value)?;
            }
        }

        if let Some(value) = get("MCP_REPLY_MATCHING") {
            self.reply_matching = value.parse().map_err(|reason| ConfigError::InvalidValue {
                key: "MCP_REPLY_MATCHING".to_string(),
                value: value.clone(),
                reason,
            })?;
        }

        Ok(())
    }

    /// Effective task timeout for a caller-supplied value in seconds.
    ///
    /// Missing or non-positive values fall back to the default; the result never
    /// exceeds `max_task_timeout`.
    pub fn clamp_timeout(&self, requested_secs: Option<i64>) -> Duration {
        let requested = match requested_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs.unsigned_abs()),
            _ => self.default_task_timeout,
        };
        requested.min(self.max_task_timeout)
    }

    /// Working directory of the one-shot agent.
    pub fn oneshot_dir(&self) -> PathBuf {
        self.gt_root.join("mayor")
    }
}

pub fn parse_seconds(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: err.to_string(),
        })
}
