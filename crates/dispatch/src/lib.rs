//! Task dispatch engine for the Gastown Mayor.
//!
//! A task goes to the live Mayor session when one is running (interactive
//! mode, nudge + mailbox reply) and to a fresh one-shot agent process
//! otherwise. Every external tool is invoked through [`CommandRunner`].

pub mod config;
pub mod dispatcher;
pub mod interactive;
pub mod mailbox;
pub mod oneshot;
pub mod probe;
pub mod process;
pub mod store;
pub mod task;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{ConfigError, DispatchConfig, ReplyMatching};
pub use dispatcher::{DispatcherStatus, TaskDispatcher};
pub use interactive::InteractiveExecutor;
pub use mailbox::{ArchiveOutcome, ClearReport, MailMessage, MailboxClient, MailboxError};
pub use oneshot::OneShotExecutor;
pub use probe::SessionProbe;
pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessError, ProcessRunner};
pub use store::{StoreError, TaskStore};
pub use task::{
    DeferredTask, DispatchResult, ExecutionMode, TaskOutcome, TaskRecord, TaskRequest, TaskStatus,
};
