//! Scripted stand-in for the outside world, for tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};

type Handler = dyn Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync;

/// A [`CommandRunner`] that answers from a closure and records every call.
pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded calls whose arguments start with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|spec| has_args(spec, prefix))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());
        (self.handler)(&spec)
    }
}

/// True when the command's arguments start with `prefix`.
pub fn has_args(spec: &CommandSpec, prefix: &[&str]) -> bool {
    spec.args.len() >= prefix.len()
        && spec
            .args
            .iter()
            .zip(prefix)
            .all(|(arg, expected)| arg == expected)
}

/// A timeout error for the command, as the real runner would report it.
pub fn timed_out(spec: &CommandSpec) -> ProcessError {
    ProcessError::Timeout {
        program: spec.program.clone(),
        timeout: spec.timeout,
    }
}

/// A spawn error for the command, as if the binary were missing.
pub fn not_found(spec: &CommandSpec) -> ProcessError {
    ProcessError::Spawn {
        program: spec.program.clone(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
    }
}
