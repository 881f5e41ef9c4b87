use std::{fmt::Display, io};

use thiserror::Error;

use crate::process::ProcessId;

/// Failure of a single task, stored in its result slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task stopped on request")]
    Cancelled,
}

impl TaskError {
    pub fn failed(message: impl Display) -> Self {
        Self::Failed(message.to_string())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to launch worker thread {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to start the registry manager")]
    Manager(#[source] io::Error),
    #[error("a process needs at least one task")]
    EmptyBatch,
    #[error("task {index} failed")]
    Task {
        index: usize,
        #[source]
        source: TaskError,
    },
    #[error("process {0} already has a completion bound")]
    AlreadyBound(ProcessId),
    #[error("completer dropped before settling")]
    Abandoned,
}
