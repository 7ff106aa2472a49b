//! Error types for scheduling, zone list, worker and engine operations.

use std::fmt;

use thiserror::Error;

use crate::core::task::Task;

/// Errors produced by scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A task with the same identity is already scheduled.
    #[error("duplicate task: {0}")]
    Duplicate(String),
    /// The zone already owns a scheduled or in-flight task.
    #[error("zone {0} already has a task")]
    ZoneBusy(String),
    /// No scheduled or in-flight task matches the request.
    #[error("task not found: {0}")]
    NotFound(String),
}

/// A task the scheduler refused, handed back to the caller together with the reason.
#[derive(Error)]
#[error("{reason}")]
pub struct ScheduleRejected {
    /// Why the task was refused.
    pub reason: SchedulerError,
    /// The refused task.
    pub task: Box<Task>,
}

impl fmt::Debug for ScheduleRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleRejected")
            .field("reason", &self.reason)
            .field("zone", &self.task.zone_name())
            .finish()
    }
}

/// Errors produced by the hand-off queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue has been closed for shutdown.
    #[error("hand-off queue is closed")]
    Closed,
}

/// Errors produced while reading or reconciling the zone inventory.
#[derive(Debug, Error)]
pub enum ZoneListError {
    /// The inventory file could not be read or stat'ed.
    #[error("zone list I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The inventory contents are malformed.
    #[error("zone list parse error: {0}")]
    Parse(String),
}

/// Errors produced by a task step; absorbed into the task backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The input/output adapter failed.
    #[error("adapter error: {0}")]
    Adapter(String),
    /// The signer configuration could not be loaded.
    #[error("signer configuration error: {0}")]
    SignConf(String),
    /// One or more signatures could not be produced.
    #[error("signer error: {0}")]
    Signer(String),
    /// The step was cut short because the pool is shutting down.
    #[error("shutting down")]
    Shutdown,
}

/// Errors produced while starting or stopping the thread pools.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A thread could not be spawned.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying OS error.
        source: std::io::Error,
    },
}

/// Errors produced by the engine; all of them are fatal at startup.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
    /// A required structure or resource could not be set up.
    #[error("setup error: {0}")]
    Setup(String),
    /// The zone list could not be loaded.
    #[error(transparent)]
    ZoneList(#[from] ZoneListError),
    /// The thread pools could not be started.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
