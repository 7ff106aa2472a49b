//! Core scheduling abstractions: tasks, scheduler, zones, worker pool and engine.

pub mod collab;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod scheduler;
pub mod task;
pub mod worker_pool;
pub mod zone;
pub mod zonelist;

pub use collab::{AdapterStatus, Collaborators, SignConfLoader, SignConfStatus, SignJob, Signer, ZoneAdapter};
pub use engine::{
    Engine, EngineHandle, EngineSignal, EngineState, EngineStats, QueueListing, RunningTask, ZoneInfo,
};
pub use error::{
    AppResult, EngineError, PoolError, QueueError, ScheduleRejected, SchedulerError, StepError,
    ZoneListError,
};
pub use handoff::HandoffQueue;
pub use scheduler::{IdleBackoff, Pending, Scheduler, TaskSchedule};
pub use task::{Task, TaskInfo, TaskKey, TaskKind, INITIAL_BACKOFF_SECS};
pub use worker_pool::{Handoff, JobTally, PoolStats, WorkerContext, WorkerHandle, WorkerPool, WorkerRole};
pub use zone::{DnsClass, NameDb, SignConf, Zone, ZoneKey, ZoneState, ZoneStatus};
pub use zonelist::{ZoneEntry, ZoneList, ZoneListUpdate};
