//! Worker and drudger thread pools.
//!
//! Workers pull tasks from the [`Scheduler`] and run one step of the task
//! state machine per dequeue. A `SIGN` step fans its signing jobs out over
//! the [`HandoffQueue`] to drudgers, the second-tier threads, and waits for
//! them to report back.
//!
//! # Design
//!
//! - **One OS thread per worker and per drudger**, sized by configuration
//! - **Timed waits**: idle workers sleep until the next due time or an insert
//! - **Cooperative exit**: a per-thread exit flag is checked once per loop
//!   iteration; shutdown sets it and broadcasts every condition a thread may
//!   be sleeping on

mod drudger;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::collab::{Collaborators, SignJob};
use crate::core::engine::EngineSignal;
use crate::core::error::{PoolError, StepError};
use crate::core::handoff::HandoffQueue;
use crate::core::scheduler::Scheduler;
use crate::core::task::TaskInfo;

/// Role of a pool thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    /// Pulls tasks from the scheduler.
    Worker,
    /// Pulls signing jobs from the hand-off queue.
    Drudger,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Worker => "worker",
            Self::Drudger => "drudger",
        })
    }
}

/// Signing jobs a worker has handed out and how many came back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobTally {
    /// Jobs handed to drudgers.
    pub appointed: usize,
    /// Jobs signed.
    pub completed: usize,
    /// Jobs that failed.
    pub failed: usize,
}

impl JobTally {
    const fn outstanding(&self) -> bool {
        self.completed + self.failed < self.appointed
    }
}

/// A signing job on the hand-off queue, with the worker waiting for it.
#[derive(Debug)]
pub struct Handoff {
    /// The job.
    pub job: SignJob,
    /// Worker to report the result to.
    pub owner: Arc<WorkerHandle>,
}

/// Shared state of one pool thread.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    role: WorkerRole,
    name: String,
    current: Mutex<Option<TaskInfo>>,
    need_to_exit: AtomicBool,
    sleeping: AtomicBool,
    waiting: AtomicBool,
    jobs: Mutex<JobTally>,
    jobs_done: Condvar,
}

impl WorkerHandle {
    /// Create the handle for thread `id` of `role`.
    #[must_use]
    pub fn new(id: usize, role: WorkerRole) -> Self {
        Self {
            id,
            role,
            name: format!("{role}[{}]", id + 1),
            current: Mutex::new(None),
            need_to_exit: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            jobs: Mutex::new(JobTally::default()),
            jobs_done: Condvar::new(),
        }
    }

    /// Index within its role.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Worker or drudger.
    #[must_use]
    pub const fn role(&self) -> WorkerRole {
        self.role
    }

    /// Display name, e.g. `worker[1]`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task currently being executed.
    pub fn current(&self) -> Option<TaskInfo> {
        self.current.lock().clone()
    }

    /// Whether the thread is idle waiting for work.
    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Acquire)
    }

    /// Whether the thread is waiting for drudgers to finish its jobs.
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Whether exit has been requested.
    pub fn should_exit(&self) -> bool {
        self.need_to_exit.load(Ordering::Acquire)
    }

    /// Ask the thread to leave its loop at the next iteration.
    pub fn request_exit(&self) {
        self.need_to_exit.store(true, Ordering::Release);
        self.jobs_done.notify_all();
    }

    pub(crate) fn set_current(&self, task: Option<TaskInfo>) {
        *self.current.lock() = task;
    }

    pub(crate) fn appoint(&self, jobs: usize) {
        *self.jobs.lock() = JobTally {
            appointed: jobs,
            ..JobTally::default()
        };
    }

    pub(crate) fn job_done(&self, signed: bool) {
        let mut tally = self.jobs.lock();
        if signed {
            tally.completed += 1;
        } else {
            tally.failed += 1;
        }
        if !tally.outstanding() {
            self.jobs_done.notify_all();
        }
    }

    /// Wait until every appointed job is accounted for.
    pub(crate) fn wait_for_jobs(&self, queue: &HandoffQueue<Handoff>) -> Result<JobTally, StepError> {
        self.waiting.store(true, Ordering::Release);
        let mut tally = self.jobs.lock();
        let result = loop {
            if !tally.outstanding() {
                break Ok(*tally);
            }
            if self.should_exit() || queue.is_closed() {
                break Err(StepError::Shutdown);
            }
            self.jobs_done.wait_for(&mut tally, Duration::from_secs(1));
        };
        drop(tally);
        self.waiting.store(false, Ordering::Release);
        result
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Number of drudger threads.
    pub drudger_count: usize,
    /// Task steps that succeeded.
    pub tasks_performed: u64,
    /// Task steps that failed.
    pub tasks_failed: u64,
    /// Signatures produced.
    pub signatures: u64,
    /// Signatures that failed.
    pub signatures_failed: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub tasks_performed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub signatures: AtomicU64,
    pub signatures_failed: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize, drudger_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            drudger_count,
            tasks_performed: self.tasks_performed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            signatures: self.signatures.load(Ordering::Relaxed),
            signatures_failed: self.signatures_failed.load(Ordering::Relaxed),
        }
    }
}

/// Everything a pool thread needs to execute steps.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Task scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Worker-to-drudger hand-off queue.
    pub queue: Arc<HandoffQueue<Handoff>>,
    /// Step collaborators.
    pub collab: Collaborators,
    /// Backoff ceiling in seconds.
    pub max_backoff_secs: u64,
    /// Engine notification channel.
    pub notify: Sender<EngineSignal>,
    /// Set while the engine runs a reload pass.
    pub reloading: Arc<AtomicBool>,
}

/// Fixed-size worker and drudger thread pools.
pub struct WorkerPool {
    workers: Vec<Arc<WorkerHandle>>,
    drudgers: Vec<Arc<WorkerHandle>>,
    threads: Mutex<Vec<(Arc<WorkerHandle>, JoinHandle<()>)>>,
    counters: Arc<PoolCounters>,
    context: Option<Arc<WorkerContext>>,
}

impl WorkerPool {
    /// Create the thread handles; no thread runs until [`WorkerPool::start`].
    #[must_use]
    pub fn new(worker_count: usize, drudger_count: usize) -> Self {
        Self {
            workers: (0..worker_count)
                .map(|id| Arc::new(WorkerHandle::new(id, WorkerRole::Worker)))
                .collect(),
            drudgers: (0..drudger_count)
                .map(|id| Arc::new(WorkerHandle::new(id, WorkerRole::Drudger)))
                .collect(),
            threads: Mutex::new(Vec::new()),
            counters: Arc::new(PoolCounters::default()),
            context: None,
        }
    }

    /// Worker handles.
    #[must_use]
    pub fn workers(&self) -> &[Arc<WorkerHandle>] {
        &self.workers
    }

    /// Drudger handles.
    #[must_use]
    pub fn drudgers(&self) -> &[Arc<WorkerHandle>] {
        &self.drudgers
    }

    /// Spawn drudger and worker threads.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` without workers or when already started,
    /// `PoolError::Spawn` if the OS refuses a thread.
    pub fn start(&mut self, context: WorkerContext) -> Result<(), PoolError> {
        if self.workers.is_empty() {
            return Err(PoolError::InvalidConfig("at least one worker thread is required".into()));
        }
        if self.context.is_some() {
            return Err(PoolError::InvalidConfig("pool already started".into()));
        }
        let context = Arc::new(context);
        self.context = Some(Arc::clone(&context));
        let inline = self.drudgers.is_empty();

        for handle in &self.drudgers {
            let ctx = Arc::clone(&context);
            let counters = Arc::clone(&self.counters);
            let me = Arc::clone(handle);
            self.spawn(handle, move || drudger::run(&me, &ctx, &counters))?;
        }
        for handle in &self.workers {
            let ctx = Arc::clone(&context);
            let counters = Arc::clone(&self.counters);
            let me = Arc::clone(handle);
            self.spawn(handle, move || worker::run(&me, &ctx, &counters, inline))?;
        }

        info!(
            workers = self.workers.len(),
            drudgers = self.drudgers.len(),
            "worker pool started"
        );
        Ok(())
    }

    fn spawn<F>(&self, handle: &Arc<WorkerHandle>, body: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("signerd-{}-{}", handle.role(), handle.id() + 1);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|source| PoolError::Spawn { name, source })?;
        self.threads.lock().push((Arc::clone(handle), thread));
        Ok(())
    }

    /// Current task of every worker that is executing one.
    pub fn in_flight(&self) -> Vec<(String, TaskInfo)> {
        self.workers
            .iter()
            .filter_map(|w| w.current().map(|task| (w.name().to_owned(), task)))
            .collect()
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.workers.len(), self.drudgers.len())
    }

    /// Stop drudgers, then workers, and join them.
    ///
    /// Each thread gets two seconds to exit before it is detached.
    pub fn shutdown(&self) {
        let Some(context) = self.context.as_ref() else {
            return;
        };
        let mut threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        info!("shutting down worker pool");

        for drudger in &self.drudgers {
            drudger.request_exit();
        }
        context.queue.close();
        let (drudgers, workers): (Vec<_>, Vec<_>) = threads
            .drain(..)
            .partition(|(handle, _)| handle.role() == WorkerRole::Drudger);
        join_all(drudgers);

        for worker in &self.workers {
            worker.request_exit();
        }
        context.scheduler.wake_all();
        context.queue.wake_all();
        join_all(workers);

        info!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // joins nothing if shutdown already ran
        self.shutdown();
    }
}

fn join_all(threads: Vec<(Arc<WorkerHandle>, JoinHandle<()>)>) {
    for (handle, join_handle) in threads {
        let (tx, rx) = std::sync::mpsc::channel();
        let joiner = thread::spawn(move || {
            let _ = tx.send(join_handle.join().is_ok());
        });
        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(true) => debug!(thread = %handle.name(), "thread joined"),
            Ok(false) => warn!(thread = %handle.name(), "thread panicked"),
            Err(_) => {
                warn!(thread = %handle.name(), "thread did not exit within timeout, detaching");
                continue;
            }
        }
        let _ = joiner.join();
    }
}
