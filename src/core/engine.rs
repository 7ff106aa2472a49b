//! The engine: owns the zone list, scheduler, hand-off queue and thread
//! pools, and runs the reload/run/shutdown loop.
//!
//! Each pass reconciles the zone list against the inventory and makes sure
//! every zone owns exactly one task. Between passes the engine sleeps on its
//! signal channel for at most `max_sleep_secs`. OS signals and the command
//! socket only ever push an [`EngineSignal`]; they never touch engine state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::collab::Collaborators;
use crate::core::error::{EngineError, SchedulerError, ZoneListError};
use crate::core::handoff::HandoffQueue;
use crate::core::scheduler::Scheduler;
use crate::core::task::{Task, TaskInfo, TaskKind};
use crate::core::worker_pool::{Handoff, PoolStats, WorkerContext, WorkerPool};
use crate::core::zone::{DnsClass, Zone, ZoneStatus};
use crate::core::zonelist::{ZoneList, ZoneListUpdate};
use crate::infra::inventory::read_inventory;
use crate::runtime::command::CommandServer;
use crate::runtime::signals::SignalListener;
use crate::util::clock;

/// Notification delivered to the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    /// Re-read the inventory and run a pass now.
    Reload,
    /// Drain and stop.
    Shutdown,
    /// A worker finished a step while removed zones await eviction.
    WorkerIdle,
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Running normally.
    #[default]
    Run,
    /// A reload pass has been requested.
    ReloadRequested,
    /// Shutdown has been requested or is under way.
    ShutdownRequested,
}

/// Introspection view of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    /// Zone name.
    pub name: String,
    /// Zone class.
    pub class: DnsClass,
    /// Reconciliation status.
    pub status: ZoneStatus,
    /// Policy name.
    pub policy: String,
    /// Serial of the content last read.
    pub inbound_serial: Option<u32>,
    /// Serial of the output last written.
    pub outbound_serial: Option<u32>,
    /// Signatures produced so far.
    pub signatures: u64,
    /// Scheduled task, if any.
    pub task: Option<TaskInfo>,
    /// Whether a worker is executing this zone's task.
    pub in_flight: bool,
}

/// A task a worker is currently executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    /// Worker name.
    pub worker: String,
    /// The task.
    pub task: TaskInfo,
}

/// Scheduled and in-flight tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueListing {
    /// Scheduled tasks in dequeue order of due time.
    pub scheduled: Vec<TaskInfo>,
    /// Tasks being executed.
    pub running: Vec<RunningTask>,
}

/// Engine-wide statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Lifecycle state.
    pub state: EngineState,
    /// Zones in the zone list.
    pub zones: usize,
    /// Scheduled tasks.
    pub scheduled: usize,
    /// Signing jobs waiting on the hand-off queue.
    pub queued_jobs: usize,
    /// Thread pool counters.
    pub pool: PoolStats,
}

struct EngineShared {
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
    queue: Arc<HandoffQueue<Handoff>>,
    zonelist: Mutex<ZoneList>,
    pool: Mutex<WorkerPool>,
    state: Mutex<EngineState>,
    signals: Sender<EngineSignal>,
    reloading: Arc<AtomicBool>,
}

impl EngineShared {
    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    /// Run `op` on the zone called `name` while holding the zone list, so
    /// no pass can mark it removed in between.
    fn with_live_zone<T>(
        &self,
        name: &str,
        op: impl FnOnce(&Arc<Zone>) -> Result<T, SchedulerError>,
    ) -> Result<T, SchedulerError> {
        let list = self.zonelist.lock();
        let zone = list
            .find(name)
            .ok_or_else(|| SchedulerError::NotFound(format!("zone {name}")))?;
        if zone.status() == ZoneStatus::Removed {
            return Err(SchedulerError::NotFound(format!("zone {name} is being removed")));
        }
        op(zone)
    }

    /// Evict removed zones whose task has drained.
    fn evict_drained(&self) {
        let mut list = self.zonelist.lock();
        let evicted = list.evict_removed(|zone| self.scheduler.lock().has_task(zone.key()));
        let pending = !list.removed().is_empty();
        drop(list);
        self.reloading.store(pending, Ordering::Release);
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), pending, "drained zones evicted");
        }
    }
}

/// Cloneable handle used by the command surface and embedding code.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("state", &*self.shared.state.lock())
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Every known zone with its current task.
    pub fn list_zones(&self) -> Vec<ZoneInfo> {
        let zones: Vec<Arc<Zone>> = self.shared.zonelist.lock().iter().cloned().collect();
        zones
            .iter()
            .map(|zone| {
                let (task, in_flight) = {
                    let tasks = self.shared.scheduler.lock();
                    (tasks.get(zone.key()).map(Task::info), tasks.is_in_flight(zone.key()))
                };
                let state = zone.lock();
                ZoneInfo {
                    name: zone.name().to_owned(),
                    class: zone.class(),
                    status: state.status,
                    policy: state.policy.clone(),
                    inbound_serial: state.db.inbound_serial,
                    outbound_serial: state.db.outbound_serial,
                    signatures: state.db.signatures,
                    task,
                    in_flight,
                }
            })
            .collect()
    }

    /// Scheduled tasks plus each worker's current task.
    pub fn list_tasks(&self) -> QueueListing {
        QueueListing {
            scheduled: self.shared.scheduler.snapshot(),
            running: self
                .shared
                .pool
                .lock()
                .in_flight()
                .into_iter()
                .map(|(worker, task)| RunningTask { worker, task })
                .collect(),
        }
    }

    /// Ask the engine to run a reload pass.
    pub fn request_reload(&self) {
        self.shared.set_state(EngineState::ReloadRequested);
        self.send(EngineSignal::Reload);
    }

    /// Ask the engine to drain and stop.
    pub fn request_shutdown(&self) {
        self.shared.set_state(EngineState::ShutdownRequested);
        self.send(EngineSignal::Shutdown);
    }

    fn send(&self, signal: EngineSignal) {
        if self.shared.signals.send(signal).is_err() {
            warn!(?signal, "engine loop is gone, signal dropped");
        }
    }

    /// Run `name`'s task now, ahead of time-ordered work.
    ///
    /// # Errors
    ///
    /// `NotFound` if the zone is unknown, removed, or has no task.
    pub fn flush_zone(&self, name: &str) -> Result<(), SchedulerError> {
        self.shared
            .with_live_zone(name, |zone| self.shared.scheduler.flush_zone(zone.key()))
    }

    /// Flush every scheduled task. Returns how many were newly flagged.
    pub fn flush_all(&self) -> usize {
        self.shared.scheduler.flush_all()
    }

    /// Re-read and re-sign `name` immediately.
    ///
    /// # Errors
    ///
    /// `NotFound` if the zone is unknown or removed, or the scheduler
    /// refused the task.
    pub fn sign_zone(&self, name: &str) -> Result<(), SchedulerError> {
        let scheduler = &self.shared.scheduler;
        self.shared.with_live_zone(name, |zone| {
            let now = clock::now_secs();
            match scheduler.reschedule(zone.key(), TaskKind::Read, now) {
                Err(SchedulerError::NotFound(_)) => {
                    let mut task = Task::new(Arc::clone(zone), TaskKind::Read, now);
                    task.flush = true;
                    scheduler.schedule(task).map_err(|rejected| rejected.reason)
                }
                Err(err) => Err(err),
                Ok(()) => match scheduler.flush_zone(zone.key()) {
                    Err(SchedulerError::NotFound(_)) | Ok(()) => Ok(()),
                    Err(err) => Err(err),
                },
            }
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    /// Engine and pool statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            state: self.state(),
            zones: self.shared.zonelist.lock().len(),
            scheduled: self.shared.scheduler.len(),
            queued_jobs: self.shared.queue.len(),
            pool: self.shared.pool.lock().stats(),
        }
    }
}

/// Outcome of waiting on the signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Reload,
    Timeout,
    Shutdown,
}

/// The zone-signing engine.
pub struct Engine {
    shared: Arc<EngineShared>,
    signals: Receiver<EngineSignal>,
    collab: Collaborators,
    handle_signals: bool,
    command: Option<CommandServer>,
    listener: Option<SignalListener>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .field("handle_signals", &self.handle_signals)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine; nothing runs until [`Engine::run`].
    ///
    /// # Errors
    ///
    /// `EngineError::Config` if the configuration does not validate.
    pub fn new(config: EngineConfig, collab: Collaborators) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Config)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = EngineShared {
            scheduler: Arc::new(Scheduler::new()),
            queue: Arc::new(HandoffQueue::new(config.queue_capacity, config.queue_threshold)),
            zonelist: Mutex::new(ZoneList::new()),
            pool: Mutex::new(WorkerPool::new(config.worker_threads, config.drudger_threads)),
            state: Mutex::new(EngineState::Run),
            signals: tx,
            reloading: Arc::new(AtomicBool::new(false)),
            config,
        };
        Ok(Self {
            shared: Arc::new(shared),
            signals: rx,
            collab,
            handle_signals: true,
            command: None,
            listener: None,
        })
    }

    /// Whether SIGHUP, SIGTERM and SIGINT drive the engine. On by default.
    #[must_use]
    pub fn handle_signals(mut self, on: bool) -> Self {
        self.handle_signals = on;
        self
    }

    /// A handle for reloading, stopping and introspecting the engine.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Load the inventory, start the pools and listeners, then loop until
    /// shutdown is requested; finally drain everything.
    ///
    /// # Errors
    ///
    /// Setup failures: the inventory cannot be read on the first pass, a
    /// thread cannot be spawned, or the command socket cannot be bound.
    pub fn run(&mut self) -> Result<(), EngineError> {
        let result = self.start().and_then(|()| {
            self.serve();
            Ok(())
        });
        if let Err(err) = &result {
            error!(error = %err, "engine setup failed");
        }
        self.shutdown();
        result
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let update = self.update_zones(clock::now_secs())?;
        info!(?update, zonelist = %self.shared.config.zonelist.display(), "zone list loaded");

        let context = WorkerContext {
            scheduler: Arc::clone(&self.shared.scheduler),
            queue: Arc::clone(&self.shared.queue),
            collab: self.collab.clone(),
            max_backoff_secs: self.shared.config.max_backoff_secs,
            notify: self.shared.signals.clone(),
            reloading: Arc::clone(&self.shared.reloading),
        };
        self.shared.pool.lock().start(context)?;

        if let Some(path) = self.shared.config.command_socket.clone() {
            let server = CommandServer::start(&path, self.handle())
                .map_err(|e| EngineError::Setup(format!("command socket {}: {e}", path.display())))?;
            self.command = Some(server);
        }
        if self.handle_signals {
            let listener = SignalListener::start(self.shared.signals.clone())
                .map_err(|e| EngineError::Setup(format!("signal listener: {e}")))?;
            self.listener = Some(listener);
        }
        info!("engine started");
        Ok(())
    }

    fn serve(&self) {
        let max_sleep = Duration::from_secs(self.shared.config.max_sleep_secs);
        loop {
            match self.wait_for_signal(max_sleep) {
                Wake::Shutdown => break,
                Wake::Reload => info!("reloading zone list"),
                Wake::Timeout => debug!("periodic zone list check"),
            }
            self.shared.set_state(EngineState::Run);
            if let Err(err) = self.update_zones(clock::now_secs()) {
                error!(error = %err, "unable to update zone list, keeping current zones");
            }
        }
    }

    fn wait_for_signal(&self, max_sleep: Duration) -> Wake {
        let deadline = Instant::now() + max_sleep;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.signals.recv_timeout(remaining) {
                Ok(EngineSignal::Reload) => return Wake::Reload,
                Ok(EngineSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return Wake::Shutdown,
                Ok(EngineSignal::WorkerIdle) => self.shared.evict_drained(),
                Err(RecvTimeoutError::Timeout) => return Wake::Timeout,
            }
        }
    }

    /// Run one reconciliation pass at time `now`.
    ///
    /// Added zones and zones without a task get a `CONF` task due now;
    /// updated zones have their task moved to `CONF` now; removed zones lose
    /// their scheduled task and are evicted once no worker holds them.
    ///
    /// # Errors
    ///
    /// The inventory could not be read or parsed. The zone list is left
    /// as it was.
    pub fn update_zones(&self, now: u64) -> Result<ZoneListUpdate, ZoneListError> {
        let shared = &self.shared;
        let mut list = shared.zonelist.lock();
        let update = list.update_from_file(&shared.config.zonelist, read_inventory)?;

        for zone in list.iter() {
            let key = zone.key();
            match zone.status() {
                ZoneStatus::Removed => {
                    if shared.scheduler.unschedule_zone(key).is_ok() {
                        debug!(zone = %zone.name(), "task unscheduled for removed zone");
                    }
                }
                ZoneStatus::Updated => match shared.scheduler.reschedule(key, TaskKind::Conf, now) {
                    Err(SchedulerError::NotFound(_)) => Self::schedule_conf(shared, zone, now),
                    Err(err) => warn!(zone = %zone.name(), error = %err, "unable to reschedule task"),
                    Ok(()) => debug!(zone = %zone.name(), "zone updated, reconfiguring"),
                },
                ZoneStatus::Added | ZoneStatus::Ok => {
                    if !shared.scheduler.lock().has_task(key) {
                        Self::schedule_conf(shared, zone, now);
                    }
                }
            }
        }

        let evicted = list.evict_removed(|zone| shared.scheduler.lock().has_task(zone.key()));
        let pending = !list.removed().is_empty();
        shared.reloading.store(pending, Ordering::Release);
        let (added, updated, removed) = list.take_counts();
        list.settle();
        if update != ZoneListUpdate::Unchanged {
            info!(added, updated, removed, evicted = evicted.len(), pending, "zone list pass complete");
        }
        Ok(update)
    }

    fn schedule_conf(shared: &EngineShared, zone: &Arc<Zone>, now: u64) {
        match shared.scheduler.schedule(Task::new(Arc::clone(zone), TaskKind::Conf, now)) {
            Ok(()) => debug!(zone = %zone.name(), "configure task scheduled"),
            Err(rejected) => warn!(zone = %zone.name(), error = %rejected, "unable to schedule task"),
        }
    }

    /// Stop the command listener, drain the pools and tear down the zone
    /// list, scheduler and queue. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.shared.set_state(EngineState::ShutdownRequested);
        if let Some(server) = self.command.take() {
            server.stop();
        }
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        self.shared.pool.lock().shutdown();

        let jobs = self.shared.queue.drain().len();
        let tasks = self.shared.scheduler.clear();
        let zones = std::mem::take(&mut *self.shared.zonelist.lock()).len();
        if jobs + tasks + zones > 0 {
            info!(jobs, tasks, zones, "engine stopped");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
