//! Time-ordered task scheduler with a "flush now" override.
//!
//! [`TaskSchedule`] is the ordered set itself and knows nothing about
//! locking. [`Scheduler`] wraps it in a single mutex paired with a wake
//! condition that is signalled on every insertion, so idle workers can
//! re-evaluate what is due.
//!
//! Tasks are ordered by [`TaskKey`] (due time, kind, zone). Tasks carrying the
//! `flush` flag bypass that order entirely. A task handed out by
//! [`TaskSchedule::next`] is tracked as in flight until its worker resubmits
//! or releases it; requests aimed at an in-flight zone are recorded as
//! [`Pending`] and folded into the task on resubmission.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::core::error::{ScheduleRejected, SchedulerError};
use crate::core::task::{Task, TaskInfo, TaskKey, TaskKind, INITIAL_BACKOFF_SECS};
use crate::core::zone::ZoneKey;
use crate::util::clock;

/// Requests recorded against a task while a worker is executing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    /// Kind requested while in flight.
    pub interrupt: Option<TaskKind>,
    /// Due time requested with `interrupt`.
    pub interrupt_when: u64,
    /// Flush requested while in flight.
    pub flush: bool,
}

/// Ordered set of not-yet-executed tasks.
///
/// Invariant: `flush_count` equals the number of member tasks with `flush`
/// set, and every zone owns at most one scheduled or in-flight task.
#[derive(Debug, Default)]
pub struct TaskSchedule {
    tasks: BTreeMap<TaskKey, Task>,
    by_zone: HashMap<ZoneKey, TaskKey>,
    in_flight: HashMap<ZoneKey, Pending>,
    flush_count: usize,
}

impl TaskSchedule {
    /// Create an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled tasks (in-flight tasks excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of scheduled tasks believed to carry the flush flag.
    #[must_use]
    pub const fn flush_count(&self) -> usize {
        self.flush_count
    }

    /// Insert a task.
    ///
    /// # Errors
    ///
    /// Hands the task back with `Duplicate` if a task with the same identity is
    /// a member, or `ZoneBusy` if its zone already owns a scheduled or
    /// in-flight task. The existing member is left untouched.
    pub fn schedule(&mut self, task: Task) -> Result<(), ScheduleRejected> {
        let key = task.key();
        if self.tasks.contains_key(&key) {
            return Err(ScheduleRejected {
                reason: SchedulerError::Duplicate(task.to_string()),
                task: Box::new(task),
            });
        }
        let zone = task.zone_key().clone();
        if self.by_zone.contains_key(&zone) || self.in_flight.contains_key(&zone) {
            return Err(ScheduleRejected {
                reason: SchedulerError::ZoneBusy(zone.name),
                task: Box::new(task),
            });
        }
        if task.flush {
            self.flush_count += 1;
        }
        debug!(zone = %zone.name, what = %task.what, when = task.when, flush = task.flush, "task scheduled");
        self.by_zone.insert(zone, key.clone());
        self.tasks.insert(key, task);
        Ok(())
    }

    /// Remove a member by identity, clearing its flush flag.
    ///
    /// # Errors
    ///
    /// `NotFound` if no member has this identity.
    pub fn unschedule(&mut self, key: &TaskKey) -> Result<Task, SchedulerError> {
        let mut task = self
            .tasks
            .remove(key)
            .ok_or_else(|| SchedulerError::NotFound(format!("[{}] zone {} at {}", key.what, key.zone, key.when)))?;
        self.by_zone.remove(task.zone_key());
        if task.flush {
            task.flush = false;
            self.flush_count = self.flush_count.saturating_sub(1);
        }
        Ok(task)
    }

    /// Remove the scheduled task of `zone`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the zone has no scheduled task.
    pub fn unschedule_zone(&mut self, zone: &ZoneKey) -> Result<Task, SchedulerError> {
        let key = self
            .by_zone
            .get(zone)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(zone.name.clone()))?;
        self.unschedule(&key)
    }

    /// Move the task of `zone` to kind `what` at `when`.
    ///
    /// A scheduled task is unscheduled, retargeted and resubmitted. An
    /// in-flight task gets `what` and `when` recorded as its pending
    /// interrupt, which its worker applies on resubmission.
    ///
    /// # Errors
    ///
    /// `NotFound` if the zone has neither a scheduled nor an in-flight task.
    pub fn reschedule(&mut self, zone: &ZoneKey, what: TaskKind, when: u64) -> Result<(), SchedulerError> {
        if self.by_zone.contains_key(zone) {
            let mut task = self.unschedule_zone(zone)?;
            task.retarget(what, when);
            return self.schedule(task).map_err(|rejected| rejected.reason);
        }
        if let Some(pending) = self.in_flight.get_mut(zone) {
            debug!(zone = %zone.name, what = %what, when, "task in flight, recording interrupt");
            pending.interrupt = Some(what);
            pending.interrupt_when = when;
            return Ok(());
        }
        Err(SchedulerError::NotFound(zone.name.clone()))
    }

    /// Set the flush flag on the task of `zone` and re-insert it.
    ///
    /// # Errors
    ///
    /// `NotFound` if the zone has neither a scheduled nor an in-flight task.
    pub fn flush_zone(&mut self, zone: &ZoneKey) -> Result<(), SchedulerError> {
        if self.by_zone.contains_key(zone) {
            let mut task = self.unschedule_zone(zone)?;
            task.flush = true;
            return self.schedule(task).map_err(|rejected| rejected.reason);
        }
        if let Some(pending) = self.in_flight.get_mut(zone) {
            pending.flush = true;
            return Ok(());
        }
        Err(SchedulerError::NotFound(zone.name.clone()))
    }

    /// Flag every scheduled task for flushing. Returns how many were newly flagged.
    pub fn flush_all(&mut self) -> usize {
        let mut flagged = 0;
        for task in self.tasks.values_mut().filter(|task| !task.flush) {
            task.flush = true;
            flagged += 1;
        }
        self.flush_count = self.tasks.len();
        flagged
    }

    /// The task that should run next, without removing it.
    ///
    /// Flushed tasks come first regardless of due time. A positive flush
    /// count with no flushed member is corrected to zero.
    pub fn peek(&mut self) -> Option<&Task> {
        if self.flush_count > 0 {
            if self.tasks.values().any(|task| task.flush) {
                return self.tasks.values().find(|task| task.flush);
            }
            warn!(flush_count = self.flush_count, "flush count out of sync, resetting");
            self.flush_count = 0;
        }
        self.tasks.values().next()
    }

    /// Remove and return the next task if it is flushed or due at `now`.
    ///
    /// The returned task's zone is tracked as in flight until
    /// [`TaskSchedule::release`] is called for it.
    pub fn next(&mut self, now: u64) -> Option<Task> {
        let key = {
            let task = self.peek()?;
            if !task.flush && task.when > now {
                return None;
            }
            task.key()
        };
        let task = self.unschedule(&key).ok()?;
        self.in_flight.insert(task.zone_key().clone(), Pending::default());
        Some(task)
    }

    /// Stop tracking `zone` as in flight, returning requests recorded meanwhile.
    pub fn release(&mut self, zone: &ZoneKey) -> Option<Pending> {
        self.in_flight.remove(zone)
    }

    /// Whether `zone` has a scheduled task.
    #[must_use]
    pub fn is_scheduled(&self, zone: &ZoneKey) -> bool {
        self.by_zone.contains_key(zone)
    }

    /// Whether `zone`'s task is being executed.
    #[must_use]
    pub fn is_in_flight(&self, zone: &ZoneKey) -> bool {
        self.in_flight.contains_key(zone)
    }

    /// Whether `zone` owns a live task, scheduled or in flight.
    #[must_use]
    pub fn has_task(&self, zone: &ZoneKey) -> bool {
        self.is_scheduled(zone) || self.is_in_flight(zone)
    }

    /// The scheduled task of `zone`.
    #[must_use]
    pub fn get(&self, zone: &ZoneKey) -> Option<&Task> {
        self.by_zone.get(zone).and_then(|key| self.tasks.get(key))
    }

    /// Scheduled tasks in time order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }
}

/// Exponentially growing sleep used by idle workers when nothing is scheduled.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    current: u64,
    max: u64,
}

impl IdleBackoff {
    /// Start at 60s, doubling up to `max_secs`.
    #[must_use]
    pub fn new(max_secs: u64) -> Self {
        Self {
            current: INITIAL_BACKOFF_SECS.min(max_secs.max(1)),
            max: max_secs.max(1),
        }
    }

    /// Timeout for this idle sleep; the next one is twice as long.
    pub fn next_timeout(&mut self) -> Duration {
        let timeout = Duration::from_secs(self.current);
        self.current = self.current.saturating_mul(2).min(self.max);
        timeout
    }

    /// Back to the initial timeout.
    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF_SECS.min(self.max);
    }
}

/// [`TaskSchedule`] behind a scheduler-wide mutex and wake condition.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Mutex<TaskSchedule>,
    wake: Condvar,
}

impl Scheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the scheduler lock.
    pub fn lock(&self) -> MutexGuard<'_, TaskSchedule> {
        self.tasks.lock()
    }

    /// Insert a task and wake a waiting worker.
    ///
    /// # Errors
    ///
    /// See [`TaskSchedule::schedule`].
    pub fn schedule(&self, task: Task) -> Result<(), ScheduleRejected> {
        self.tasks.lock().schedule(task)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Remove the scheduled task of `zone`.
    ///
    /// # Errors
    ///
    /// See [`TaskSchedule::unschedule_zone`].
    pub fn unschedule_zone(&self, zone: &ZoneKey) -> Result<Task, SchedulerError> {
        self.tasks.lock().unschedule_zone(zone)
    }

    /// Move the task of `zone` to `what` at `when`, waking a worker.
    ///
    /// # Errors
    ///
    /// See [`TaskSchedule::reschedule`].
    pub fn reschedule(&self, zone: &ZoneKey, what: TaskKind, when: u64) -> Result<(), SchedulerError> {
        self.tasks.lock().reschedule(zone, what, when)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Flush the task of `zone`, waking a worker.
    ///
    /// # Errors
    ///
    /// See [`TaskSchedule::flush_zone`].
    pub fn flush_zone(&self, zone: &ZoneKey) -> Result<(), SchedulerError> {
        self.tasks.lock().flush_zone(zone)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Flush every scheduled task, waking all workers.
    pub fn flush_all(&self) -> usize {
        let flagged = self.tasks.lock().flush_all();
        self.wake.notify_all();
        flagged
    }

    /// Resubmit a task its worker has finished executing.
    ///
    /// Under one lock acquisition: requests recorded while the task was in
    /// flight are folded into it, `transition` applies the step outcome, and
    /// the task is inserted again.
    ///
    /// # Errors
    ///
    /// See [`TaskSchedule::schedule`].
    pub fn resubmit<F>(&self, mut task: Task, transition: F) -> Result<(), ScheduleRejected>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.lock();
        if let Some(pending) = tasks.release(task.zone_key()) {
            if pending.interrupt.is_some() {
                task.interrupt = pending.interrupt;
                task.interrupt_when = pending.interrupt_when;
            }
            task.flush |= pending.flush;
        }
        transition(&mut task);
        tasks.schedule(task)?;
        drop(tasks);
        self.wake.notify_one();
        Ok(())
    }

    /// Stop tracking the in-flight task of `zone` without resubmitting it.
    pub fn release(&self, zone: &ZoneKey) -> Option<Pending> {
        self.tasks.lock().release(zone)
    }

    /// Block until a task is ready or `exit` is set.
    ///
    /// Sleeps until the earliest due time, or for the idle backoff when the
    /// schedule is empty; any insertion wakes the sleeper early. Returns
    /// `None` once `exit` is observed.
    pub fn next_task(&self, exit: &AtomicBool, idle: &mut IdleBackoff) -> Option<Task> {
        let mut tasks = self.tasks.lock();
        loop {
            if exit.load(Ordering::Acquire) {
                return None;
            }
            let now = clock::now_secs();
            if let Some(task) = tasks.next(now) {
                idle.reset();
                return Some(task);
            }
            let timeout = match tasks.peek() {
                Some(task) => Duration::from_secs(task.when.saturating_sub(now).max(1)),
                None => idle.next_timeout(),
            };
            self.wake.wait_for(&mut tasks, timeout);
        }
    }

    /// Wake every thread sleeping in [`Scheduler::next_task`].
    ///
    /// Takes the lock so a waiter between its exit check and its sleep
    /// cannot miss the notification.
    pub fn wake_all(&self) {
        let _tasks = self.tasks.lock();
        self.wake.notify_all();
    }

    /// Drop every scheduled task and in-flight record. Returns how many
    /// scheduled tasks were dropped.
    pub fn clear(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let dropped = tasks.len();
        *tasks = TaskSchedule::new();
        dropped
    }

    /// Snapshot of the scheduled tasks in time order.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.tasks.lock().iter().map(Task::info).collect()
    }

    /// Number of scheduled tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no task is scheduled.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
