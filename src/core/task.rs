//! Tasks and their interrupt/halt/backoff state machine.
//!
//! A zone moves through `CONF -> READ -> SIGN -> SIGN ...`: the signer
//! configuration is loaded, the zone content is read, and signing then
//! reschedules itself every resign interval. A task may be pre-empted by a
//! higher-priority request (`interrupt`); the step it would otherwise have
//! run next is parked in `halted`/`halted_when`. A configure step that finds
//! nothing new resumes the parked step; any other success discards it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::zone::{DnsClass, Zone, ZoneKey};

/// Backoff applied on the first step failure, in seconds.
pub const INITIAL_BACKOFF_SECS: u64 = 60;

/// Kind of work a task performs. Ordered by pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Load the signer configuration.
    Conf,
    /// Ingest zone content.
    Read,
    /// Produce or refresh signatures.
    Sign,
    /// Write the signed zone.
    Write,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Conf => "configure",
            Self::Read => "read",
            Self::Sign => "sign",
            Self::Write => "write",
        })
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conf" | "configure" => Ok(Self::Conf),
            "read" => Ok(Self::Read),
            "sign" => Ok(Self::Sign),
            "write" => Ok(Self::Write),
            other => Err(format!("unknown task kind `{other}`")),
        }
    }
}

/// Scheduler identity of a task: due time, then kind, then zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    /// Due time, seconds since the Unix epoch.
    pub when: u64,
    /// Task kind.
    pub what: TaskKind,
    /// Zone name.
    pub zone: String,
    /// Zone class, so equal names in different classes stay distinct.
    pub class: DnsClass,
}

/// A unit of work bound to one zone.
///
/// Tasks are moved by value between the scheduler and the worker executing
/// them, so a scheduled task can never be mutated behind the scheduler's back.
pub struct Task {
    zone: Arc<Zone>,
    /// Kind of work due next.
    pub what: TaskKind,
    /// Kind requested while work was in flight.
    pub interrupt: Option<TaskKind>,
    /// Due time requested along with `interrupt`, never earlier than the
    /// completion of the interrupted step.
    pub interrupt_when: u64,
    /// Kind suspended to honour an interrupt.
    pub halted: Option<TaskKind>,
    /// Due time, seconds since the Unix epoch.
    pub when: u64,
    /// Time the halted kind resumes at.
    pub halted_when: u64,
    /// Current retry backoff in seconds, 0 after a success.
    pub backoff: u64,
    /// Run as soon as possible, ahead of time-ordered tasks.
    pub flush: bool,
}

impl Task {
    /// Create a task for `zone`.
    #[must_use]
    pub const fn new(zone: Arc<Zone>, what: TaskKind, when: u64) -> Self {
        Self {
            zone,
            what,
            interrupt: None,
            interrupt_when: 0,
            halted: None,
            when,
            halted_when: 0,
            backoff: 0,
            flush: false,
        }
    }

    /// The owning zone.
    #[must_use]
    pub const fn zone(&self) -> &Arc<Zone> {
        &self.zone
    }

    /// Name of the owning zone.
    #[must_use]
    pub fn zone_name(&self) -> &str {
        self.zone.name()
    }

    /// Zone list key of the owning zone.
    #[must_use]
    pub fn zone_key(&self) -> &ZoneKey {
        self.zone.key()
    }

    /// Scheduler identity for the task's current kind and due time.
    #[must_use]
    pub fn key(&self) -> TaskKey {
        TaskKey {
            when: self.when,
            what: self.what,
            zone: self.zone.name().to_owned(),
            class: self.zone.class(),
        }
    }

    /// Record a step success and move to `next` at `next_when`.
    ///
    /// Resets the backoff. A pending interrupt that differs from `next`
    /// takes over and `next` is halted. An interrupt equal to `next` only
    /// moves the due time to the requested one. Without an interrupt any
    /// halted kind is dropped and the task advances to `next`.
    pub fn succeed(&mut self, next: TaskKind, next_when: u64, now: u64) {
        self.backoff = 0;
        if self.take_interrupt(next, next_when, now) {
            return;
        }
        self.halted = None;
        self.what = next;
        self.when = next_when;
    }

    /// Record a step that changed nothing, such as a configure step finding
    /// the loaded configuration current.
    ///
    /// Like [`Task::succeed`], except that without an interrupt a halted
    /// kind resumes at `halted_when` instead of advancing to `next`.
    pub fn resume(&mut self, next: TaskKind, next_when: u64, now: u64) {
        self.backoff = 0;
        if self.take_interrupt(next, next_when, now) {
            return;
        }
        match self.halted.take() {
            Some(halted) => {
                self.what = halted;
                self.when = self.halted_when;
            }
            None => {
                self.what = next;
                self.when = next_when;
            }
        }
    }

    /// Apply a pending interrupt against the computed `next` step. Returns
    /// false when none was pending.
    fn take_interrupt(&mut self, next: TaskKind, next_when: u64, now: u64) -> bool {
        let Some(kind) = self.interrupt.take() else {
            return false;
        };
        let requested = self.interrupt_when.max(now);
        if kind == next {
            self.halted = None;
            self.what = next;
            self.when = requested;
        } else {
            self.halt(next, next_when, kind, requested);
        }
        true
    }

    /// Record a step failure: double the backoff (first failure: 60s), capped
    /// at `max_backoff`, and retry the same kind after it. Returns the backoff.
    pub fn fail(&mut self, now: u64, max_backoff: u64) -> u64 {
        self.backoff = if self.backoff == 0 {
            INITIAL_BACKOFF_SECS
        } else {
            self.backoff.saturating_mul(2)
        }
        .min(max_backoff);
        let retry_at = now.saturating_add(self.backoff);
        if !self.take_interrupt(self.what, retry_at, now) {
            self.when = retry_at;
        }
        self.backoff
    }

    /// Replace kind and due time, remembering the displaced kind so it resumes.
    pub(crate) fn retarget(&mut self, what: TaskKind, when: u64) {
        if what != self.what && self.halted.is_none() {
            self.halted = Some(self.what);
            self.halted_when = self.when;
        }
        self.what = what;
        self.when = when;
    }

    fn halt(&mut self, next: TaskKind, next_when: u64, interrupt: TaskKind, when: u64) {
        self.halted = Some(next);
        self.halted_when = next_when;
        self.what = interrupt;
        self.when = when;
    }

    /// Serialisable snapshot for introspection.
    #[must_use]
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            zone: self.zone.name().to_owned(),
            class: self.zone.class(),
            what: self.what,
            when: self.when,
            interrupt: self.interrupt,
            halted: self.halted,
            halted_when: self.halted.map(|_| self.halted_when),
            backoff: self.backoff,
            flush: self.flush,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("zone", &self.zone.name())
            .field("what", &self.what)
            .field("when", &self.when)
            .field("interrupt", &self.interrupt)
            .field("interrupt_when", &self.interrupt_when)
            .field("halted", &self.halted)
            .field("halted_when", &self.halted_when)
            .field("backoff", &self.backoff)
            .field("flush", &self.flush)
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] zone {} at {}", self.what, self.zone.name(), self.when)?;
        if self.flush {
            f.write_str(" (flush)")?;
        }
        Ok(())
    }
}

/// Snapshot of a task for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Zone name.
    pub zone: String,
    /// Zone class.
    pub class: DnsClass,
    /// Kind due next.
    pub what: TaskKind,
    /// Due time.
    pub when: u64,
    /// Pending interrupt.
    pub interrupt: Option<TaskKind>,
    /// Halted kind.
    pub halted: Option<TaskKind>,
    /// Resume time of the halted kind.
    pub halted_when: Option<u64>,
    /// Current backoff.
    pub backoff: u64,
    /// Flush flag.
    pub flush: bool,
}
