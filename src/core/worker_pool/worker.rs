//! Worker loop: dequeue a task, run one state-machine step, reschedule.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::core::collab::{SignConfStatus, SignJob};
use crate::core::engine::EngineSignal;
use crate::core::error::StepError;
use crate::core::scheduler::IdleBackoff;
use crate::core::task::{Task, TaskKind};
use crate::core::zone::{Zone, ZoneState, ZoneStatus};
use crate::util::clock;

use super::{Handoff, JobTally, PoolCounters, WorkerContext, WorkerHandle};

/// What a step decided.
#[derive(Debug)]
enum Outcome {
    /// Success: run `next` after `delay` seconds.
    Advance { next: TaskKind, delay: u64 },
    /// Nothing changed: resume a halted step, else run `next` now.
    Resume(TaskKind),
    /// Failure absorbed into the task backoff.
    Retry(StepError),
    /// Failure that drops the task until the next engine pass.
    Fatal(StepError),
}

impl Outcome {
    const fn now(next: TaskKind) -> Self {
        Self::Advance { next, delay: 0 }
    }
}

pub(super) fn run(handle: &Arc<WorkerHandle>, ctx: &WorkerContext, counters: &PoolCounters, inline: bool) {
    debug!(worker = %handle.name(), "worker started");
    let mut idle = IdleBackoff::new(ctx.max_backoff_secs);
    loop {
        handle.sleeping.store(true, Ordering::Release);
        let next = ctx.scheduler.next_task(&handle.need_to_exit, &mut idle);
        handle.sleeping.store(false, Ordering::Release);
        let Some(task) = next else {
            break;
        };

        let drained = perform(handle, ctx, counters, inline, task);
        if drained || ctx.reloading.load(Ordering::Acquire) {
            let _ = ctx.notify.send(EngineSignal::WorkerIdle);
        }
    }
    debug!(worker = %handle.name(), "worker exiting");
}

/// Run one step of `task` under its zone lock and hand it back to the
/// scheduler. Returns true when the zone was removed and its task dropped.
fn perform(handle: &Arc<WorkerHandle>, ctx: &WorkerContext, counters: &PoolCounters, inline: bool, task: Task) -> bool {
    let zone = Arc::clone(task.zone());
    handle.set_current(Some(task.info()));

    let mut state = zone.lock();
    debug!(worker = %handle.name(), zone = %zone.name(), what = %task.what, "performing task");
    let outcome = match task.what {
        TaskKind::Conf => configure(ctx, &zone, &mut state),
        TaskKind::Read => read(ctx, &zone, &mut state),
        TaskKind::Sign => sign(handle, ctx, counters, inline, &zone, &mut state),
        TaskKind::Write => write(ctx, &zone, &mut state),
    };

    let removed = state.status == ZoneStatus::Removed;
    if removed {
        ctx.scheduler.release(zone.key());
        info!(zone = %zone.name(), "zone removed, dropping its task");
    } else {
        settle(ctx, counters, &zone, task, outcome);
    }
    drop(state);

    handle.set_current(None);
    removed
}

fn settle(ctx: &WorkerContext, counters: &PoolCounters, zone: &Zone, task: Task, outcome: Outcome) {
    let now = clock::now_secs();
    let max_backoff = ctx.max_backoff_secs;
    let resubmitted = match outcome {
        Outcome::Advance { next, delay } => {
            counters.tasks_performed.fetch_add(1, Ordering::Relaxed);
            ctx.scheduler
                .resubmit(task, |t| t.succeed(next, now.saturating_add(delay), now))
        }
        Outcome::Resume(next) => {
            counters.tasks_performed.fetch_add(1, Ordering::Relaxed);
            ctx.scheduler.resubmit(task, |t| t.resume(next, now, now))
        }
        Outcome::Retry(err) => {
            counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            let what = task.what;
            ctx.scheduler.resubmit(task, |t| {
                let backoff = t.fail(now, max_backoff);
                warn!(zone = %zone.name(), what = %what, backoff, error = %err, "task failed, backing off");
            })
        }
        Outcome::Fatal(err) => {
            counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            ctx.scheduler.release(zone.key());
            error!(zone = %zone.name(), what = %task.what, error = %err, "task failed, not retrying this cycle");
            return;
        }
    };
    if let Err(rejected) = resubmitted {
        error!(zone = %zone.name(), error = %rejected, "unable to reschedule task");
    }
}

fn configure(ctx: &WorkerContext, zone: &Zone, state: &mut ZoneState) -> Outcome {
    match ctx.collab.signconf.update(zone, state) {
        Ok(SignConfStatus::Reloaded(conf)) => {
            info!(zone = %zone.name(), "signer configuration reloaded");
            state.signconf = Some(conf);
            Outcome::now(TaskKind::Read)
        }
        Ok(SignConfStatus::Unchanged) if state.signconf.is_some() => Outcome::Resume(after_unchanged(state)),
        Ok(SignConfStatus::Unchanged) => {
            Outcome::Fatal(StepError::SignConf("no signer configuration loaded".into()))
        }
        Err(err) if state.signconf.is_some() => {
            warn!(zone = %zone.name(), error = %err, "keeping previous signer configuration");
            Outcome::Resume(after_unchanged(state))
        }
        Err(err) => Outcome::Fatal(err),
    }
}

const fn after_unchanged(state: &ZoneState) -> TaskKind {
    if state.db.has_content() {
        TaskKind::Sign
    } else {
        TaskKind::Read
    }
}

fn read(ctx: &WorkerContext, zone: &Zone, state: &mut ZoneState) -> Outcome {
    if state.signconf.is_none() {
        debug!(zone = %zone.name(), "no signer configuration yet, configuring first");
        return Outcome::now(TaskKind::Conf);
    }
    match ctx.collab.adapter.read(zone, state) {
        Ok(status) => {
            debug!(zone = %zone.name(), ?status, serial = ?state.db.inbound_serial, "zone read");
            Outcome::now(TaskKind::Sign)
        }
        Err(err) => Outcome::Retry(err),
    }
}

fn sign(
    handle: &Arc<WorkerHandle>,
    ctx: &WorkerContext,
    counters: &PoolCounters,
    inline: bool,
    zone: &Zone,
    state: &mut ZoneState,
) -> Outcome {
    let Some(conf) = state.signconf.clone() else {
        return Outcome::now(TaskKind::Conf);
    };
    let Some(serial) = state.db.inbound_serial else {
        return Outcome::now(TaskKind::Read);
    };

    let jobs: Vec<SignJob> = state
        .db
        .names
        .iter()
        .map(|owner| SignJob {
            zone: zone.name().to_owned(),
            owner: owner.clone(),
            serial,
            validity_secs: conf.validity_secs,
        })
        .collect();
    let tally = if inline {
        sign_inline(ctx, counters, &jobs)
    } else {
        match dispatch(handle, ctx, jobs) {
            Ok(tally) => tally,
            Err(err) => return Outcome::Retry(err),
        }
    };
    state.db.signatures += tally.completed as u64;
    if tally.failed > 0 {
        return Outcome::Retry(StepError::Signer(format!(
            "{} of {} signatures failed",
            tally.failed, tally.appointed
        )));
    }

    match ctx.collab.adapter.write(zone, state) {
        Ok(_) => {
            state.db.outbound_serial = Some(serial);
            debug!(zone = %zone.name(), serial, signatures = tally.completed, "zone signed");
            Outcome::Advance {
                next: TaskKind::Sign,
                delay: conf.resign_secs,
            }
        }
        Err(err) => Outcome::Retry(err),
    }
}

fn sign_inline(ctx: &WorkerContext, counters: &PoolCounters, jobs: &[SignJob]) -> JobTally {
    let mut tally = JobTally {
        appointed: jobs.len(),
        ..JobTally::default()
    };
    for job in jobs {
        match ctx.collab.signer.sign(job) {
            Ok(()) => {
                counters.signatures.fetch_add(1, Ordering::Relaxed);
                tally.completed += 1;
            }
            Err(err) => {
                counters.signatures_failed.fetch_add(1, Ordering::Relaxed);
                debug!(zone = %job.zone, owner = %job.owner, error = %err, "signature failed");
                tally.failed += 1;
            }
        }
    }
    tally
}

/// Hand the jobs to drudgers and wait for all of them to report back.
fn dispatch(handle: &Arc<WorkerHandle>, ctx: &WorkerContext, jobs: Vec<SignJob>) -> Result<JobTally, StepError> {
    if jobs.is_empty() {
        return Ok(JobTally::default());
    }
    handle.appoint(jobs.len());
    for job in jobs {
        ctx.queue
            .push(Handoff {
                job,
                owner: Arc::clone(handle),
            })
            .map_err(|_| StepError::Shutdown)?;
    }
    ctx.queue.kick();
    handle.wait_for_jobs(&ctx.queue)
}

fn write(ctx: &WorkerContext, zone: &Zone, state: &mut ZoneState) -> Outcome {
    let resign = state.signconf.as_ref().map_or(60, |conf| conf.resign_secs);
    match ctx.collab.adapter.write(zone, state) {
        Ok(_) => {
            state.db.outbound_serial = state.db.inbound_serial;
            Outcome::Advance {
                next: TaskKind::Sign,
                delay: resign,
            }
        }
        Err(err) => Outcome::Retry(err),
    }
}
