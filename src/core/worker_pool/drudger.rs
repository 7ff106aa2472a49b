//! Drudger loop: sign jobs handed over by workers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use super::{PoolCounters, WorkerContext, WorkerHandle};

pub(super) fn run(handle: &Arc<WorkerHandle>, ctx: &WorkerContext, counters: &PoolCounters) {
    debug!(drudger = %handle.name(), "drudger started");
    loop {
        handle.sleeping.store(true, Ordering::Release);
        let next = ctx.queue.pop(&handle.need_to_exit);
        handle.sleeping.store(false, Ordering::Release);
        let Some(handoff) = next else {
            break;
        };

        let signed = match ctx.collab.signer.sign(&handoff.job) {
            Ok(()) => {
                counters.signatures.fetch_add(1, Ordering::Relaxed);
                trace!(drudger = %handle.name(), zone = %handoff.job.zone, owner = %handoff.job.owner, "signed");
                true
            }
            Err(err) => {
                counters.signatures_failed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    drudger = %handle.name(),
                    zone = %handoff.job.zone,
                    owner = %handoff.job.owner,
                    error = %err,
                    "signature failed"
                );
                false
            }
        };
        handoff.owner.job_done(signed);
    }
    debug!(drudger = %handle.name(), "drudger exiting");
}
