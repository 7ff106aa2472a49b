//! In-memory signer that only counts what it signs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::collab::{SignJob, Signer};
use crate::core::error::StepError;

/// Records signatures per zone without producing any cryptographic output.
#[derive(Debug, Default)]
pub struct InMemorySigner {
    total: AtomicU64,
    per_zone: Mutex<HashMap<String, u64>>,
}

impl InMemorySigner {
    /// Create a signer with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signatures made across all zones.
    pub fn signatures(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Signatures made for `zone`.
    pub fn signatures_for(&self, zone: &str) -> u64 {
        self.per_zone.lock().get(zone).copied().unwrap_or(0)
    }
}

impl Signer for InMemorySigner {
    fn sign(&self, job: &SignJob) -> Result<(), StepError> {
        if job.validity_secs == 0 {
            return Err(StepError::Signer(format!("{}: zero signature validity", job.owner)));
        }
        *self.per_zone.lock().entry(job.zone.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
