//! Collaborator contracts consumed by task steps.
//!
//! Zone I/O, signer-configuration loading and the signing operation itself
//! live outside the scheduling core. Workers reach them only through these
//! traits; [`crate::infra`] provides default implementations.

use std::fmt;
use std::sync::Arc;

use crate::core::error::StepError;
use crate::core::zone::{SignConf, Zone, ZoneState};

/// Successful outcome of an adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    /// Content was read or written.
    Ok,
    /// Nothing changed since the previous call.
    Unchanged,
}

/// Successful outcome of a signer-configuration update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignConfStatus {
    /// A new configuration was loaded.
    Reloaded(SignConf),
    /// The configuration source has not changed.
    Unchanged,
}

/// Zone input/output adapter, called during `READ`, `SIGN` and `WRITE` steps.
pub trait ZoneAdapter: Send + Sync {
    /// Ingest zone content into `state.db`.
    ///
    /// # Errors
    ///
    /// Any failure; the step is retried with backoff.
    fn read(&self, zone: &Zone, state: &mut ZoneState) -> Result<AdapterStatus, StepError>;

    /// Write the signed zone.
    ///
    /// # Errors
    ///
    /// Any failure; the step is retried with backoff.
    fn write(&self, zone: &Zone, state: &mut ZoneState) -> Result<AdapterStatus, StepError>;
}

/// Signer-configuration loader, called during the `CONF` step.
pub trait SignConfLoader: Send + Sync {
    /// Load the configuration for `zone` if it changed.
    ///
    /// # Errors
    ///
    /// The configuration could not be read or parsed.
    fn update(&self, zone: &Zone, state: &ZoneState) -> Result<SignConfStatus, StepError>;
}

/// One signing job handed from a worker to a drudger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignJob {
    /// Zone name.
    pub zone: String,
    /// Owner name whose records are signed.
    pub owner: String,
    /// Serial the signatures are produced for.
    pub serial: u32,
    /// Requested signature validity in seconds.
    pub validity_secs: u64,
}

/// The signing operation.
pub trait Signer: Send + Sync {
    /// Produce signatures for one job.
    ///
    /// # Errors
    ///
    /// The signature could not be produced; the owning `SIGN` step fails.
    fn sign(&self, job: &SignJob) -> Result<(), StepError>;
}

/// The collaborator set a worker pool executes steps with.
#[derive(Clone)]
pub struct Collaborators {
    /// Zone input/output adapter.
    pub adapter: Arc<dyn ZoneAdapter>,
    /// Signer-configuration loader.
    pub signconf: Arc<dyn SignConfLoader>,
    /// Signing operation.
    pub signer: Arc<dyn Signer>,
}

impl Collaborators {
    /// Bundle the three collaborators.
    pub fn new(
        adapter: Arc<dyn ZoneAdapter>,
        signconf: Arc<dyn SignConfLoader>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            adapter,
            signconf,
            signer,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
