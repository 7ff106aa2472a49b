//! Default collaborators: zone inventory reader, file zone adapter, JSON
//! signer-configuration loader and an in-memory signer.

pub mod adapter;
pub mod inventory;
pub mod signconf;
pub mod signer;

use std::sync::Arc;

use crate::core::Collaborators;

pub use adapter::FileAdapter;
pub use inventory::read_inventory;
pub use signconf::JsonSignConfLoader;
pub use signer::InMemorySigner;

/// The file adapter, JSON signer-configuration loader and in-memory signer.
#[must_use]
pub fn default_collaborators() -> Collaborators {
    Collaborators::new(
        Arc::new(FileAdapter::new()),
        Arc::new(JsonSignConfLoader::new()),
        Arc::new(InMemorySigner::new()),
    )
}
