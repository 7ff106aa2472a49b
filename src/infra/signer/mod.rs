//! Signing operations.

pub mod memory;

pub use memory::InMemorySigner;
