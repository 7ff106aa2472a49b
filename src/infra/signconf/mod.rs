//! Signer-configuration loaders.

pub mod file;

pub use file::JsonSignConfLoader;
