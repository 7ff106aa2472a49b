//! Zone input/output adapters.

pub mod file;

pub use file::FileAdapter;
