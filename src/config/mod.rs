//! Configuration models for the engine and its thread pools.

pub mod engine;

pub use engine::EngineConfig;
