//! Builders wiring configuration and collaborators into an engine.

pub mod engine_builder;

pub use engine_builder::EngineBuilder;
