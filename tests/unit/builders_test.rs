//! Tests for builder modules

use std::sync::Arc;

use signerd::builders::EngineBuilder;
use signerd::config::EngineConfig;
use signerd::core::{EngineError, EngineState};
use signerd::infra::InMemorySigner;

#[test]
fn test_engine_builder_defaults() {
    let config = EngineConfig::with_zonelist("/tmp/zonelist.json");
    let builder = EngineBuilder::new(config.clone());
    assert_eq!(builder.config(), &config);

    let engine = builder.handle_signals(false).build().unwrap();
    assert_eq!(engine.config(), &config);
    assert_eq!(engine.handle().state(), EngineState::Run);
}

#[test]
fn test_engine_builder_custom_signer() {
    let signer = Arc::new(InMemorySigner::new());
    let engine = EngineBuilder::new(EngineConfig::with_zonelist("/tmp/zonelist.json"))
        .with_signer(signer)
        .build()
        .unwrap();
    assert_eq!(engine.handle().stats().pool.signatures, 0);
}

#[test]
fn test_engine_builder_rejects_invalid_config() {
    let config = EngineConfig {
        worker_threads: 0,
        ..EngineConfig::with_zonelist("/tmp/zonelist.json")
    };
    assert!(matches!(EngineBuilder::new(config).build(), Err(EngineError::Config(_))));
}
