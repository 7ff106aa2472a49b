//! Tests for the command API surface

use signerd::builders::EngineBuilder;
use signerd::config::EngineConfig;
use signerd::core::{Engine, EngineState};
use signerd::runtime::{execute, Command};

fn engine() -> Engine {
    EngineBuilder::new(EngineConfig::with_zonelist("/tmp/zonelist.json"))
        .handle_signals(false)
        .build()
        .unwrap()
}

#[test]
fn test_help_lists_every_command() {
    let response = execute(&engine().handle(), &Command::Help);
    assert!(response.ok);
    let lines = response.data.unwrap();
    assert_eq!(lines.as_array().unwrap().len(), 8);
}

#[test]
fn test_unknown_zone_is_an_error() {
    let response = execute(&engine().handle(), &Command::Flush(Some("nope.example".into())));
    assert!(!response.ok);
    assert!(response.message.unwrap().contains("nope.example"));
}

#[test]
fn test_stop_requests_shutdown() {
    let engine = engine();
    let handle = engine.handle();
    let response = execute(&handle, &Command::Stop);
    assert!(response.ok);
    assert_eq!(handle.state(), EngineState::ShutdownRequested);
}

#[test]
fn test_stats_payload() {
    let engine = engine();
    let response = execute(&engine.handle(), &Command::Stats);
    let stats = response.data.unwrap();
    assert_eq!(stats["zones"], 0);
    assert_eq!(stats["state"], "run");
}
