//! Tests for error types

use signerd::core::{EngineError, PoolError, QueueError, SchedulerError, StepError, ZoneListError};

#[test]
fn test_scheduler_error_messages() {
    let err = SchedulerError::Duplicate("[sign] zone example.com at 60".to_string());
    assert_eq!(format!("{err}"), "duplicate task: [sign] zone example.com at 60");
    let err = SchedulerError::ZoneBusy("example.com".to_string());
    assert_eq!(format!("{err}"), "zone example.com already has a task");
    let err = SchedulerError::NotFound("example.com".to_string());
    assert_eq!(format!("{err}"), "task not found: example.com");
}

#[test]
fn test_queue_closed_error() {
    assert_eq!(QueueError::Closed.to_string(), "hand-off queue is closed");
}

#[test]
fn test_step_errors() {
    let err = StepError::Adapter("input missing".to_string());
    assert_eq!(err.to_string(), "adapter error: input missing");
    assert_eq!(StepError::Shutdown.to_string(), "shutting down");
}

#[test]
fn test_engine_error_wraps_sources() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "zonelist.json");
    let err: EngineError = ZoneListError::from(io).into();
    assert!(matches!(err, EngineError::ZoneList(ZoneListError::Io(_))));
    assert_eq!(err.to_string(), "zone list I/O error: zonelist.json");

    let err: EngineError = PoolError::InvalidConfig("no workers".to_string()).into();
    assert_eq!(err.to_string(), "invalid configuration: no workers");
}

#[test]
fn test_app_result_accepts_engine_errors() {
    fn setup() -> signerd::core::AppResult<()> {
        Err(EngineError::Setup("cannot bind".to_string()).into())
    }
    assert_eq!(setup().unwrap_err().to_string(), "setup error: cannot bind");
}
