//! Tests for utility functions

use signerd::util::{init_tracing, now_ms, now_secs};

#[test]
fn test_clock_is_after_epoch() {
    assert!(now_secs() > 1_600_000_000);
    assert!(now_ms() / 1000 >= u128::from(now_secs()));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}
