//! Small shared helpers: wall-clock access and tracing setup.

pub mod clock;
pub mod telemetry;

pub use clock::{now_ms, now_secs};
pub use telemetry::{init_tracing, init_tracing_with};
