//! Runtime adapters: command socket, OS signals and the API surface they share.

pub mod api;
pub mod command;
pub mod signals;

pub use api::{execute, Command, CommandResponse};
pub use command::CommandServer;
pub use signals::SignalListener;
