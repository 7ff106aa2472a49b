//! # signerd
//!
//! The concurrency and scheduling core of a DNSSEC zone-signing daemon.
//!
//! The daemon keeps a fleet of zones signed. For every zone it decides *what*
//! work is due and *when*, hands that work to a bounded pool of worker
//! threads, tracks in-flight work that gets pre-empted by higher-priority
//! requests, and reconciles a periodically reloaded zone inventory against
//! the zones the running process already knows.
//!
//! ## Components
//!
//! - **Task**: one unit of work bound to a zone (configure, read, sign, write),
//!   with a due time and interrupt/halt/backoff bookkeeping.
//! - **Scheduler**: the time-ordered set of pending tasks with a "flush now"
//!   override and a blocking wait-for-next-task.
//! - **Hand-off queue**: a bounded FIFO passing signing jobs from workers to
//!   the second-tier drudger threads.
//! - **Worker pool**: fixed-size worker and drudger thread pools.
//! - **Zone list**: every known zone, merged against freshly parsed inventories.
//! - **Engine**: owns all of the above and runs the reload/run/shutdown loop.
//!
//! ## Example
//!
//! ```rust,ignore
//! use signerd::builders::EngineBuilder;
//! use signerd::config::EngineConfig;
//! use std::path::Path;
//!
//! let config = EngineConfig::load(Path::new("/etc/signerd/signerd.json"))?;
//! let mut engine = EngineBuilder::new(config).build()?;
//!
//! // A handle can reload, stop or introspect the engine from other threads.
//! let handle = engine.handle();
//! std::thread::spawn(move || handle.request_shutdown());
//!
//! engine.run()?;
//! ```
//!
//! Signing itself, zone-file I/O and signer configuration parsing are
//! collaborators behind the traits in [`core::collab`]; [`infra`] ships simple
//! default implementations.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: tasks, scheduler, zones, worker pool and engine.
pub mod core;
/// Configuration models for the engine.
pub mod config;
/// Builders to construct an engine from configuration.
pub mod builders;
/// Default collaborator implementations (inventory, adapters, signer).
pub mod infra;
/// Runtime adapters: command socket, OS signals and API snapshots.
pub mod runtime;
/// Shared utilities.
pub mod util;
