//! Engine configuration structure.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::task::INITIAL_BACKOFF_SECS;

/// Engine configuration, read from a JSON document.
///
/// Every field except `zonelist` has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Zone inventory file.
    pub zonelist: PathBuf,
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Number of drudger threads; zero makes workers sign inline.
    pub drudger_threads: usize,
    /// Ceiling for task and idle backoff, in seconds.
    pub max_backoff_secs: u64,
    /// Hand-off queue capacity.
    pub queue_capacity: usize,
    /// Queued jobs that wake drudgers.
    pub queue_threshold: usize,
    /// Longest the engine sleeps between passes, in seconds.
    pub max_sleep_secs: u64,
    /// Unix socket for the command listener; disabled when absent.
    pub command_socket: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            zonelist: PathBuf::new(),
            worker_threads: num_cpus::get().max(1),
            drudger_threads: 0,
            max_backoff_secs: 3600,
            queue_capacity: 1000,
            queue_threshold: 1,
            max_sleep_secs: 3600,
            command_socket: None,
        }
    }
}

impl EngineConfig {
    /// Defaults with the given inventory path.
    #[must_use]
    pub fn with_zonelist(zonelist: impl Into<PathBuf>) -> Self {
        Self {
            zonelist: zonelist.into(),
            ..Self::default()
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.zonelist.as_os_str().is_empty() {
            return Err("zonelist must be set".into());
        }
        if self.worker_threads == 0 {
            return Err("worker_threads must be greater than 0".into());
        }
        if self.max_backoff_secs < INITIAL_BACKOFF_SECS {
            return Err(format!("max_backoff_secs must be at least {INITIAL_BACKOFF_SECS}"));
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.queue_threshold == 0 || self.queue_threshold > self.queue_capacity {
            return Err("queue_threshold must be between 1 and queue_capacity".into());
        }
        if self.max_sleep_secs == 0 {
            return Err("max_sleep_secs must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate the configuration file at `path`.
    ///
    /// A relative `zonelist` or `command_socket` is resolved against the
    /// directory holding the configuration file.
    ///
    /// # Errors
    ///
    /// The file cannot be read, or parsing or validation fails.
    pub fn load(path: &Path) -> Result<Self, String> {
        let input = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let mut cfg = Self::from_json_str(&input)?;
        if let Some(base) = path.parent() {
            if cfg.zonelist.is_relative() {
                cfg.zonelist = base.join(&cfg.zonelist);
            }
            if let Some(socket) = cfg.command_socket.as_mut().filter(|s| s.is_relative()) {
                *socket = base.join(&*socket);
            }
        }
        Ok(cfg)
    }
}
