//! Build an [`Engine`] from configuration, falling back to the default
//! collaborators for anything not supplied.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::{Collaborators, Engine, EngineError, SignConfLoader, Signer, ZoneAdapter};
use crate::infra::{FileAdapter, InMemorySigner, JsonSignConfLoader};

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    adapter: Option<Arc<dyn ZoneAdapter>>,
    signconf: Option<Arc<dyn SignConfLoader>>,
    signer: Option<Arc<dyn Signer>>,
    handle_signals: bool,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("handle_signals", &self.handle_signals)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Start from `config` with default collaborators.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            adapter: None,
            signconf: None,
            signer: None,
            handle_signals: true,
        }
    }

    /// The configuration the engine will be built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Use `adapter` for zone input and output.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ZoneAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Use `loader` for signer configurations.
    #[must_use]
    pub fn with_signconf_loader(mut self, loader: Arc<dyn SignConfLoader>) -> Self {
        self.signconf = Some(loader);
        self
    }

    /// Use `signer` for signing jobs.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Whether the engine installs SIGHUP/SIGTERM/SIGINT handlers.
    #[must_use]
    pub fn handle_signals(mut self, on: bool) -> Self {
        self.handle_signals = on;
        self
    }

    /// Validate the configuration and create the engine.
    ///
    /// # Errors
    ///
    /// `EngineError::Config` if the configuration does not validate.
    pub fn build(self) -> Result<Engine, EngineError> {
        let collab = Collaborators::new(
            self.adapter.unwrap_or_else(|| Arc::new(FileAdapter::new())),
            self.signconf.unwrap_or_else(|| Arc::new(JsonSignConfLoader::new())),
            self.signer.unwrap_or_else(|| Arc::new(InMemorySigner::new())),
        );
        Ok(Engine::new(self.config, collab)?.handle_signals(self.handle_signals))
    }
}
