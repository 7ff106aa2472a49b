//! JSON signer-configuration loader with modification-time change detection.

use std::fs;

use tracing::debug;

use crate::core::collab::{SignConfLoader, SignConfStatus};
use crate::core::error::StepError;
use crate::core::zone::{SignConf, Zone, ZoneState};

/// Loads `{resign_secs, validity_secs, keys}` documents from the zone's
/// signer-configuration path.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSignConfLoader;

impl JsonSignConfLoader {
    /// Create the loader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SignConfLoader for JsonSignConfLoader {
    fn update(&self, zone: &Zone, state: &ZoneState) -> Result<SignConfStatus, StepError> {
        let path = &state.signconf_path;
        if path.as_os_str().is_empty() {
            return Err(StepError::SignConf(format!("zone {} has no signer configuration path", zone.name())));
        }
        let err = |e: &dyn std::fmt::Display| StepError::SignConf(format!("{}: {e}", path.display()));

        let mtime = fs::metadata(path).and_then(|m| m.modified()).map_err(|e| err(&e))?;
        let current = state.signconf.as_ref().and_then(|conf| conf.last_modified);
        if current.is_some_and(|last| mtime <= last) {
            debug!(zone = %zone.name(), "signer configuration unchanged");
            return Ok(SignConfStatus::Unchanged);
        }

        let input = fs::read_to_string(path).map_err(|e| err(&e))?;
        let mut conf: SignConf = serde_json::from_str(&input).map_err(|e| err(&e))?;
        if conf.resign_secs == 0 {
            return Err(err(&"resign_secs must be greater than 0"));
        }
        if conf.validity_secs < conf.resign_secs {
            return Err(err(&"validity_secs must not be shorter than resign_secs"));
        }
        conf.last_modified = Some(mtime);
        Ok(SignConfStatus::Reloaded(conf))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::core::zone::DnsClass;

    fn setup(dir: &Path, body: &str) -> (Zone, ZoneState) {
        let path = dir.join("example.com.json");
        fs::write(&path, body).unwrap();
        let state = ZoneState {
            signconf_path: path,
            ..ZoneState::default()
        };
        (Zone::new("example.com", DnsClass::IN, ZoneState::default()), state)
    }

    #[test]
    fn reloaded_then_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (zone, mut state) = setup(
            dir.path(),
            r#"{"resign_secs": 120, "keys": [{"locator": "abc", "algorithm": 13}]}"#,
        );
        let loader = JsonSignConfLoader::new();

        let SignConfStatus::Reloaded(conf) = loader.update(&zone, &state).unwrap() else {
            panic!("expected a reload");
        };
        assert_eq!(conf.resign_secs, 120);
        assert_eq!(conf.keys[0].flags, 256);
        assert!(conf.last_modified.is_some());

        state.signconf = Some(conf);
        assert_eq!(loader.update(&zone, &state).unwrap(), SignConfStatus::Unchanged);
    }

    #[test]
    fn invalid_documents_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let loader = JsonSignConfLoader::new();

        let (zone, state) = setup(dir.path(), "not json");
        assert!(matches!(loader.update(&zone, &state), Err(StepError::SignConf(_))));

        let (zone, state) = setup(dir.path(), r#"{"resign_secs": 0}"#);
        assert!(matches!(loader.update(&zone, &state), Err(StepError::SignConf(_))));

        let (zone, mut state) = setup(dir.path(), "{}");
        state.signconf_path = dir.path().join("missing.json");
        assert!(matches!(loader.update(&zone, &state), Err(StepError::SignConf(_))));
    }
}
