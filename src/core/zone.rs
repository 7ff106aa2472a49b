//! Zone records: identity, reconciliation status and per-zone mutable state.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// A DNS class code (IN, CH, HS or a numeric `CLASSn`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DnsClass(u16);

impl DnsClass {
    /// The Internet class.
    pub const IN: Self = Self(1);
    /// The Chaos class.
    pub const CH: Self = Self(3);
    /// The Hesiod class.
    pub const HS: Self = Self(4);

    /// Numeric class code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }
}

impl Default for DnsClass {
    fn default() -> Self {
        Self::IN
    }
}

impl fmt::Display for DnsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::IN => f.write_str("IN"),
            Self::CH => f.write_str("CH"),
            Self::HS => f.write_str("HS"),
            Self(code) => write!(f, "CLASS{code}"),
        }
    }
}

impl FromStr for DnsClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "IN" => Ok(Self::IN),
            "CH" => Ok(Self::CH),
            "HS" => Ok(Self::HS),
            other => other
                .strip_prefix("CLASS")
                .and_then(|code| code.parse::<u16>().ok())
                .map(Self)
                .ok_or_else(|| format!("unknown DNS class `{s}`")),
        }
    }
}

impl TryFrom<String> for DnsClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DnsClass> for String {
    fn from(class: DnsClass) -> Self {
        class.to_string()
    }
}

/// Normalise a domain name for comparison: lowercase, no trailing dot.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed == "." {
        return ".".to_owned();
    }
    trimmed.trim_end_matches('.').to_ascii_lowercase()
}

/// Zone list ordering key: class first, then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneKey {
    /// Zone class.
    pub class: DnsClass,
    /// Normalised zone name.
    pub name: String,
}

impl ZoneKey {
    /// Build a key, normalising the name.
    #[must_use]
    pub fn new(name: &str, class: DnsClass) -> Self {
        Self {
            class,
            name: normalize_name(name),
        }
    }
}

impl fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.class)
    }
}

/// Reconciliation status of a zone after the last zone list merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneStatus {
    /// Unchanged since the previous merge.
    #[default]
    Ok,
    /// Newly admitted by the last merge.
    Added,
    /// Inventory fields changed in the last merge.
    Updated,
    /// Absent from the latest inventory; evicted once drained.
    Removed,
}

/// Input or output adapter selection for a zone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter kind; only `file` ships with the daemon.
    #[serde(default = "default_adapter_kind")]
    pub kind: String,
    /// Adapter-specific location, a path for `file`.
    pub uri: PathBuf,
}

fn default_adapter_kind() -> String {
    "file".to_owned()
}

impl AdapterConfig {
    /// File adapter for the given path.
    pub fn file(uri: impl Into<PathBuf>) -> Self {
        Self {
            kind: default_adapter_kind(),
            uri: uri.into(),
        }
    }
}

/// One signing key referenced by a signer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConf {
    /// Key locator in the key store.
    pub locator: String,
    /// DNSSEC algorithm number.
    pub algorithm: u8,
    /// DNSKEY flags.
    #[serde(default = "default_key_flags")]
    pub flags: u16,
}

const fn default_key_flags() -> u16 {
    256
}

/// Loaded signer configuration for a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignConf {
    /// Seconds between re-sign passes.
    #[serde(default = "default_resign_secs")]
    pub resign_secs: u64,
    /// Signature validity period in seconds.
    #[serde(default = "default_validity_secs")]
    pub validity_secs: u64,
    /// Keys used for signing.
    #[serde(default)]
    pub keys: Vec<KeyConf>,
    /// Modification time of the source the configuration was loaded from.
    #[serde(skip)]
    pub last_modified: Option<SystemTime>,
}

const fn default_resign_secs() -> u64 {
    60
}

const fn default_validity_secs() -> u64 {
    14 * 24 * 3600
}

impl Default for SignConf {
    fn default() -> Self {
        Self {
            resign_secs: default_resign_secs(),
            validity_secs: default_validity_secs(),
            keys: Vec::new(),
            last_modified: None,
        }
    }
}

/// Name-database state of a zone as far as scheduling cares.
#[derive(Debug, Clone, Default)]
pub struct NameDb {
    /// Owner names present in the zone.
    pub names: BTreeSet<String>,
    /// Serial of the last zone content read.
    pub inbound_serial: Option<u32>,
    /// Serial of the last signed output written.
    pub outbound_serial: Option<u32>,
    /// Modification time of the input the content was read from.
    pub last_read: Option<SystemTime>,
    /// Total signatures produced for this zone.
    pub signatures: u64,
}

impl NameDb {
    /// Whether zone content has been read at least once.
    #[must_use]
    pub const fn has_content(&self) -> bool {
        self.inbound_serial.is_some()
    }
}

/// Mutable part of a zone, guarded by the zone's own mutex.
#[derive(Debug, Clone, Default)]
pub struct ZoneState {
    /// Reconciliation status.
    pub status: ZoneStatus,
    /// Name of the KASP policy.
    pub policy: String,
    /// Path of the signer configuration file.
    pub signconf_path: PathBuf,
    /// Input adapter.
    pub input: AdapterConfig,
    /// Output adapter.
    pub output: AdapterConfig,
    /// Loaded signer configuration, if any.
    pub signconf: Option<SignConf>,
    /// Name database.
    pub db: NameDb,
    /// Default TTL from the zone content.
    pub default_ttl: u32,
}

/// One signing domain.
#[derive(Debug)]
pub struct Zone {
    key: ZoneKey,
    apex: String,
    state: Mutex<ZoneState>,
}

impl Zone {
    /// Create a zone with the given state.
    #[must_use]
    pub fn new(name: &str, class: DnsClass, state: ZoneState) -> Self {
        let key = ZoneKey::new(name, class);
        let apex = format!("{}.", key.name.trim_end_matches('.'));
        Self {
            key,
            apex,
            state: Mutex::new(state),
        }
    }

    /// Zone name, normalised.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Zone class.
    #[must_use]
    pub const fn class(&self) -> DnsClass {
        self.key.class
    }

    /// Fully qualified apex name.
    #[must_use]
    pub fn apex(&self) -> &str {
        &self.apex
    }

    /// Zone list key.
    #[must_use]
    pub const fn key(&self) -> &ZoneKey {
        &self.key
    }

    /// Acquire the zone lock.
    pub fn lock(&self) -> MutexGuard<'_, ZoneState> {
        self.state.lock()
    }

    /// Current reconciliation status (takes the zone lock briefly).
    pub fn status(&self) -> ZoneStatus {
        self.state.lock().status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_parse_and_display() {
        assert_eq!("in".parse::<DnsClass>().unwrap(), DnsClass::IN);
        assert_eq!("CLASS42".parse::<DnsClass>().unwrap().code(), 42);
        assert_eq!(DnsClass::CH.to_string(), "CH");
        assert!("XX".parse::<DnsClass>().is_err());
    }

    #[test]
    fn names_are_normalised() {
        assert_eq!(normalize_name("Example.COM."), "example.com");
        assert_eq!(normalize_name("."), ".");
        let zone = Zone::new("Example.org.", DnsClass::IN, ZoneState::default());
        assert_eq!(zone.name(), "example.org");
        assert_eq!(zone.apex(), "example.org.");
    }

    #[test]
    fn keys_order_by_class_then_name() {
        let a = ZoneKey::new("b.example", DnsClass::IN);
        let b = ZoneKey::new("a.example", DnsClass::CH);
        let c = ZoneKey::new("c.example", DnsClass::IN);
        assert!(a < b);
        assert!(a < c);
    }
}
