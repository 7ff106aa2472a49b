//! Master-file-like zone adapter.
//!
//! Reading collects owner names and the SOA serial; `$TTL` sets the default
//! TTL, `;` starts a comment, `@` is the apex, and a line that starts with
//! whitespace continues the previous owner. Writing emits the signed owner
//! list with the serial it was signed for.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::time::SystemTime;

use tracing::debug;

use crate::core::collab::{AdapterStatus, ZoneAdapter};
use crate::core::error::StepError;
use crate::core::zone::{normalize_name, AdapterConfig, NameDb, Zone, ZoneState};

const FILE_KIND: &str = "file";

/// Adapter reading and writing zone files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAdapter;

impl FileAdapter {
    /// Create the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn check_kind(conf: &AdapterConfig) -> Result<&Path, StepError> {
    if conf.kind != FILE_KIND {
        return Err(StepError::Adapter(format!("unsupported adapter kind `{}`", conf.kind)));
    }
    if conf.uri.as_os_str().is_empty() {
        return Err(StepError::Adapter("adapter path is empty".into()));
    }
    Ok(&conf.uri)
}

fn modified(path: &Path) -> Result<SystemTime, StepError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| StepError::Adapter(format!("{}: {e}", path.display())))
}

/// Parsed zone content.
#[derive(Debug, Default, PartialEq, Eq)]
struct Parsed {
    names: std::collections::BTreeSet<String>,
    serial: Option<u32>,
    default_ttl: Option<u32>,
}

fn qualify(owner: &str, zone: &Zone) -> String {
    if owner == "@" {
        return zone.name().to_owned();
    }
    if owner.ends_with('.') {
        return normalize_name(owner);
    }
    if zone.name() == "." {
        normalize_name(owner)
    } else {
        normalize_name(&format!("{owner}.{}", zone.name()))
    }
}

fn parse_zone(input: &str, zone: &Zone) -> Result<Parsed, StepError> {
    let mut parsed = Parsed::default();
    let mut owner: Option<String> = None;
    for (lineno, raw) in input.lines().enumerate() {
        let line = raw.split(';').next().unwrap_or_default();
        if line.trim().is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace().filter(|t| *t != "(" && *t != ")");
        if line.starts_with('$') {
            if let (Some("$TTL"), Some(ttl)) = (tokens.next(), tokens.next()) {
                let ttl = ttl
                    .parse()
                    .map_err(|_| StepError::Adapter(format!("line {}: bad $TTL `{ttl}`", lineno + 1)))?;
                parsed.default_ttl = Some(ttl);
            }
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            let name = tokens.next().map(|t| qualify(t, zone));
            owner = name;
        }
        let Some(current) = owner.as_ref() else {
            return Err(StepError::Adapter(format!("line {}: record without owner", lineno + 1)));
        };
        parsed.names.insert(current.clone());

        let rest: Vec<&str> = tokens.collect();
        if let Some(soa) = rest.iter().position(|t| t.eq_ignore_ascii_case("SOA")) {
            let serial = rest.get(soa + 3).ok_or_else(|| {
                StepError::Adapter(format!("line {}: SOA without serial", lineno + 1))
            })?;
            parsed.serial = Some(serial.parse().map_err(|_| {
                StepError::Adapter(format!("line {}: bad SOA serial `{serial}`", lineno + 1))
            })?);
        }
    }
    Ok(parsed)
}

impl ZoneAdapter for FileAdapter {
    fn read(&self, zone: &Zone, state: &mut ZoneState) -> Result<AdapterStatus, StepError> {
        let path = check_kind(&state.input)?;
        let mtime = modified(path)?;
        if state.db.has_content() && state.db.last_read == Some(mtime) {
            debug!(zone = %zone.name(), "input unchanged");
            return Ok(AdapterStatus::Unchanged);
        }

        let input = fs::read_to_string(path).map_err(|e| StepError::Adapter(format!("{}: {e}", path.display())))?;
        let parsed = parse_zone(&input, zone)?;
        if !parsed.names.contains(zone.name()) {
            return Err(StepError::Adapter(format!("{}: no records at the apex", path.display())));
        }
        let serial = parsed
            .serial
            .unwrap_or_else(|| state.db.inbound_serial.map_or(1, |s| s.wrapping_add(1)));
        if let Some(ttl) = parsed.default_ttl {
            state.default_ttl = ttl;
        }
        state.db = NameDb {
            names: parsed.names,
            inbound_serial: Some(serial),
            last_read: Some(mtime),
            ..std::mem::take(&mut state.db)
        };
        debug!(zone = %zone.name(), serial, names = state.db.names.len(), "input read");
        Ok(AdapterStatus::Ok)
    }

    fn write(&self, zone: &Zone, state: &mut ZoneState) -> Result<AdapterStatus, StepError> {
        let path = check_kind(&state.output)?;
        let serial = state
            .db
            .inbound_serial
            .ok_or_else(|| StepError::Adapter("nothing to write, zone not read yet".into()))?;

        let mut out = Vec::new();
        let io = |e: std::io::Error| StepError::Adapter(format!("{}: {e}", path.display()));
        writeln!(out, "; {} signed, serial {serial}", zone.apex()).map_err(io)?;
        writeln!(out, "$TTL {}", state.default_ttl).map_err(io)?;
        for name in &state.db.names {
            let fqdn = if name == "." { name.clone() } else { format!("{name}.") };
            writeln!(out, "{fqdn}").map_err(io)?;
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &out).map_err(io)?;
        fs::rename(&tmp, path).map_err(io)?;
        debug!(zone = %zone.name(), serial, path = %path.display(), "output written");
        Ok(AdapterStatus::Ok)
    }
}
