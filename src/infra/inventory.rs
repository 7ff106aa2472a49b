//! JSON zone inventory reader.
//!
//! The inventory is either a bare array of zone entries or an object with a
//! `zones` array. Relative paths are resolved against the inventory's
//! directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::error::ZoneListError;
use crate::core::zonelist::ZoneEntry;

#[derive(Deserialize)]
#[serde(untagged)]
enum Inventory {
    Bare(Vec<ZoneEntry>),
    Wrapped { zones: Vec<ZoneEntry> },
}

/// Read and parse the inventory at `path`.
///
/// # Errors
///
/// `ZoneListError::Io` if the file cannot be read, `ZoneListError::Parse`
/// if it is not a valid inventory.
pub fn read_inventory(path: &Path) -> Result<Vec<ZoneEntry>, ZoneListError> {
    let input = fs::read_to_string(path)?;
    let mut entries = parse_inventory(&input)?;
    if let Some(base) = path.parent() {
        for entry in &mut entries {
            resolve(base, &mut entry.signconf);
            resolve(base, &mut entry.input.uri);
            resolve(base, &mut entry.output.uri);
        }
    }
    Ok(entries)
}

/// Parse inventory JSON without touching the filesystem.
///
/// # Errors
///
/// `ZoneListError::Parse` on malformed input or an entry without a name.
pub fn parse_inventory(input: &str) -> Result<Vec<ZoneEntry>, ZoneListError> {
    let inventory: Inventory =
        serde_json::from_str(input).map_err(|e| ZoneListError::Parse(e.to_string()))?;
    let entries = match inventory {
        Inventory::Bare(entries) | Inventory::Wrapped { zones: entries } => entries,
    };
    if let Some(blank) = entries.iter().position(|entry| entry.name.trim().is_empty()) {
        return Err(ZoneListError::Parse(format!("zone entry {blank} has no name")));
    }
    Ok(entries)
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() && !path.as_os_str().is_empty() {
        *path = base.join(&*path);
    }
}
