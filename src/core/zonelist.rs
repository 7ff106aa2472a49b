//! The zone list and its reconciliation against freshly parsed inventories.
//!
//! Reconciliation is a linear merge-join over two lists ordered by
//! `(class, name)`. Zones present in both keep their identity and take the
//! inventory-derived fields of the new copy; zones only in the old list are
//! marked removed; zones only in the new list are moved in as added.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::ZoneListError;
use crate::core::zone::{AdapterConfig, DnsClass, Zone, ZoneKey, ZoneState, ZoneStatus};

/// One zone as described by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEntry {
    /// Zone name.
    pub name: String,
    /// Zone class, `IN` when omitted.
    #[serde(default)]
    pub class: DnsClass,
    /// KASP policy name.
    #[serde(default)]
    pub policy: String,
    /// Signer configuration file.
    pub signconf: PathBuf,
    /// Input adapter.
    pub input: AdapterConfig,
    /// Output adapter.
    pub output: AdapterConfig,
}

impl ZoneEntry {
    /// Zone list key of this entry.
    #[must_use]
    pub fn key(&self) -> ZoneKey {
        ZoneKey::new(&self.name, self.class)
    }

    fn into_zone(self) -> Zone {
        let state = ZoneState {
            status: ZoneStatus::Added,
            policy: self.policy,
            signconf_path: self.signconf,
            input: self.input,
            output: self.output,
            ..ZoneState::default()
        };
        Zone::new(&self.name, self.class, state)
    }
}

/// Result of [`ZoneList::update_from_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneListUpdate {
    /// The inventory has not been modified since the last read.
    Unchanged,
    /// The inventory was merged.
    Merged {
        /// Zones newly admitted.
        added: usize,
        /// Zones whose inventory fields changed.
        updated: usize,
        /// Zones no longer in the inventory.
        removed: usize,
    },
}

/// All known zones, ordered by `(class, name)`.
#[derive(Debug, Default)]
pub struct ZoneList {
    zones: BTreeMap<ZoneKey, Arc<Zone>>,
    last_modified: Option<SystemTime>,
    just_added: usize,
    just_updated: usize,
    just_removed: usize,
}

impl ZoneList {
    /// Create an empty zone list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a zone list from inventory entries; every zone starts as added.
    /// Later duplicates of a `(class, name)` key are skipped.
    #[must_use]
    pub fn from_entries(entries: Vec<ZoneEntry>) -> Self {
        let mut list = Self::new();
        for entry in entries {
            let key = entry.key();
            if list.zones.contains_key(&key) {
                warn!(zone = %key, "zone listed twice in inventory, ignoring duplicate");
                continue;
            }
            list.zones.insert(key, Arc::new(entry.into_zone()));
            list.just_added += 1;
        }
        list
    }

    /// Number of zones, including removed ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether the list holds no zones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Look up a zone by key.
    #[must_use]
    pub fn get(&self, key: &ZoneKey) -> Option<&Arc<Zone>> {
        self.zones.get(key)
    }

    /// Look up a zone by name in any class, preferring `IN`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<Zone>> {
        self.get(&ZoneKey::new(name, DnsClass::IN)).or_else(|| {
            let wanted = ZoneKey::new(name, DnsClass::IN).name;
            self.zones.values().find(|zone| zone.name() == wanted)
        })
    }

    /// Zones in `(class, name)` order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values()
    }

    /// Modification time of the inventory last merged.
    #[must_use]
    pub const fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Added, updated and removed counts of the last merge.
    #[must_use]
    pub const fn counts(&self) -> (usize, usize, usize) {
        (self.just_added, self.just_updated, self.just_removed)
    }

    /// Consume the counts of the last merge, resetting them to zero.
    pub fn take_counts(&mut self) -> (usize, usize, usize) {
        let counts = self.counts();
        self.just_added = 0;
        self.just_updated = 0;
        self.just_removed = 0;
        counts
    }

    /// Reconcile this list against a freshly parsed one.
    ///
    /// Zones present in both keep their identity and take the new policy,
    /// signer configuration path and adapters; they are marked updated only if
    /// one of those changed (or if they had been marked removed). Zones only
    /// here are marked removed, zones only in `fresh` are moved in as added.
    pub fn merge(&mut self, fresh: Self) {
        let (mut added, mut updated, mut removed) = (0, 0, 0);
        let mut incoming = fresh.zones.into_iter().peekable();
        let mut admitted = Vec::new();

        for (key, zone) in &self.zones {
            while let Some(entry) = incoming.next_if(|(new_key, _)| new_key < key) {
                admitted.push(entry);
            }
            if let Some((_, new_zone)) = incoming.next_if(|(new_key, _)| new_key == key) {
                if Self::update_zone(zone, &new_zone) {
                    debug!(zone = %key, "zone updated");
                    updated += 1;
                }
            } else {
                let mut state = zone.lock();
                if state.status != ZoneStatus::Removed {
                    debug!(zone = %key, "zone removed");
                    state.status = ZoneStatus::Removed;
                    removed += 1;
                }
            }
        }
        admitted.extend(incoming);

        for (key, zone) in admitted {
            debug!(zone = %key, "zone added");
            zone.lock().status = ZoneStatus::Added;
            self.zones.insert(key, zone);
            added += 1;
        }

        self.just_added = added;
        self.just_updated = updated;
        self.just_removed = removed;
        info!(added, updated, removed, total = self.zones.len(), "zone list merged");
    }

    fn update_zone(zone: &Zone, fresh: &Zone) -> bool {
        let fresh = fresh.lock();
        let mut state = zone.lock();
        let changed = state.policy != fresh.policy
            || state.signconf_path != fresh.signconf_path
            || state.input != fresh.input
            || state.output != fresh.output;
        if changed {
            state.policy.clone_from(&fresh.policy);
            state.signconf_path.clone_from(&fresh.signconf_path);
            state.input = fresh.input.clone();
            state.output = fresh.output.clone();
        }
        if changed || state.status == ZoneStatus::Removed {
            state.status = ZoneStatus::Updated;
            return true;
        }
        false
    }

    /// Re-read the inventory at `path` and merge it, unless its modification
    /// time has not advanced since the last read.
    ///
    /// # Errors
    ///
    /// The inventory cannot be stat'ed, read or parsed; the list is left as is.
    pub fn update_from_file<F>(&mut self, path: &Path, read: F) -> Result<ZoneListUpdate, ZoneListError>
    where
        F: FnOnce(&Path) -> Result<Vec<ZoneEntry>, ZoneListError>,
    {
        let modified = fs::metadata(path)?.modified()?;
        if self.last_modified.is_some_and(|last| modified <= last) {
            debug!(path = %path.display(), "zone list unchanged");
            return Ok(ZoneListUpdate::Unchanged);
        }
        let entries = read(path)?;
        self.merge(Self::from_entries(entries));
        self.last_modified = Some(modified);
        let (added, updated, removed) = self.counts();
        Ok(ZoneListUpdate::Merged {
            added,
            updated,
            removed,
        })
    }

    /// Zones marked removed that are still in the list.
    #[must_use]
    pub fn removed(&self) -> Vec<Arc<Zone>> {
        self.zones
            .values()
            .filter(|zone| zone.status() == ZoneStatus::Removed)
            .cloned()
            .collect()
    }

    /// Evict removed zones for which `busy` returns false.
    pub fn evict_removed<F>(&mut self, mut busy: F) -> Vec<Arc<Zone>>
    where
        F: FnMut(&Zone) -> bool,
    {
        let evictable: Vec<ZoneKey> = self
            .zones
            .iter()
            .filter(|(_, zone)| zone.status() == ZoneStatus::Removed && !busy(zone))
            .map(|(key, _)| key.clone())
            .collect();
        evictable
            .iter()
            .filter_map(|key| self.zones.remove(key))
            .inspect(|zone| info!(zone = %zone.name(), "zone evicted"))
            .collect()
    }

    /// Return added and updated zones to `ok` once the engine has acted on them.
    pub fn settle(&self) {
        for zone in self.zones.values() {
            let mut state = zone.lock();
            if matches!(state.status, ZoneStatus::Added | ZoneStatus::Updated) {
                state.status = ZoneStatus::Ok;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, policy: &str) -> ZoneEntry {
        ZoneEntry {
            name: name.to_owned(),
            class: DnsClass::IN,
            policy: policy.to_owned(),
            signconf: PathBuf::from(format!("/var/signconf/{name}.json")),
            input: AdapterConfig::file(format!("/var/zones/{name}")),
            output: AdapterConfig::file(format!("/var/signed/{name}")),
        }
    }

    fn status(list: &ZoneList, name: &str) -> ZoneStatus {
        list.find(name).unwrap().status()
    }

    #[test]
    fn merge_marks_added_updated_removed() {
        let mut old = ZoneList::from_entries(vec![entry("a", "p"), entry("b", "p"), entry("c", "p")]);
        old.settle();
        let c_before = Arc::clone(old.find("c").unwrap());

        old.merge(ZoneList::from_entries(vec![entry("b", "p"), entry("c", "q"), entry("d", "p")]));

        assert_eq!(status(&old, "a"), ZoneStatus::Removed);
        assert_eq!(status(&old, "b"), ZoneStatus::Ok);
        assert_eq!(status(&old, "c"), ZoneStatus::Updated);
        assert_eq!(status(&old, "d"), ZoneStatus::Added);
        assert_eq!(old.counts(), (1, 1, 1));
        assert!(Arc::ptr_eq(&c_before, old.find("c").unwrap()));
        assert_eq!(old.find("c").unwrap().lock().policy, "q");

        let evicted = old.evict_removed(|_| false);
        assert_eq!(evicted.len(), 1);
        let names: Vec<_> = old.iter().map(|z| z.name().to_owned()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn busy_removed_zone_stays() {
        let mut old = ZoneList::from_entries(vec![entry("a", "p")]);
        old.merge(ZoneList::new());
        assert!(old.evict_removed(|_| true).is_empty());
        assert_eq!(old.len(), 1);
        assert_eq!(old.removed().len(), 1);
    }

    #[test]
    fn reappearing_zone_is_updated() {
        let mut old = ZoneList::from_entries(vec![entry("a", "p")]);
        old.merge(ZoneList::new());
        old.merge(ZoneList::from_entries(vec![entry("a", "p")]));
        assert_eq!(status(&old, "a"), ZoneStatus::Updated);
    }

    #[test]
    fn duplicates_in_inventory_are_skipped() {
        let list = ZoneList::from_entries(vec![entry("a", "p"), entry("A.", "q")]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.find("a").unwrap().lock().policy, "p");
    }

    #[test]
    fn take_counts_resets() {
        let mut list = ZoneList::new();
        list.merge(ZoneList::from_entries(vec![entry("a", "p")]));
        assert_eq!(list.take_counts(), (1, 0, 0));
        assert_eq!(list.counts(), (0, 0, 0));
    }
}
