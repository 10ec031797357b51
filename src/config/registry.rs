//! The configuration registry: typed entries, validators, persistence.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{self, SharedFilesystem};

use super::value::ConfigValue;
use super::CONFIG_FILE;

/// Keys longer than this are refused outright (OCPP 1.6 CiString50).
const MAX_KEY_LEN: usize = 50;

/// One registry entry.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub key: String,
    pub value: ConfigValue,
    pub readonly: bool,
    pub reboot_required: bool,
    pub persistent: bool,
    /// Incremented on every accepted write; consumers cache the count to
    /// detect changes without an observer callback.
    pub write_count: u32,
}

/// Outcome of a `ChangeConfiguration`-style write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetResult {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
}

/// Validator callback deciding whether a coerced value is acceptable.
pub type Validator = fn(&ConfigValue) -> bool;

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    #[serde(flatten)]
    value: ConfigValue,
}

/// Typed key-value registry persisted to [`CONFIG_FILE`].
pub struct ConfigRegistry {
    entries: BTreeMap<String, ConfigEntry>,
    validators: HashMap<String, Validator>,
    fs: Option<SharedFilesystem>,
    /// Bumped on every accepted mutation.
    revision: u64,
    dirty: bool,
}

impl ConfigRegistry {
    pub fn new(fs: Option<SharedFilesystem>) -> Self {
        Self {
            entries: BTreeMap::new(),
            validators: HashMap::new(),
            fs,
            revision: 0,
            dirty: false,
        }
    }

    // ── Declaration ────────────────────────────────────────

    /// Declare a key with its default value and flags. Re-declaring an
    /// existing key only updates flags, never the live value.
    pub fn declare(
        &mut self,
        key: &str,
        default: ConfigValue,
        readonly: bool,
        reboot_required: bool,
        persistent: bool,
    ) {
        if key.len() > MAX_KEY_LEN {
            warn!(key, "configuration key exceeds 50 bytes, ignored");
            return;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.readonly = readonly;
            entry.reboot_required = reboot_required;
            entry.persistent = persistent;
            return;
        }
        self.entries.insert(
            key.to_string(),
            ConfigEntry {
                key: key.to_string(),
                value: default,
                readonly,
                reboot_required,
                persistent,
                write_count: 0,
            },
        );
    }

    /// Register the validator consulted on writes to `key`.
    pub fn register_validator(&mut self, key: &str, validator: Validator) {
        self.validators.insert(key.to_string(), validator);
    }

    // ── Typed getters ──────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    pub fn int(&self, key: &str) -> Option<i32> {
        self.entries.get(key).and_then(|e| e.value.as_int())
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(|e| e.value.as_float())
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.entries.get(key).and_then(|e| e.value.as_bool())
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|e| e.value.as_str())
    }

    /// Write count for change detection, 0 if the key is unknown.
    pub fn write_count(&self, key: &str) -> u32 {
        self.entries.get(key).map(|e| e.write_count).unwrap_or(0)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ── Mutation ───────────────────────────────────────────

    /// Internal typed write: bypasses readonly (the core owns these keys)
    /// but still runs the validator.
    pub fn set(&mut self, key: &str, value: ConfigValue) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            warn!(key, "set on undeclared configuration key");
            return false;
        };
        if std::mem::discriminant(&entry.value) != std::mem::discriminant(&value) {
            warn!(key, "set with mismatched type");
            return false;
        }
        if let Some(validator) = self.validators.get(key) {
            if !validator(&value) {
                return false;
            }
        }
        entry.value = value;
        entry.write_count = entry.write_count.wrapping_add(1);
        self.revision += 1;
        self.dirty = self.dirty || entry.persistent;
        true
    }

    /// `ChangeConfiguration` entry point: coerce the raw wire string
    /// against the declared type, validate, store, persist.
    pub fn set_from_wire(&mut self, key: &str, raw: &str) -> SetResult {
        let Some(entry) = self.entries.get(key) else {
            return SetResult::NotSupported;
        };
        if entry.readonly {
            return SetResult::Rejected;
        }
        let Some(value) = entry.value.coerce(raw) else {
            return SetResult::Rejected;
        };
        if let Some(validator) = self.validators.get(key) {
            if !validator(&value) {
                return SetResult::Rejected;
            }
        }
        let reboot_required = entry.reboot_required;

        let Some(entry) = self.entries.get_mut(key) else {
            return SetResult::NotSupported;
        };
        entry.value = value;
        entry.write_count = entry.write_count.wrapping_add(1);
        self.revision += 1;
        self.dirty = self.dirty || entry.persistent;
        debug!(key, value = %entry.value, "configuration changed");
        self.checkpoint();

        if reboot_required {
            SetResult::RebootRequired
        } else {
            SetResult::Accepted
        }
    }

    // ── GetConfiguration support ───────────────────────────

    /// All entries, for an unfiltered `GetConfiguration`.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.entries.values()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // ── Persistence ────────────────────────────────────────

    /// Overlay persisted values on top of the declared defaults.
    pub fn load(&mut self) {
        let Some(fs) = self.fs.clone() else { return };
        let persisted: Vec<PersistedEntry> =
            match storage::load_json(fs.as_ref(), CONFIG_FILE) {
                Ok(Some(v)) => v,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "configuration file unreadable, using defaults");
                    storage::remove_silent(fs.as_ref(), CONFIG_FILE);
                    return;
                }
            };
        for PersistedEntry { key, value } in persisted {
            match self.entries.get_mut(&key) {
                Some(entry)
                    if std::mem::discriminant(&entry.value)
                        == std::mem::discriminant(&value) =>
                {
                    entry.value = value;
                }
                Some(_) => warn!(key, "persisted value has wrong type, keeping default"),
                // Key persisted by an earlier firmware revision; carry it
                // as a writable custom entry.
                None => self.declare(&key, value, false, false, true),
            }
        }
    }

    /// Write the registry back if any persistent entry changed.
    pub fn checkpoint(&mut self) {
        if !self.dirty {
            return;
        }
        let Some(fs) = self.fs.clone() else {
            self.dirty = false;
            return;
        };
        let persisted: Vec<PersistedEntry> = self
            .entries
            .values()
            .filter(|e| e.persistent)
            .map(|e| PersistedEntry {
                key: e.key.clone(),
                value: e.value.clone(),
            })
            .collect();
        if let Err(e) = storage::store_json(fs.as_ref(), CONFIG_FILE, &persisted) {
            warn!(error = %e, "could not checkpoint configuration");
            return;
        }
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::MemoryFilesystem;

    fn registry() -> ConfigRegistry {
        let mut reg = ConfigRegistry::new(None);
        reg.declare("HeartbeatInterval", ConfigValue::Int(86400), false, false, true);
        reg.declare(
            "SupportedFeatureProfiles",
            ConfigValue::String("Core".into()),
            true,
            false,
            false,
        );
        reg
    }

    #[test]
    fn wire_write_coerces_and_counts() {
        let mut reg = registry();
        assert_eq!(reg.set_from_wire("HeartbeatInterval", "300"), SetResult::Accepted);
        assert_eq!(reg.int("HeartbeatInterval"), Some(300));
        assert_eq!(reg.write_count("HeartbeatInterval"), 1);

        assert_eq!(
            reg.set_from_wire("HeartbeatInterval", "soon"),
            SetResult::Rejected
        );
        assert_eq!(reg.int("HeartbeatInterval"), Some(300));
    }

    #[test]
    fn readonly_and_unknown_keys() {
        let mut reg = registry();
        assert_eq!(
            reg.set_from_wire("SupportedFeatureProfiles", "All"),
            SetResult::Rejected
        );
        assert_eq!(reg.set_from_wire("NoSuchKey", "1"), SetResult::NotSupported);
    }

    #[test]
    fn validator_gates_writes() {
        let mut reg = registry();
        reg.register_validator("HeartbeatInterval", |v| {
            v.as_int().map(|i| i > 0).unwrap_or(false)
        });
        assert_eq!(
            reg.set_from_wire("HeartbeatInterval", "-5"),
            SetResult::Rejected
        );
        assert_eq!(reg.set_from_wire("HeartbeatInterval", "10"), SetResult::Accepted);
    }

    #[test]
    fn reboot_required_key_reports_it() {
        let mut reg = ConfigRegistry::new(None);
        reg.declare("ConnectionUrl", ConfigValue::String("ws://a".into()), false, true, true);
        assert_eq!(
            reg.set_from_wire("ConnectionUrl", "ws://b"),
            SetResult::RebootRequired
        );
        assert_eq!(reg.string("ConnectionUrl"), Some("ws://b"));
    }

    #[test]
    fn persists_and_reloads() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut reg = ConfigRegistry::new(Some(fs.clone()));
        reg.declare("HeartbeatInterval", ConfigValue::Int(86400), false, false, true);
        reg.set_from_wire("HeartbeatInterval", "120");

        let mut reborn = ConfigRegistry::new(Some(fs));
        reborn.declare("HeartbeatInterval", ConfigValue::Int(86400), false, false, true);
        reborn.load();
        assert_eq!(reborn.int("HeartbeatInterval"), Some(120));
    }

    #[test]
    fn unknown_persisted_key_is_adopted() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut reg = ConfigRegistry::new(Some(fs.clone()));
        reg.declare("VendorKey", ConfigValue::String("abc".into()), false, false, true);
        reg.set_from_wire("VendorKey", "xyz");

        let mut reborn = ConfigRegistry::new(Some(fs));
        reborn.load();
        assert_eq!(reborn.string("VendorKey"), Some("xyz"));
    }
}
