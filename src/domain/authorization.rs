//! Local authorization list and authorization cache.
//!
//! The list is maintained by the Central System through `SendLocalList`;
//! the cache remembers past `Authorize`/`StartTransaction` verdicts with
//! LRU eviction. Both are persisted together in `auth-list.json` and
//! consulted by the offline authorization fallbacks.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::operations::types::{AuthorizationData, IdTagInfo};
use crate::storage::{self, SharedFilesystem};

pub const AUTH_LIST_FILE: &str = "auth-list.json";

/// Cache capacity; the least recently used entry yields first.
pub const AUTH_CACHE_SIZE: usize = 16;

/// Outcome of a `SendLocalList`, mirroring the wire statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalListUpdateOutcome {
    Accepted,
    Failed,
    VersionMismatch,
}

/// `SendLocalList` update mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    Differential,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    id_tag: String,
    info: IdTagInfo,
    last_used_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedAuth {
    list_version: i32,
    local_list: Vec<AuthorizationData>,
    cache: Vec<CacheEntry>,
}

pub struct AuthorizationService {
    fs: Option<SharedFilesystem>,
    list_version: i32,
    local_list: Vec<AuthorizationData>,
    cache: Vec<CacheEntry>,
    max_list_length: usize,
}

impl AuthorizationService {
    pub fn new(fs: Option<SharedFilesystem>, max_list_length: usize) -> Self {
        let mut service = Self {
            fs,
            list_version: 0,
            local_list: Vec::new(),
            cache: Vec::new(),
            max_list_length,
        };
        service.load();
        service
    }

    fn load(&mut self) {
        let Some(fs) = self.fs.clone() else { return };
        match storage::load_json::<PersistedAuth>(fs.as_ref(), AUTH_LIST_FILE) {
            Ok(Some(persisted)) => {
                debug!(
                    version = persisted.list_version,
                    entries = persisted.local_list.len(),
                    cached = persisted.cache.len(),
                    "authorization data restored"
                );
                self.list_version = persisted.list_version;
                self.local_list = persisted.local_list;
                self.cache = persisted.cache;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "authorization file unreadable, starting empty");
                storage::remove_silent(fs.as_ref(), AUTH_LIST_FILE);
            }
        }
    }

    fn persist(&self) {
        let Some(fs) = self.fs.as_ref() else { return };
        let persisted = PersistedAuth {
            list_version: self.list_version,
            local_list: self.local_list.clone(),
            cache: self.cache.clone(),
        };
        if let Err(e) = storage::store_json(fs.as_ref(), AUTH_LIST_FILE, &persisted) {
            warn!(error = %e, "could not persist authorization data");
        }
    }

    // ── Lookup ─────────────────────────────────────────────

    /// Local verdict for `id_tag`: the authorization list first, then the
    /// cache.
    pub fn local_authorization(&self, id_tag: &str) -> Option<&IdTagInfo> {
        if let Some(entry) = self.local_list.iter().find(|e| e.id_tag == id_tag) {
            return entry.id_tag_info.as_ref();
        }
        self.cache
            .iter()
            .find(|e| e.id_tag == id_tag)
            .map(|e| &e.info)
    }

    pub fn parent_id_tag(&self, id_tag: &str) -> Option<String> {
        self.local_authorization(id_tag)
            .and_then(|info| info.parent_id_tag.clone())
    }

    // ── Cache maintenance ──────────────────────────────────

    /// Remember a Central System verdict (LRU eviction at capacity).
    pub fn cache_verdict(&mut self, id_tag: &str, info: IdTagInfo, uptime_ms: u64) {
        if let Some(entry) = self.cache.iter_mut().find(|e| e.id_tag == id_tag) {
            entry.info = info;
            entry.last_used_ms = uptime_ms;
        } else {
            if self.cache.len() >= AUTH_CACHE_SIZE {
                if let Some((victim, _)) = self
                    .cache
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.last_used_ms)
                {
                    self.cache.remove(victim);
                }
            }
            self.cache.push(CacheEntry {
                id_tag: id_tag.to_string(),
                info,
                last_used_ms: uptime_ms,
            });
        }
        self.persist();
    }

    /// `ClearCache`.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.persist();
        info!("authorization cache cleared");
    }

    // ── Local list management ──────────────────────────────

    pub fn list_version(&self) -> i32 {
        // OCPP reserves 0 for "no list installed".
        if self.local_list.is_empty() {
            0
        } else {
            self.list_version
        }
    }

    /// Apply a `SendLocalList` update.
    pub fn update_local_list(
        &mut self,
        version: i32,
        update_type: UpdateType,
        entries: Vec<AuthorizationData>,
    ) -> LocalListUpdateOutcome {
        if version <= 0 {
            return LocalListUpdateOutcome::Failed;
        }
        if update_type == UpdateType::Differential && version <= self.list_version {
            return LocalListUpdateOutcome::VersionMismatch;
        }

        match update_type {
            UpdateType::Full => {
                if entries.len() > self.max_list_length {
                    return LocalListUpdateOutcome::Failed;
                }
                self.local_list = entries
                    .into_iter()
                    .filter(|e| e.id_tag_info.is_some())
                    .collect();
            }
            UpdateType::Differential => {
                for entry in entries {
                    match entry.id_tag_info {
                        Some(_) => {
                            if let Some(existing) = self
                                .local_list
                                .iter_mut()
                                .find(|e| e.id_tag == entry.id_tag)
                            {
                                *existing = entry;
                            } else {
                                if self.local_list.len() >= self.max_list_length {
                                    return LocalListUpdateOutcome::Failed;
                                }
                                self.local_list.push(entry);
                            }
                        }
                        // No idTagInfo means "remove this tag".
                        None => self.local_list.retain(|e| e.id_tag != entry.id_tag),
                    }
                }
            }
        }
        self.list_version = version;
        self.persist();
        info!(version, entries = self.local_list.len(), "local authorization list updated");
        LocalListUpdateOutcome::Accepted
    }
}
