//! Durable per-origin key/value storage with one key per role slot.
//!
//! [`OriginStorage`] is shared by every tab of an origin. Each tab talks to it
//! through a [`SessionStore`] stamped with its [`TabId`]; a change made by one
//! tab is announced to every other tab of the same origin and never echoed back
//! to the writer.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::token::Role;

/// Values some platform layers write instead of deleting a key.
const ABSENT_SENTINELS: [&str; 2] = ["undefined", "null"];

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to persist session store: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity of one open tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(Ulid);

impl TabId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A change made by another tab. `key` is `None` when the whole store was
/// cleared or the listener fell behind and must re-read everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: Option<String>,
    pub source: TabId,
}

impl StorageEvent {
    /// Role slot touched by this event, if it touched exactly one.
    #[must_use]
    pub fn slot(&self) -> Option<Role> {
        self.key.as_deref().and_then(Role::from_storage_key)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
struct Entries(BTreeMap<String, String>);

struct Shared {
    entries: Mutex<Entries>,
    events: broadcast::Sender<StorageEvent>,
    path: Option<PathBuf>,
}

/// Storage shared by all tabs of one origin.
#[derive(Clone)]
pub struct OriginStorage {
    shared: Arc<Shared>,
}

impl fmt::Debug for OriginStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginStorage")
            .field("path", &self.shared.path)
            .finish_non_exhaustive()
    }
}

impl OriginStorage {
    /// Storage that lives as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_entries(Entries::default(), None)
    }

    /// Storage backed by a JSON file so sessions survive a restart. A missing
    /// file starts empty.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Entries::default(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), "Opened session store");
        Ok(Self::with_entries(entries, Some(path)))
    }

    fn with_entries(entries: Entries, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(entries),
                events,
                path,
            }),
        }
    }

    /// Handle for one tab.
    #[must_use]
    pub fn store_for(&self, tab: TabId) -> SessionStore {
        SessionStore {
            storage: self.clone(),
            tab,
        }
    }

    /// Raw value under `key`, sentinels included.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.lock().0.get(key).cloned()
    }

    /// Write a raw value on behalf of `source`. No event is sent if the value
    /// did not change.
    ///
    /// # Errors
    /// Returns an error if the backing file cannot be written.
    pub fn set_raw(&self, source: TabId, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if entries.0.get(key).is_some_and(|current| current == value) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.0.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *entries = next;
        drop(entries);
        self.announce(source, Some(key));
        Ok(())
    }

    /// # Errors
    /// Returns an error if the backing file cannot be written.
    pub fn remove_raw(&self, source: TabId, key: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if !entries.0.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.0.remove(key);
        self.persist(&next)?;
        *entries = next;
        drop(entries);
        self.announce(source, Some(key));
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &Entries) -> Result<(), StoreError> {
        let Some(path) = &self.shared.path else {
            return Ok(());
        };
        let staging = path.with_extension("tmp");
        fs::write(&staging, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    fn announce(&self, source: TabId, key: Option<&str>) {
        // No receivers just means no other tab is open.
        let _ = self.shared.events.send(StorageEvent {
            key: key.map(str::to_string),
            source,
        });
    }
}

/// One tab's view of the origin storage, addressed by role slot.
#[derive(Debug, Clone)]
pub struct SessionStore {
    storage: OriginStorage,
    tab: TabId,
}

impl SessionStore {
    #[must_use]
    pub const fn tab(&self) -> TabId {
        self.tab
    }

    #[must_use]
    pub const fn storage(&self) -> &OriginStorage {
        &self.storage
    }

    /// Token held in `slot`. Empty values and sentinel strings read as absent.
    #[must_use]
    pub fn get(&self, slot: Role) -> Option<String> {
        self.storage
            .get_raw(slot.storage_key())
            .filter(|value| !is_absent(value))
    }

    /// # Errors
    /// Returns an error if the backing file cannot be written.
    pub fn set(&self, slot: Role, token: &str) -> Result<(), StoreError> {
        self.storage.set_raw(self.tab, slot.storage_key(), token)
    }

    /// # Errors
    /// Returns an error if the backing file cannot be written.
    pub fn clear(&self, slot: Role) -> Result<(), StoreError> {
        self.storage.remove_raw(self.tab, slot.storage_key())
    }

    /// Remove every role slot. Unrelated keys are left alone.
    ///
    /// # Errors
    /// Returns the first write failure.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        Role::ALL.into_iter().try_for_each(|slot| self.clear(slot))
    }

    /// Change notifications from other tabs of this origin.
    #[must_use]
    pub fn subscribe(&self) -> StoreEvents {
        StoreEvents {
            receiver: self.storage.shared.events.subscribe(),
            tab: self.tab,
        }
    }
}

/// Receiver that skips the owning tab's own writes.
#[derive(Debug)]
pub struct StoreEvents {
    receiver: broadcast::Receiver<StorageEvent>,
    tab: TabId,
}

impl StoreEvents {
    /// Next change from another tab. Returns `None` once the storage is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.source == self.tab => {}
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Storage listener lagged, forcing a full re-read");
                    return Some(StorageEvent {
                        key: None,
                        source: self.tab,
                    });
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Discard everything already queued, returning how many foreign events
    /// were dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.source == self.tab => {}
                Ok(_) | Err(TryRecvError::Lagged(_)) => drained += 1,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
            }
        }
    }
}

/// Whether a stored value means "no token".
#[must_use]
pub fn is_absent(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || ABSENT_SENTINELS.contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_read_as_absent() -> Result<(), StoreError> {
        let storage = OriginStorage::in_memory();
        let store = storage.store_for(TabId::new());
        for sentinel in ["undefined", "null", "", "   "] {
            storage.set_raw(TabId::new(), Role::User.storage_key(), sentinel)?;
            assert_eq!(store.get(Role::User), None, "{sentinel:?}");
        }
        store.set(Role::User, "tok")?;
        assert_eq!(store.get(Role::User).as_deref(), Some("tok"));
        Ok(())
    }

    #[test]
    fn slots_use_distinct_keys() -> Result<(), StoreError> {
        let storage = OriginStorage::in_memory();
        let store = storage.store_for(TabId::new());
        store.set(Role::Admin, "a")?;
        store.set(Role::Doctor, "d")?;
        assert_eq!(storage.get_raw("aToken").as_deref(), Some("a"));
        assert_eq!(storage.get_raw("dToken").as_deref(), Some("d"));

        store.clear(Role::Admin)?;
        assert_eq!(store.get(Role::Admin), None);
        assert_eq!(store.get(Role::Doctor).as_deref(), Some("d"));
        Ok(())
    }

    #[test]
    fn clear_all_keeps_unrelated_keys() -> Result<(), StoreError> {
        let storage = OriginStorage::in_memory();
        let store = storage.store_for(TabId::new());
        store.set(Role::Admin, "a")?;
        storage.set_raw(store.tab(), "theme", "dark")?;
        store.clear_all()?;
        assert_eq!(store.get(Role::Admin), None);
        assert_eq!(storage.get_raw("theme").as_deref(), Some("dark"));
        Ok(())
    }

    #[tokio::test]
    async fn events_reach_other_tabs_only() -> Result<(), StoreError> {
        let storage = OriginStorage::in_memory();
        let writer = storage.store_for(TabId::new());
        let reader = storage.store_for(TabId::new());
        let mut own = writer.subscribe();
        let mut other = reader.subscribe();

        writer.set(Role::Doctor, "d")?;
        let event = other.recv().await;
        assert_eq!(event.as_ref().and_then(StorageEvent::slot), Some(Role::Doctor));
        assert_eq!(event.map(|event| event.source), Some(writer.tab()));
        assert_eq!(own.drain(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_values_send_no_event() -> Result<(), StoreError> {
        let storage = OriginStorage::in_memory();
        let writer = storage.store_for(TabId::new());
        let mut other = storage.store_for(TabId::new()).subscribe();

        writer.set(Role::User, "same")?;
        writer.set(Role::User, "same")?;
        writer.clear(Role::Admin)?;
        assert_eq!(other.drain(), 1);
        Ok(())
    }

    #[test]
    fn open_persists_across_instances() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("console.json");

        let storage = OriginStorage::open(&path)?;
        storage.store_for(TabId::new()).set(Role::Admin, "persisted")?;
        drop(storage);

        let reopened = OriginStorage::open(&path)?;
        assert_eq!(
            reopened.store_for(TabId::new()).get(Role::Admin).as_deref(),
            Some("persisted")
        );
        Ok(())
    }

    #[test]
    fn failed_write_leaves_previous_value() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("origin");
        fs::create_dir(&nested)?;
        let storage = OriginStorage::open(nested.join("console.json"))?;
        let store = storage.store_for(TabId::new());
        store.set(Role::Admin, "first")?;

        fs::remove_dir_all(&nested)?;
        assert!(matches!(store.set(Role::Admin, "second"), Err(StoreError::Io(_))));
        assert_eq!(store.get(Role::Admin).as_deref(), Some("first"));
        assert!(store.clear(Role::Admin).is_err());
        assert_eq!(store.get(Role::Admin).as_deref(), Some("first"));
        Ok(())
    }

    #[test]
    fn open_rejects_corrupt_file() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json")?;
        assert!(matches!(OriginStorage::open(&path), Err(StoreError::Json(_))));
        Ok(())
    }
}
