//! Durable client-side state: identity, last room, cached preferences.
//!
//! Persistence goes through the [`SessionStore`] port — a key → whole-value
//! record store with replace semantics. Implementations must replace the
//! entire value on each write; there is no partial-field persistence, which
//! rules out read-modify-write races on individual fields.
//!
//! [`SessionStorage`] layers the typed records on top: the durable
//! [`ClientIdentity`], the last-known room id used by the resume protocol,
//! the question-count preference, and per-room cached join passwords.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EncoreError, Result};
use crate::protocol::{ClientId, RoomId, UserProfile};

// ── Port ────────────────────────────────────────────────────────────

/// Key → whole-value persistence port.
///
/// Reads happen on startup; every write replaces the full record for its key.
/// Implementations must be safe to share across tasks.
pub trait SessionStore: Send + Sync + 'static {
    /// Read the record stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the record stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the record stored under `key`. Removing a missing key is not
    /// an error.
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

// ── In-memory backend ───────────────────────────────────────────────

/// Volatile [`SessionStore`] backend. The default for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let records = self.records.lock().map_err(poisoned)?;
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut records = self.records.lock().map_err(poisoned)?;
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock().map_err(poisoned)?;
        records.remove(key);
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> EncoreError {
    EncoreError::Storage("session store mutex poisoned".into())
}

// ── File backend ────────────────────────────────────────────────────

/// [`SessionStore`] backend persisting all records to one JSON file.
///
/// The whole file is rewritten on each mutation via a temp-file rename, so a
/// crash mid-write never leaves a truncated store behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`, loading any existing records.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn flush(&self, records: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let records = self.records.lock().map_err(poisoned)?;
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut records = self.records.lock().map_err(poisoned)?;
        records.insert(key.to_string(), value.to_string());
        self.flush(&records)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock().map_err(poisoned)?;
        if records.remove(key).is_some() {
            self.flush(&records)?;
        }
        Ok(())
    }
}

// ── Typed records ───────────────────────────────────────────────────

/// The durable identity of this client device.
///
/// `client_id` is generated once on first run and never changes; the display
/// name and auth fields mutate on login/logout but the record is never
/// destroyed, only cleared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    pub client_id: ClientId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub auth_user: Option<UserProfile>,
}

impl ClientIdentity {
    fn fresh() -> Self {
        Self {
            client_id: Uuid::new_v4(),
            display_name: None,
            auth_token: None,
            auth_user: None,
        }
    }

    /// The name presented to other players: the explicit display name, the
    /// authenticated profile name, or `None` when neither is set.
    pub fn username(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or_else(|| self.auth_user.as_ref().map(|u| u.name.as_str()))
    }
}

mod keys {
    pub const IDENTITY: &str = "identity";
    pub const LAST_ROOM_ID: &str = "lastRoomId";
    pub const QUESTION_COUNT: &str = "questionCount";
    pub const ROOM_PASSWORD_PREFIX: &str = "roomPassword:";
}

/// Typed access to the records the synchronizer persists.
///
/// Wraps any [`SessionStore`]; every setter replaces the whole record.
pub struct SessionStorage {
    store: Box<dyn SessionStore>,
}

impl SessionStorage {
    pub fn new(store: impl SessionStore) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Load the persisted identity, creating and persisting a fresh one on
    /// first run.
    pub fn load_or_create_identity(&self) -> Result<ClientIdentity> {
        if let Some(raw) = self.store.get(keys::IDENTITY)? {
            match serde_json::from_str(&raw) {
                Ok(identity) => return Ok(identity),
                Err(e) => {
                    // Unreadable record: regenerate rather than brick the client.
                    tracing::warn!("persisted identity unreadable, regenerating: {e}");
                }
            }
        }
        let identity = ClientIdentity::fresh();
        self.save_identity(&identity)?;
        Ok(identity)
    }

    /// Persist the identity record, replacing it whole.
    pub fn save_identity(&self, identity: &ClientIdentity) -> Result<()> {
        let json = serde_json::to_string(identity)?;
        self.store.set(keys::IDENTITY, &json)
    }

    pub fn last_room_id(&self) -> Result<Option<RoomId>> {
        match self.store.get(keys::LAST_ROOM_ID)? {
            Some(raw) => Ok(raw.parse().ok()),
            None => Ok(None),
        }
    }

    pub fn set_last_room_id(&self, room_id: RoomId) -> Result<()> {
        self.store.set(keys::LAST_ROOM_ID, &room_id.to_string())
    }

    pub fn clear_last_room_id(&self) -> Result<()> {
        self.store.remove(keys::LAST_ROOM_ID)
    }

    pub fn question_count(&self) -> Result<Option<u32>> {
        match self.store.get(keys::QUESTION_COUNT)? {
            Some(raw) => Ok(raw.parse().ok()),
            None => Ok(None),
        }
    }

    pub fn set_question_count(&self, count: u32) -> Result<()> {
        self.store.set(keys::QUESTION_COUNT, &count.to_string())
    }

    /// Cached join password for a specific room, if one was saved.
    pub fn room_password(&self, room_id: RoomId) -> Result<Option<String>> {
        self.store
            .get(&format!("{}{room_id}", keys::ROOM_PASSWORD_PREFIX))
    }

    pub fn set_room_password(&self, room_id: RoomId, password: &str) -> Result<()> {
        self.store
            .set(&format!("{}{room_id}", keys::ROOM_PASSWORD_PREFIX), password)
    }
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage").finish_non_exhaustive()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_created_once_and_stable() {
        let storage = SessionStorage::new(MemoryStore::new());
        let first = storage.load_or_create_identity().unwrap();
        let second = storage.load_or_create_identity().unwrap();
        assert_eq!(first.client_id, second.client_id);
    }

    #[test]
    fn identity_auth_fields_clear_without_destroying_client_id() {
        let storage = SessionStorage::new(MemoryStore::new());
        let mut identity = storage.load_or_create_identity().unwrap();
        identity.auth_token = Some("bearer".into());
        identity.display_name = Some("Alice".into());
        storage.save_identity(&identity).unwrap();

        let mut reloaded = storage.load_or_create_identity().unwrap();
        assert_eq!(reloaded.auth_token.as_deref(), Some("bearer"));
        reloaded.auth_token = None;
        reloaded.auth_user = None;
        storage.save_identity(&reloaded).unwrap();

        let cleared = storage.load_or_create_identity().unwrap();
        assert_eq!(cleared.client_id, identity.client_id);
        assert!(cleared.auth_token.is_none());
    }

    #[test]
    fn username_prefers_display_name_over_profile() {
        let mut identity = ClientIdentity::fresh();
        assert!(identity.username().is_none());
        identity.auth_user = Some(UserProfile {
            id: "u1".into(),
            name: "Profile".into(),
            email: None,
        });
        assert_eq!(identity.username(), Some("Profile"));
        identity.display_name = Some("Nick".into());
        assert_eq!(identity.username(), Some("Nick"));
    }

    #[test]
    fn last_room_id_round_trips_and_clears() {
        let storage = SessionStorage::new(MemoryStore::new());
        assert!(storage.last_room_id().unwrap().is_none());
        let room = Uuid::from_u128(5);
        storage.set_last_room_id(room).unwrap();
        assert_eq!(storage.last_room_id().unwrap(), Some(room));
        storage.clear_last_room_id().unwrap();
        assert!(storage.last_room_id().unwrap().is_none());
    }

    #[test]
    fn room_passwords_are_scoped_per_room() {
        let storage = SessionStorage::new(MemoryStore::new());
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        storage.set_room_password(a, "hunter2").unwrap();
        assert_eq!(storage.room_password(a).unwrap().as_deref(), Some("hunter2"));
        assert!(storage.room_password(b).unwrap().is_none());
    }

    #[test]
    fn json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set("k", "v1").unwrap();
            store.set("k", "v2").unwrap();
        }
        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
        store.remove("k").unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get("k").unwrap().is_none());
    }
}
