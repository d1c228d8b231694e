//! Durable client storage for the minimal principal identity.
//!
//! SYSTEM CONTEXT
//! ==============
//! The browser app keeps a small JSON object under a fixed localStorage key
//! so the user's name and avatar survive a reload. Here the same contract is
//! a string key/value store with a file-backed and an in-memory backend.
//!
//! INVARIANTS
//! ==========
//! Access and refresh tokens are never written. [`PersistedIdentity`] has no
//! field that could hold one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::Principal;

/// Fixed key for the persisted identity.
pub const USER_STORAGE_KEY: &str = "user-storage";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// String key/value store with localStorage semantics.
pub trait DurableStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Vec<String>;
}

/// Load a JSON value stored under `key`.
pub fn load_json<T: DeserializeOwned>(storage: &dyn DurableStorage, key: &str) -> Option<T> {
    let raw = storage.get_item(key)?;
    serde_json::from_str(&raw).ok()
}

/// Save a JSON value under `key`.
///
/// # Errors
///
/// Returns an error if encoding or the backend write fails.
pub fn save_json<T: Serialize>(storage: &dyn DurableStorage, key: &str, value: &T) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    storage.set_item(key, &raw)
}

// =============================================================================
// MEMORY BACKEND
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

// =============================================================================
// FILE BACKEND
// =============================================================================

/// All keys live in one JSON object file, rewritten through a temp file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "storage file unreadable; starting empty");
                BTreeMap::new()
            }
        }
    }

    fn write_all(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_all();
        f(&mut map);
        self.write_all(&map)
    }
}

impl DurableStorage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_all().remove(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|map| {
            map.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.update(|map| {
            map.remove(key);
        })
    }

    fn keys(&self) -> Vec<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_all().into_keys().collect()
    }
}

// =============================================================================
// PERSISTED IDENTITY
// =============================================================================

/// Minimal identity that survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIdentity {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: String,
}

impl From<&Principal> for PersistedIdentity {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.clone(),
            email: p.email.clone(),
            name: p.name.clone(),
            avatar_url: p.avatar_url.clone(),
            role: p.role.clone(),
        }
    }
}

/// Reads and writes the persisted identity. Failures are logged, not raised:
/// persistence is a convenience and must never block authentication.
#[derive(Clone)]
pub struct IdentityStore {
    storage: Arc<dyn DurableStorage>,
}

impl IdentityStore {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self { storage }
    }

    pub fn save(&self, principal: &Principal) {
        let identity = PersistedIdentity::from(principal);
        if let Err(e) = save_json(self.storage.as_ref(), USER_STORAGE_KEY, &identity) {
            warn!(error = %e, user_id = %principal.id, "failed to persist identity");
        }
    }

    #[must_use]
    pub fn load(&self) -> Option<PersistedIdentity> {
        load_json(self.storage.as_ref(), USER_STORAGE_KEY)
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove_item(USER_STORAGE_KEY) {
            warn!(error = %e, "failed to clear persisted identity");
        }
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn DurableStorage> {
        &self.storage
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
