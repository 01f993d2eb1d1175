//! Where credentials live between requests.
//!
//! Two scopes mirror "remember me": `Persistent` survives restarts, `Session`
//! lasts as long as the process. Readers always prefer `Persistent`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Persistent,
    Session,
}

impl Scope {
    /// Lookup order used by every reader
    pub const ALL: [Scope; 2] = [Scope::Persistent, Scope::Session];

    pub fn other(self) -> Scope {
        match self {
            Scope::Persistent => Scope::Session,
            Scope::Session => Scope::Persistent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    AccessToken,
    RefreshToken,
    CurrentUser,
    CurrentUserEmail,
    CurrentUserName,
    IsAdmin,
    /// Single-token key written by older clients; never read for requests, only cleared
    LegacyToken,
}

impl StorageKey {
    pub const ALL: [StorageKey; 7] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::CurrentUser,
        StorageKey::CurrentUserEmail,
        StorageKey::CurrentUserName,
        StorageKey::IsAdmin,
        StorageKey::LegacyToken,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::AccessToken => "accessToken",
            StorageKey::RefreshToken => "refreshToken",
            StorageKey::CurrentUser => "currentUser",
            StorageKey::CurrentUserEmail => "currentUserEmail",
            StorageKey::CurrentUserName => "currentUserName",
            StorageKey::IsAdmin => "is_admin",
            StorageKey::LegacyToken => "token",
        }
    }
}

/// Key/value storage split into two scopes
pub trait CredentialStore: Send + Sync {
    fn get(&self, scope: Scope, key: StorageKey) -> Option<String>;

    fn set(&self, scope: Scope, key: StorageKey, value: &str) -> Result<()>;

    fn clear(&self, scope: Scope, key: StorageKey) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Both scopes held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(Scope, StorageKey), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, scope: Scope, key: StorageKey) -> Option<String> {
        lock(&self.values).get(&(scope, key)).cloned()
    }

    fn set(&self, scope: Scope, key: StorageKey, value: &str) -> Result<()> {
        lock(&self.values).insert((scope, key), value.to_string());
        Ok(())
    }

    fn clear(&self, scope: Scope, key: StorageKey) -> Result<()> {
        lock(&self.values).remove(&(scope, key));
        Ok(())
    }
}

/// Persistent scope in a JSON file, session scope in memory.
///
/// The file is re-read on every access so a login or logout from another
/// process is picked up by the next request.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    session: MemoryStore,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: MemoryStore::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write then rename; readers never see a partial file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut values = self.load()?;
        if apply(&mut values) {
            self.save(&values)?;
        }
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, scope: Scope, key: StorageKey) -> Option<String> {
        match scope {
            Scope::Session => self.session.get(scope, key),
            Scope::Persistent => match self.load() {
                Ok(mut values) => values.remove(key.as_str()),
                Err(err) => {
                    warn!("Could not read {}: {}", self.path.display(), err);
                    None
                }
            },
        }
    }

    fn set(&self, scope: Scope, key: StorageKey, value: &str) -> Result<()> {
        match scope {
            Scope::Session => self.session.set(scope, key, value),
            Scope::Persistent => self.update(|values| {
                values.insert(key.as_str().to_string(), value.to_string());
                true
            }),
        }
    }

    fn clear(&self, scope: Scope, key: StorageKey) -> Result<()> {
        match scope {
            Scope::Session => self.session.clear(scope, key),
            Scope::Persistent => {
                if !self.path.exists() {
                    return Ok(());
                }
                self.update(|values| values.remove(key.as_str()).is_some())
            }
        }
    }
}
