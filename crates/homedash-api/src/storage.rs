//! Durable storage for session credentials.
//!
//! Two string values (access + refresh token) live under fixed keys. Where
//! they live is a deployment choice: [`MemoryStorage`] forgets them when the
//! owning process ends, [`KeyringStorage`] keeps them in the OS keyring
//! across restarts.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Error;

/// Storage key for the access credential.
pub const ACCESS_KEY: &str = "accessToken";

/// Storage key for the refresh credential.
pub const REFRESH_KEY: &str = "refreshToken";

/// Key/value backend for persisted credentials.
pub trait CredentialStorage: Send + Sync {
    /// Read a value. A missing key is `Ok(None)`, not an error.
    fn load(&self, key: &str) -> Result<Option<String>, Error>;

    fn store(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Delete a value. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// How long persisted credentials outlive the process.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageScope {
    /// Cleared when the owning process exits.
    #[default]
    Session,
    /// Survives restarts (OS keyring).
    Persistent,
}

impl StorageScope {
    /// Open the backend for this scope. `profile` namespaces keyring entries.
    pub fn open(self, profile: &str) -> Arc<dyn CredentialStorage> {
        match self {
            Self::Session => Arc::new(MemoryStorage::default()),
            Self::Persistent => Arc::new(KeyringStorage::new("homedash", profile)),
        }
    }
}

// ── MemoryStorage ────────────────────────────────────────────────────

/// Process-lifetime storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl CredentialStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, Error> {
        let values = self.values.read().expect("storage lock poisoned");
        Ok(values.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), Error> {
        self.values
            .write()
            .expect("storage lock poisoned")
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.values.write().expect("storage lock poisoned").remove(key);
        Ok(())
    }
}

// ── KeyringStorage ───────────────────────────────────────────────────

/// OS keyring storage. Entries are named `<profile>/<key>` under `service`.
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    service: String,
    profile: String,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            profile: profile.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, Error> {
        keyring::Entry::new(&self.service, &format!("{}/{key}", self.profile))
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

impl CredentialStorage for KeyringStorage {
    fn load(&self, key: &str) -> Result<Option<String>, Error> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| Error::Storage(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trip() {
        let storage = MemoryStorage::default();
        assert_eq!(storage.load(ACCESS_KEY).unwrap(), None);

        storage.store(ACCESS_KEY, "a1").unwrap();
        assert_eq!(storage.load(ACCESS_KEY).unwrap().as_deref(), Some("a1"));

        storage.remove(ACCESS_KEY).unwrap();
        storage.remove(ACCESS_KEY).unwrap();
        assert_eq!(storage.load(ACCESS_KEY).unwrap(), None);
    }

    #[test]
    fn scope_parses_from_config_strings() {
        assert_eq!("session".parse::<StorageScope>().unwrap(), StorageScope::Session);
        assert_eq!(
            "persistent".parse::<StorageScope>().unwrap(),
            StorageScope::Persistent
        );
        assert_eq!(StorageScope::Persistent.to_string(), "persistent");
    }
}
