use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::fiat_shamir::Modulus;
use crate::message::decimal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(with = "decimal")]
    pub v: BigUint,
    #[serde(default)]
    pub successful_logins: u64,
    #[serde(default)]
    pub login_attempts: u64,
}

/// Durable username -> public value map. Every mutation rewrites the whole
/// file.
#[derive(Debug)]
pub struct UserRegistry {
    path: PathBuf,
    modulus: Modulus,
    users: RwLock<BTreeMap<String, UserRecord>>,
}

impl UserRegistry {
    /// Loads the registry at `path`. Missing or unreadable files give an
    /// empty registry.
    pub fn open(path: impl Into<PathBuf>, modulus: Modulus) -> Self {
        let path = path.into();
        let users = load(&path);
        info!(path = %path.display(), users = users.len(), "user registry loaded");
        Self {
            path,
            modulus,
            users: RwLock::new(users),
        }
    }

    pub fn register(&self, username: &str, v: BigUint) -> Result<(), RegistryError> {
        if username.is_empty() {
            return Err(RegistryError::EmptyUsername);
        }
        if !self.modulus.contains_public_value(&v) {
            return Err(RegistryError::InvalidPublicValue);
        }

        let mut users = self.write();
        if users.contains_key(username) {
            return Err(RegistryError::AlreadyExists(username.to_string()));
        }
        users.insert(
            username.to_string(),
            UserRecord {
                v,
                successful_logins: 0,
                login_attempts: 0,
            },
        );

        if let Err(err) = self.persist(&users) {
            users.remove(username);
            return Err(err);
        }
        info!(username, "user registered");
        Ok(())
    }

    pub fn lookup(&self, username: &str) -> Result<UserRecord, RegistryError> {
        self.read()
            .get(username)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(username.to_string()))
    }

    pub fn record_attempt(&self, username: &str) -> Result<(), RegistryError> {
        self.update(username, |record| record.login_attempts += 1)
    }

    pub fn record_success(&self, username: &str) -> Result<(), RegistryError> {
        self.update(username, |record| record.successful_logins += 1)
    }

    pub fn list(&self) -> Vec<(String, UserRecord)> {
        self.read()
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // The in-memory change is kept even when persisting fails.
    fn update(
        &self,
        username: &str,
        apply: impl FnOnce(&mut UserRecord),
    ) -> Result<(), RegistryError> {
        let mut users = self.write();
        let record = users
            .get_mut(username)
            .ok_or_else(|| RegistryError::NotFound(username.to_string()))?;
        apply(record);
        self.persist(&users)
    }

    fn persist(&self, users: &BTreeMap<String, UserRecord>) -> Result<(), RegistryError> {
        write_atomically(&self.path, users).map_err(|source| RegistryError::Persist {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "user registry saved");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, UserRecord>> {
        self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, UserRecord>> {
        self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load(path: &Path) -> BTreeMap<String, UserRecord> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no user registry found, starting empty");
            return BTreeMap::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read user registry, starting empty");
            return BTreeMap::new();
        }
    };
    if text.trim().is_empty() {
        return BTreeMap::new();
    }
    serde_json::from_str(&text).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "corrupt user registry, starting empty");
        BTreeMap::new()
    })
}

/// Serializes `value` as pretty JSON into a sibling temp file and renames it
/// over `path`.
pub(crate) fn write_atomically<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}
