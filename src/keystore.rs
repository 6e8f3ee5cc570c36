//! Client key file: username -> `{s, N, v}`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ClientError;
use crate::fiat_shamir::KeyMaterial;
use crate::registry::write_atomically;

#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All saved identities. A missing or corrupt file reads as empty.
    pub fn load(&self) -> BTreeMap<String, KeyMaterial> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %err, "failed to read key file");
                }
                return BTreeMap::new();
            }
        };
        let mut keys: BTreeMap<String, KeyMaterial> = match serde_json::from_str(&text) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "corrupt key file ignored");
                return BTreeMap::new();
            }
        };
        for (username, key) in keys.iter_mut() {
            key.username.clone_from(username);
        }
        keys
    }

    pub fn get(&self, username: &str) -> Option<KeyMaterial> {
        self.load().remove(username)
    }

    /// Inserts or replaces `key` and rewrites the file.
    pub fn save(&self, key: &KeyMaterial) -> Result<(), ClientError> {
        let mut keys = self.load();
        keys.insert(key.username.clone(), key.clone());
        write_atomically(&self.path, &keys).map_err(|source| ClientError::KeyStore {
            path: self.path.clone(),
            source,
        })?;
        debug!(username = %key.username, path = %self.path.display(), "key saved");
        Ok(())
    }

    pub fn remove(&self, username: &str) -> Result<(), ClientError> {
        let mut keys = self.load();
        if keys.remove(username).is_none() {
            return Ok(());
        }
        write_atomically(&self.path, &keys).map_err(|source| ClientError::KeyStore {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiat_shamir::Modulus;
    use num_bigint::BigUint;
    use tempfile::tempdir;

    fn modulus() -> Modulus {
        Modulus::from_primes(&BigUint::from(1_000_000_007u64), &BigUint::from(998_244_353u64))
            .unwrap()
    }

    #[test]
    fn saved_keys_are_loaded_with_usernames() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("keys.json"));
        let alice = KeyMaterial::generate("alice", &modulus());
        let bob = KeyMaterial::generate("bob", &modulus());
        store.save(&alice).unwrap();
        store.save(&bob).unwrap();

        assert_eq!(store.get("alice"), Some(alice));
        assert_eq!(store.load().len(), 2);

        let text = fs::read_to_string(store.path()).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(raw["bob"]["s"].is_string());
        assert!(raw["bob"]["N"].is_string());
    }

    #[test]
    fn saving_same_user_overwrites() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("keys.json"));
        store.save(&KeyMaterial::generate("alice", &modulus())).unwrap();
        let replacement = KeyMaterial::generate("alice", &modulus());
        store.save(&replacement).unwrap();

        assert_eq!(store.load().len(), 1);
        assert_eq!(store.get("alice"), Some(replacement));

        store.remove("alice").unwrap();
        assert!(store.get("alice").is_none());
    }

    #[test]
    fn missing_or_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.json");
        assert!(KeyStore::new(&path).load().is_empty());

        fs::write(&path, "[1, 2").unwrap();
        assert!(KeyStore::new(&path).load().is_empty());
    }
}
