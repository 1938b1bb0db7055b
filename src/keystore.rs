//! Identity key persistence: restrictive file permissions, generate a
//! fresh key on first run. Keys are addressed by name so more than one
//! identity can live side by side; `get_or_create_identity_key` is the
//! convenience every caller in this crate actually uses, built on top of
//! the name-keyed save/get/delete operations.

use std::path::{Path, PathBuf};

use zeroize::Zeroize;

use crate::noise::generate_static_keypair;

/// Name under which `get_or_create_identity_key` stores the one identity
/// key this crate's session manager loads.
pub const DEFAULT_IDENTITY_NAME: &str = "identity";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity key file at {0:?} is not 32 bytes")]
    CorruptKeyFile(PathBuf),
}

pub trait KeyStore: Send + Sync {
    /// Persists `key` under `name`, overwriting any key already stored
    /// there. Returns `true` on success.
    fn save_identity_key(&self, key: &[u8; 32], name: &str) -> Result<bool, KeyStoreError>;

    /// Loads the key stored under `name`, or `None` if nothing has been
    /// saved under that name yet.
    fn get_identity_key(&self, name: &str) -> Result<Option<[u8; 32]>, KeyStoreError>;

    /// Removes the key stored under `name`. Returns `true` if a key was
    /// present and removed, `false` if there was nothing to remove.
    fn delete_identity_key(&self, name: &str) -> Result<bool, KeyStoreError>;

    /// Whether a key is currently stored under `name`.
    fn verify_identity_key_exists(&self, name: &str) -> bool;

    /// Overwrites `bytes` in place. An explicit operation distinct from
    /// relying on a wrapper's `Drop`, for a caller that pulled key material
    /// into a plain buffer and wants to scrub it the moment it's done.
    fn secure_clear(bytes: &mut [u8]) {
        bytes.zeroize();
    }

    /// Loads the default identity key, generating and persisting one on
    /// first access.
    fn get_or_create_identity_key(&self) -> Result<[u8; 32], KeyStoreError> {
        if let Some(key) = self.get_identity_key(DEFAULT_IDENTITY_NAME)? {
            return Ok(key);
        }
        let (private, _public) = generate_static_keypair();
        self.save_identity_key(&private, DEFAULT_IDENTITY_NAME)?;
        Ok(private)
    }
}

/// Stores identity keys as flat files named `<name>.key` under a
/// directory, with `0o600` permissions on Unix.
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.key"))
    }
}

impl KeyStore for FileKeyStore {
    fn save_identity_key(&self, key: &[u8; 32], name: &str) -> Result<bool, KeyStoreError> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, key)?;
        restrict_permissions(&path)?;
        Ok(true)
    }

    fn get_identity_key(&self, name: &str) -> Result<Option<[u8; 32]>, KeyStoreError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)?;
        if data.len() != 32 {
            return Err(KeyStoreError::CorruptKeyFile(path));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&data);
        Ok(Some(key))
    }

    fn delete_identity_key(&self, name: &str) -> Result<bool, KeyStoreError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(false);
        }
        // Best-effort scrub before unlink; the file is short-lived and
        // small so a single overwrite pass is adequate here.
        let mut zeros = [0u8; 32];
        std::fs::write(&path, zeros)?;
        Self::secure_clear(&mut zeros);
        std::fs::remove_file(&path)?;
        Ok(true)
    }

    fn verify_identity_key_exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), KeyStoreError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), KeyStoreError> {
    Ok(())
}

/// In-memory keystore for tests; never touches the filesystem.
pub struct MemoryKeyStore {
    keys: std::sync::Mutex<std::collections::HashMap<String, [u8; 32]>>,
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self { keys: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl KeyStore for MemoryKeyStore {
    fn save_identity_key(&self, key: &[u8; 32], name: &str) -> Result<bool, KeyStoreError> {
        self.keys.lock().unwrap().insert(name.to_string(), *key);
        Ok(true)
    }

    fn get_identity_key(&self, name: &str) -> Result<Option<[u8; 32]>, KeyStoreError> {
        Ok(self.keys.lock().unwrap().get(name).copied())
    }

    fn delete_identity_key(&self, name: &str) -> Result<bool, KeyStoreError> {
        Ok(self.keys.lock().unwrap().remove(name).is_some())
    }

    fn verify_identity_key_exists(&self, name: &str) -> bool {
        self.keys.lock().unwrap().contains_key(name)
    }
}
