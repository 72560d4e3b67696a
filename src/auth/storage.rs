//! Durable session storage: two string entries under fixed keys
//!
//! The token and the serialized user are written together and read back
//! together. Anything missing, empty or unparseable loads as "no session".
//! Expiry is never judged here; the backend decides whether a token is valid.

use super::types::User;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

const SESSION_FILE: &str = "session.json";
const SESSION_TMP_FILE: &str = "session.json.tmp";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Key-value persistence behind the [`SessionStore`]
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write all entries at once; no reader may observe a subset
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Remove the keys; absent keys are not an error
    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError>;
}

/// Process-local backend, lost on exit
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// File backend: one JSON object of string entries in the data directory.
///
/// Writes go to a temp file that is renamed over the real one, so both
/// entries change in a single step.
pub struct FileBackend {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Session storage at {}", dir.join(SESSION_FILE).display());
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StorageError> {
        let path = self.path();
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str::<HashMap<String, String>>(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                // Corrupted file: drop it so the next write starts clean
                error!("Failed to parse session file ({}), removing it", e);
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove corrupt session file: {}", e);
                }
                Ok(HashMap::new())
            }
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        let path = self.path();
        if map.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }

        let tmp = self.dir.join(SESSION_TMP_FILE);
        let json = serde_json::to_string(map)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        self.write_map(&map)
    }

    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        for key in keys {
            map.remove(*key);
        }
        self.write_map(&map)
    }
}

/// Durable mirror of the current session
pub struct SessionStore {
    backend: Box<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// File-backed store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self::new(FileBackend::new(dir.as_ref())?))
    }

    /// Write token and user together
    pub fn save(&self, token: &str, user: &User) -> Result<(), StorageError> {
        let user_json = serde_json::to_string(user)?;
        self.backend
            .set_all(&[(TOKEN_KEY, token), (USER_KEY, user_json.as_str())])?;
        info!(
            "Stored session for {} (token length: {} chars)",
            user.email,
            token.len()
        );
        Ok(())
    }

    /// Read back both entries, or `None` if either is missing or malformed
    pub fn load(&self) -> Option<(String, User)> {
        let token = match self.backend.get(TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                debug!("No stored token");
                return None;
            }
            Err(e) => {
                warn!("Failed to read stored token: {}", e);
                return None;
            }
        };

        let raw_user = match self.backend.get(USER_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("Stored token has no matching user record");
                return None;
            }
            Err(e) => {
                warn!("Failed to read stored user: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<User>(&raw_user) {
            Ok(user) if user.is_valid() => {
                info!("Loaded stored session for {}", user.email);
                Some((token, user))
            }
            Ok(_) => {
                warn!("Stored user record has no email, ignoring");
                None
            }
            Err(e) => {
                warn!("Failed to parse stored user: {}", e);
                None
            }
        }
    }

    /// Remove both entries; clearing an empty store is fine
    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.remove_all(&[TOKEN_KEY, USER_KEY])?;
        debug!("Session storage cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_user() -> User {
        User {
            id: 1,
            email: "a@b.com".to_string(),
            nickname: Some("Ann".to_string()),
            created_at: Some("2024-01-01T00:00:00".to_string()),
            plan: None,
        }
    }

    #[test]
    fn test_memory_roundtrip() {
        let store = SessionStore::in_memory();
        store.save("tkn1", &make_user()).unwrap();
        let (token, user) = store.load().unwrap();
        assert_eq!(token, "tkn1");
        assert_eq!(user, make_user());
    }

    #[test]
    fn test_file_roundtrip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::open(dir.path()).unwrap();
            store.save("tkn1", &make_user()).unwrap();
        }
        let reopened = SessionStore::open(dir.path()).unwrap();
        let (token, user) = reopened.load().unwrap();
        assert_eq!(token, "tkn1");
        assert_eq!(user.id, 1);
        assert!(!dir.path().join(SESSION_TMP_FILE).exists());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.save("tkn1", &make_user()).unwrap();

        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
        assert!(store.load().is_none());
        assert!(!dir.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn test_empty_store_loads_none() {
        assert!(SessionStore::in_memory().load().is_none());
    }

    #[test]
    fn test_token_without_user_is_absent() {
        let backend = MemoryBackend::new();
        backend.set_all(&[(TOKEN_KEY, "tkn1")]).unwrap();
        assert!(SessionStore::new(backend).load().is_none());
    }

    #[test]
    fn test_user_without_token_is_absent() {
        let backend = MemoryBackend::new();
        let user_json = serde_json::to_string(&make_user()).unwrap();
        backend.set_all(&[(USER_KEY, user_json.as_str())]).unwrap();
        assert!(SessionStore::new(backend).load().is_none());
    }

    #[test]
    fn test_empty_token_is_absent() {
        let backend = MemoryBackend::new();
        let user_json = serde_json::to_string(&make_user()).unwrap();
        backend
            .set_all(&[(TOKEN_KEY, ""), (USER_KEY, user_json.as_str())])
            .unwrap();
        assert!(SessionStore::new(backend).load().is_none());
    }

    #[test]
    fn test_malformed_user_is_absent() {
        let backend = MemoryBackend::new();
        backend
            .set_all(&[(TOKEN_KEY, "tkn1"), (USER_KEY, "{not json")])
            .unwrap();
        assert!(SessionStore::new(backend).load().is_none());
    }

    #[test]
    fn test_user_without_email_is_absent() {
        let backend = MemoryBackend::new();
        backend
            .set_all(&[(TOKEN_KEY, "tkn1"), (USER_KEY, r#"{"id": 1, "email": ""}"#)])
            .unwrap();
        assert!(SessionStore::new(backend).load().is_none());
    }

    #[test]
    fn test_corrupt_file_is_absent_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        fs::write(&path, "\u{0}garbage").unwrap();

        let store = SessionStore::open(dir.path()).unwrap();
        assert!(store.load().is_none());
        assert!(!path.exists());

        // Store remains usable afterwards
        store.save("tkn2", &make_user()).unwrap();
        assert_eq!(store.load().unwrap().0, "tkn2");
    }

    #[test]
    fn test_file_keeps_foreign_keys_on_clear() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.set_all(&[("theme", "dark")]).unwrap();

        let store = SessionStore::new(backend);
        store.save("tkn1", &make_user()).unwrap();
        store.clear().unwrap();

        let backend = FileBackend::new(dir.path()).unwrap();
        assert_eq!(backend.get("theme").unwrap().as_deref(), Some("dark"));
        assert!(backend.get(TOKEN_KEY).unwrap().is_none());
    }
}
