//! Token Storage - durable client-side session state
//!
//! Access token, refresh token and the serialized current-user record are
//! stored as independent entries so each can be removed on its own; `clear`
//! removes all of them together.

use cbts_core::{storage_error, CbtsResult, CurrentUser};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Persisted entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    AccessToken,
    RefreshToken,
    CurrentUser,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::CurrentUser,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            StorageKey::AccessToken => "access_token",
            StorageKey::RefreshToken => "refresh_token",
            StorageKey::CurrentUser => "current_user.json",
        }
    }
}

/// Durable key/value storage for session entries
pub trait TokenStore: Send + Sync {
    fn load(&self, key: StorageKey) -> CbtsResult<Option<String>>;

    fn save(&self, key: StorageKey, value: &str) -> CbtsResult<()>;

    fn remove(&self, key: StorageKey) -> CbtsResult<()>;

    /// Remove every entry; keeps going past individual failures
    fn clear(&self) -> CbtsResult<()> {
        let mut first_error = None;
        for key in StorageKey::ALL {
            if let Err(e) = self.remove(key) {
                warn!("Failed to remove {:?} from token store: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Session entries as read back from a [`TokenStore`]
#[derive(Debug, Clone, Default)]
pub struct PersistedSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<CurrentUser>,
    /// A user entry exists, even if it could not be decoded
    pub user_entry_present: bool,
}

impl PersistedSession {
    /// Read all entries; an unreadable user record is dropped rather than fatal
    pub fn load(store: &dyn TokenStore) -> CbtsResult<Self> {
        let access_token = store.load(StorageKey::AccessToken)?;
        let refresh_token = store.load(StorageKey::RefreshToken)?;
        let raw_user = store.load(StorageKey::CurrentUser)?;
        let user_entry_present = raw_user.is_some();
        let user = match raw_user {
            Some(raw) => match serde_json::from_str::<CurrentUser>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!("Discarding unreadable persisted user record: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            access_token,
            refresh_token,
            user,
            user_entry_present,
        })
    }

    /// Entries that may not exist without an access token
    pub fn has_orphans(&self) -> bool {
        self.access_token.is_none() && (self.refresh_token.is_some() || self.user_entry_present)
    }
}

/// File-per-entry store rooted at the configured session directory
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> CbtsResult<Self> {
        let dir = dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&dir).map_err(|e| {
            storage_error!(
                format!("Failed to create session directory {}", dir.display()),
                "file_token_store",
                e
            )
        })?;

        info!("Token store initialized at: {}", dir.display());

        Ok(Self { dir })
    }

    fn path_for(&self, key: StorageKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, key: StorageKey) -> CbtsResult<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let content = content.trim();
                Ok((!content.is_empty()).then(|| content.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error!(
                format!("Failed to read {}", path.display()),
                "file_token_store",
                e
            )),
        }
    }

    fn save(&self, key: StorageKey, value: &str) -> CbtsResult<()> {
        let path = self.path_for(key);
        write_private(&path, value).map_err(|e| {
            storage_error!(
                format!("Failed to write {}", path.display()),
                "file_token_store",
                e
            )
        })?;

        debug!("Saved {:?} to {}", key, path.display());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> CbtsResult<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error!(
                format!("Failed to remove {}", path.display()),
                "file_token_store",
                e
            )),
        }
    }
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<StorageKey, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().map(|e| e.is_empty()).unwrap_or(true)
    }

    fn entries(&self) -> CbtsResult<std::sync::MutexGuard<'_, HashMap<StorageKey, String>>> {
        self.entries
            .lock()
            .map_err(|_| storage_error!("Token store lock poisoned", "memory_token_store"))
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, key: StorageKey) -> CbtsResult<Option<String>> {
        Ok(self.entries()?.get(&key).cloned())
    }

    fn save(&self, key: StorageKey, value: &str) -> CbtsResult<()> {
        self.entries()?.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> CbtsResult<()> {
        self.entries()?.remove(&key);
        Ok(())
    }
}

/// Write `value` to a file only the owner can read, from creation on
fn write_private(path: &Path, value: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // `mode` only applies to new files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(value.as_bytes())
}
