use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("token store unavailable: {0}")]
    Unavailable(String),
    #[error("token store contents are corrupt: {0}")]
    Corrupt(String),
    #[error("token store backend failure: {0}")]
    Backend(String),
}

/// Durable per-user home for the sync continuation token and filter id.
///
/// The sync engine never calls a store concurrently for the same user;
/// implementations only need last-write-wins semantics.
pub trait TokenStore: Send + Sync {
    fn load_next_batch(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    fn save_next_batch(&self, user_id: &str, next_batch: &str) -> Result<(), StoreError>;

    fn load_filter_id(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    fn save_filter_id(&self, user_id: &str, filter_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_batch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_id: Option<String>,
}

/// Process-local store. Tokens are forgotten on restart, so every new
/// process negotiates a fresh filter and starts from the live tail.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    data: Arc<RwLock<HashMap<String, UserTokens>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored for `user_id`.
    pub fn tokens(&self, user_id: &str) -> UserTokens {
        self.data
            .read()
            .map(|data| data.get(user_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn update(
        &self,
        user_id: &str,
        apply: impl FnOnce(&mut UserTokens),
    ) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        apply(data.entry(user_id.to_owned()).or_default());
        Ok(())
    }

    fn read<T>(
        &self,
        user_id: &str,
        pick: impl FnOnce(&UserTokens) -> T,
    ) -> Result<Option<T>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(user_id).map(pick))
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load_next_batch(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read(user_id, |t| t.next_batch.clone())?.flatten())
    }

    fn save_next_batch(&self, user_id: &str, next_batch: &str) -> Result<(), StoreError> {
        self.update(user_id, |t| t.next_batch = Some(next_batch.to_owned()))
    }

    fn load_filter_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read(user_id, |t| t.filter_id.clone())?.flatten())
    }

    fn save_filter_id(&self, user_id: &str, filter_id: &str) -> Result<(), StoreError> {
        self.update(user_id, |t| t.filter_id = Some(filter_id.to_owned()))
    }
}

/// Store backed by a single JSON document keyed by user id.
///
/// Every save rewrites the document through a sibling temp file and a rename,
/// so a crash mid-write leaves the previous document intact.
///
/// All calls do blocking `std::fs` I/O. The sync engine runs them on tokio's
/// blocking pool; other async callers should use `spawn_blocking` too.
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_document(&self) -> Result<BTreeMap<String, UserTokens>, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(map_io_error("read", &self.path, err)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&raw)
            .map_err(|err| StoreError::Corrupt(format!("{}: {err}", self.path.display())))
    }

    fn write_document(&self, document: &BTreeMap<String, UserTokens>) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(document)
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| map_io_error("create", parent, err))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, encoded).map_err(|err| map_io_error("write", &tmp_path, err))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| map_io_error("rename", &self.path, err))
    }

    fn update(&self, user_id: &str, apply: impl FnOnce(&mut UserTokens)) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        let mut document = self.load_document()?;
        apply(document.entry(user_id.to_owned()).or_default());
        self.write_document(&document)?;
        debug!(path = %self.path.display(), user_id, "token store updated");
        Ok(())
    }

    fn user_tokens(&self, user_id: &str) -> Result<UserTokens, StoreError> {
        Ok(self.load_document()?.remove(user_id).unwrap_or_default())
    }
}

impl TokenStore for FileTokenStore {
    fn load_next_batch(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.user_tokens(user_id)?.next_batch)
    }

    fn save_next_batch(&self, user_id: &str, next_batch: &str) -> Result<(), StoreError> {
        self.update(user_id, |t| t.next_batch = Some(next_batch.to_owned()))
    }

    fn load_filter_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.user_tokens(user_id)?.filter_id)
    }

    fn save_filter_id(&self, user_id: &str, filter_id: &str) -> Result<(), StoreError> {
        self.update(user_id, |t| t.filter_id = Some(filter_id.to_owned()))
    }
}

fn map_io_error(operation: &str, path: &Path, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            StoreError::Unavailable(format!("{operation} {}: {err}", path.display()))
        }
        _ => StoreError::Backend(format!("{operation} {}: {err}", path.display())),
    }
}
