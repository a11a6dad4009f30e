//! Persisted session keys.
//!
//! A small synchronous key/value surface, the same shape as browser local
//! storage. `FileStorage` keeps the map in one JSON file per app.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{ConnectError, ConnectResult};

pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> ConnectResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ConnectResult<()>;
    fn remove(&self, key: &str) -> ConnectResult<()>;

    fn remove_all(&self, keys: &[&str]) -> ConnectResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> ConnectResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| ConnectError::Storage("storage lock".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ConnectResult<()> {
        let mut entries = self.entries.lock().map_err(|_| ConnectError::Storage("storage lock".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ConnectResult<()> {
        let mut entries = self.entries.lock().map_err(|_| ConnectError::Storage("storage lock".into()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use file::FileStorage;

#[cfg(feature = "native")]
mod file {
    use super::*;
    use std::path::{Path, PathBuf};

    #[derive(Debug)]
    pub struct FileStorage {
        path: PathBuf,
        entries: Mutex<BTreeMap<String, String>>,
    }

    impl FileStorage {
        /// Open `<root>/<app>/data/session.json`, root from `BEECONNECT_ROOT`.
        pub fn load(app: &str) -> ConnectResult<Self> {
            Self::open(session_path(app))
        }

        pub fn open(path: impl Into<PathBuf>) -> ConnectResult<Self> {
            let path = path.into();
            let entries = if path.exists() {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| ConnectError::Storage(format!("session read: {e}")))?;
                serde_json::from_str(&raw)?
            } else {
                BTreeMap::new()
            };
            Ok(Self { path, entries: Mutex::new(entries) })
        }

        pub fn path(&self) -> &Path { &self.path }

        fn flush(&self, entries: &BTreeMap<String, String>) -> ConnectResult<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConnectError::Storage(format!("session mkdir: {e}")))?;
            }
            std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)
                .map_err(|e| ConnectError::Storage(format!("session write: {e}")))
        }
    }

    impl SessionStorage for FileStorage {
        fn get(&self, key: &str) -> ConnectResult<Option<String>> {
            let entries = self.entries.lock().map_err(|_| ConnectError::Storage("storage lock".into()))?;
            Ok(entries.get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> ConnectResult<()> {
            let mut entries = self.entries.lock().map_err(|_| ConnectError::Storage("storage lock".into()))?;
            entries.insert(key.to_string(), value.to_string());
            self.flush(&entries)
        }

        fn remove(&self, key: &str) -> ConnectResult<()> {
            let mut entries = self.entries.lock().map_err(|_| ConnectError::Storage("storage lock".into()))?;
            if entries.remove(key).is_some() {
                self.flush(&entries)?;
            }
            Ok(())
        }
    }

    fn session_path(app: &str) -> PathBuf {
        let root = std::env::var("BEECONNECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")));
        root.join(app).join("data").join("session.json")
    }
}
