//! Single-file driver.
//!
//! The whole map is kept in memory and rewritten on every mutation, which
//! is acceptable at the expected marker counts. Crash safety comes from
//! writing a temp sibling and renaming it over the live file; rename is
//! atomic on the filesystems we deploy on, so a reader never observes a
//! partially written map.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::{StateStore, StoreError};

pub struct FileStore {
    path: PathBuf,
    tmp_path: PathBuf,
    map: RwLock<BTreeMap<String, String>>,
    // Serializes snapshot+rename so a stale snapshot can never land last.
    flush: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let map = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| StoreError::Corrupt(format!("{}: {err}", path.display())))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        let mut tmp: OsString = path.clone().into_os_string();
        tmp.push(".tmp");

        debug!(path = %path.display(), "file state store opened");

        Ok(Self {
            path,
            tmp_path: PathBuf::from(tmp),
            map: RwLock::new(map),
            flush: tokio::sync::Mutex::new(()),
        })
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.flush.lock().await;

        let bytes = {
            let map = self.map.read();
            serde_json::to_vec_pretty(&*map)
                .map_err(|err| StoreError::Corrupt(err.to_string()))?
        };

        tokio::fs::write(&self.tmp_path, &bytes).await?;
        tokio::fs::rename(&self.tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.map.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.map.write().insert(key.to_string(), value.to_string());
        self.flush().await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.map.write().remove(key).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .map
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
