//! Where bookmark records are kept.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Bookmark;
use crate::{Result, ScrapbookError};

/// Persists bookmark records.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn save(&self, bookmark: &Bookmark) -> Result<()>;

    async fn get(&self, uid: &str) -> Result<Option<Bookmark>>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Bookmark>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl BookmarkStore for MemoryStore {
    async fn save(&self, bookmark: &Bookmark) -> Result<()> {
        self.records.lock().insert(bookmark.uid.clone(), bookmark.clone());
        Ok(())
    }

    async fn get(&self, uid: &str) -> Result<Option<Bookmark>> {
        Ok(self.records.lock().get(uid).cloned())
    }
}

/// Writes one `{uid}.json` file per record.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, uid: &str) -> Result<PathBuf> {
        if uid.is_empty() || !uid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ScrapbookError::ConfigError(format!("invalid bookmark uid {uid:?}")));
        }
        Ok(self.dir.join(format!("{uid}.json")))
    }
}

#[async_trait]
impl BookmarkStore for JsonFileStore {
    async fn save(&self, bookmark: &Bookmark) -> Result<()> {
        let path = self.path(&bookmark.uid)?;
        let data = serde_json::to_vec_pretty(bookmark)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, data).await?;
        tracing::debug!(path = %path.display(), state = %bookmark.state, "bookmark saved");
        Ok(())
    }

    async fn get(&self, uid: &str) -> Result<Option<Bookmark>> {
        let path = self.path(uid)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::State;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let mut b = Bookmark::new("https://example.net/");
        store.save(&b).await.unwrap();

        b.state = State::Loaded;
        store.save(&b).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&b.uid).await.unwrap().unwrap().state, State::Loaded);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("records"));
        let mut b = Bookmark::new("https://example.net/");
        b.title = "Title".to_string();
        store.save(&b).await.unwrap();

        assert!(dir.path().join("records").join(format!("{}.json", b.uid)).is_file());
        assert_eq!(store.get(&b.uid).await.unwrap(), Some(b));
        assert!(store.get("0000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_paths() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut b = Bookmark::new("https://example.net/");
        b.uid = "../escape".to_string();

        assert!(matches!(store.save(&b).await, Err(ScrapbookError::ConfigError(_))));
    }
}
