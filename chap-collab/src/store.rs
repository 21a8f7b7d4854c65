//! Boundary with the content store.
//!
//! The sync core only needs to load a file, save it, and read its edit
//! history. Store failures are reported to the user but never stop local
//! editing.
//!
//! Two implementations are provided:
//! - [`MemoryStore`]: process-local maps, used by tests and the relay by
//!   default.
//! - [`FileStore`]: one JSON document per file under a directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::patch::LogEntry;
use crate::protocol::FileId;

/// Content store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Current content of a file. Unknown files are empty.
    async fn fetch_content(&self, file_id: &FileId) -> Result<String, StoreError>;

    async fn save_content(&self, file_id: &FileId, content: &str) -> Result<(), StoreError>;

    /// Authoritative edit history, oldest first.
    async fn fetch_log(&self, file_id: &FileId) -> Result<Vec<LogEntry>, StoreError>;

    async fn append_log(&self, file_id: &FileId, entry: &LogEntry) -> Result<(), StoreError>;
}

/// Persisted state of one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredFile {
    content: String,
    log: Vec<LogEntry>,
}

/// In-memory [`ContentStore`].
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<FileId, StoredFile>>,
    saves: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file's content without counting it as a save.
    pub async fn insert(&self, file_id: FileId, content: impl Into<String>) {
        let mut files = self.files.write().await;
        files.entry(file_id).or_default().content = content.into();
    }

    /// Number of successful `save_content` calls.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn fetch_content(&self, file_id: &FileId) -> Result<String, StoreError> {
        let files = self.files.read().await;
        Ok(files.get(file_id).map(|f| f.content.clone()).unwrap_or_default())
    }

    async fn save_content(&self, file_id: &FileId, content: &str) -> Result<(), StoreError> {
        let mut files = self.files.write().await;
        files.entry(file_id.clone()).or_default().content = content.to_string();
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn fetch_log(&self, file_id: &FileId) -> Result<Vec<LogEntry>, StoreError> {
        let files = self.files.read().await;
        Ok(files.get(file_id).map(|f| f.log.clone()).unwrap_or_default())
    }

    async fn append_log(&self, file_id: &FileId, entry: &LogEntry) -> Result<(), StoreError> {
        let mut files = self.files.write().await;
        files.entry(file_id.clone()).or_default().log.push(entry.clone());
        Ok(())
    }
}

/// Directory-backed [`ContentStore`]: `<root>/<file id>.json`.
///
/// Writes go through a temporary file and a rename so a crash never leaves
/// a half-written document behind. A single lock serialises writers within
/// this process.
pub struct FileStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, file_id: &FileId) -> PathBuf {
        let name: String = file_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{name}.json"))
    }

    async fn load(&self, file_id: &FileId) -> Result<StoredFile, StoreError> {
        match tokio::fs::read(self.path_for(file_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, file_id: &FileId, file: &StoredFile) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(file).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let path = self.path_for(file_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FileStore {
    async fn fetch_content(&self, file_id: &FileId) -> Result<String, StoreError> {
        Ok(self.load(file_id).await?.content)
    }

    async fn save_content(&self, file_id: &FileId, content: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load(file_id).await?;
        file.content = content.to_string();
        self.write(file_id, &file).await
    }

    async fn fetch_log(&self, file_id: &FileId) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.load(file_id).await?.log)
    }

    async fn append_log(&self, file_id: &FileId, entry: &LogEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load(file_id).await?;
        file.log.push(entry.clone());
        self.write(file_id, &file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Origin, Patch, Position};

    fn entry(text: &str) -> LogEntry {
        LogEntry::new("alice", None, Patch::insert(Origin::Input, Position::ZERO, text, 1))
    }

    #[tokio::test]
    async fn test_memory_store_unknown_file_is_empty() {
        let store = MemoryStore::new();
        let id = FileId::from("nope");
        assert_eq!(store.fetch_content(&id).await.unwrap(), "");
        assert!(store.fetch_log(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_save_and_log() {
        let store = MemoryStore::new();
        let id = FileId::from("F");
        store.insert(id.clone(), "seed").await;
        assert_eq!(store.save_count(), 0);

        store.save_content(&id, "v2").await.unwrap();
        store.append_log(&id, &entry("a")).await.unwrap();
        store.append_log(&id, &entry("b")).await.unwrap();

        assert_eq!(store.fetch_content(&id).await.unwrap(), "v2");
        assert_eq!(store.save_count(), 1);
        let log = store.fetch_log(&id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].patch.inserted_text, "b");
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let id = FileId::from("src/main.rs");

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.save_content(&id, "fn main() {}").await.unwrap();
            store.append_log(&id, &entry("fn")).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.fetch_content(&id).await.unwrap(), "fn main() {}");
        assert_eq!(store.fetch_log(&id).await.unwrap().len(), 1);
        assert!(store.root().join("src_main_rs.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).await.unwrap();
        assert_eq!(store.fetch_content(&FileId::from("x")).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_file_store_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("bad.json"), b"{oops").await.unwrap();

        let result = store.fetch_content(&FileId::from("bad")).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
