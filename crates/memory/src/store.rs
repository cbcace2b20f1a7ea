use crate::types::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Load/save boundary for the persistent memory document.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Load the document at `path`. A missing or empty file yields `None`.
    async fn load(&self, path: &Path) -> Result<Option<Memory>, MemoryError>;

    /// Replace the document at `path`.
    async fn save(&self, path: &Path, memory: &Memory) -> Result<(), MemoryError>;
}

/// Memory documents stored as plain files.
///
/// Writes to the same path are serialized; the last writer wins.
#[derive(Default)]
pub struct FileMemoryStore {
    write_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock();
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn load(&self, path: &Path) -> Result<Option<Memory>, MemoryError> {
        if !path.exists() {
            tracing::debug!("No memory file at {:?}", path);
            return Ok(None);
        }

        let content = fs::read_to_string(path).await?;
        let memory = Memory::decode(path, &content)?;

        tracing::info!("Loaded memory from {:?}", path);
        Ok(memory)
    }

    async fn save(&self, path: &Path, memory: &Memory) -> Result<(), MemoryError> {
        let lock = self.write_lock(path);
        let _guard = lock.lock().await;

        let parent = path
            .parent()
            .ok_or_else(|| MemoryError::InvalidPath(path.display().to_string()))?;
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write: write to temp file, then rename
        let temp = temp_path(path)?;
        let content = memory.encode(path)?;

        fs::write(&temp, content).await?;
        fs::rename(&temp, path).await?;

        tracing::debug!("Saved memory to {:?}", path);
        Ok(())
    }
}

/// Sibling temp file named after the whole file name, so `memory.json` and
/// `memory.txt` in one directory never share `memory.tmp`.
fn temp_path(path: &Path) -> Result<PathBuf, MemoryError> {
    let name = path
        .file_name()
        .ok_or_else(|| MemoryError::InvalidPath(path.display().to_string()))?;
    let mut temp = name.to_os_string();
    temp.push(".tmp");
    Ok(path.with_file_name(temp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_lifecycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("memory.json");
        let store = FileMemoryStore::new();

        assert!(store.load(&path).await.unwrap().is_none());

        let memory = Memory::new(json!({"contacts": {"mom": "138-0000"}}));
        store.save(&path, &memory).await.unwrap();

        let loaded = store.load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, memory);
        assert!(!temp_path(&path).unwrap().exists());
        assert!(!temp_dir.path().join("memory.tmp").exists());
    }

    #[tokio::test]
    async fn test_concurrent_saves_last_writer_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("memory.json");
        let store = Arc::new(FileMemoryStore::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                store.save(&path, &Memory::new(json!({ "writer": i }))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Whatever won, the file is a complete document from one writer.
        let loaded = store.load(&path).await.unwrap().unwrap();
        assert!(loaded.document()["writer"].is_u64());
    }

    #[test]
    fn test_temp_path_keeps_extension() {
        let dir = Path::new("/srv/agent");
        assert_eq!(
            temp_path(&dir.join("memory.json")).unwrap(),
            dir.join("memory.json.tmp")
        );
        assert_ne!(
            temp_path(&dir.join("memory.json")).unwrap(),
            temp_path(&dir.join("memory.txt")).unwrap()
        );
        assert!(temp_path(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_same_stem_files_save_concurrently() {
        let temp_dir = tempfile::tempdir().unwrap();
        let json_path = temp_dir.path().join("memory.json");
        let text_path = temp_dir.path().join("memory.txt");
        let store = Arc::new(FileMemoryStore::new());

        for round in 0..16 {
            let json_memory = Memory::new(json!({ "round": round }));
            let text_memory = Memory::new(json!(format!("notes round {}", round)));
            let (a, b) = tokio::join!(
                store.save(&json_path, &json_memory),
                store.save(&text_path, &text_memory)
            );
            a.unwrap();
            b.unwrap();

            assert_eq!(store.load(&json_path).await.unwrap().unwrap(), json_memory);
            assert_eq!(store.load(&text_path).await.unwrap().unwrap(), text_memory);
        }
    }
}
