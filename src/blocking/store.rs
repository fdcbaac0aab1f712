use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{BlockingError, BlockingState};
use crate::utils::atomic_write::write_atomic;

/// Device-local key-value storage for [`BlockingState`]
#[async_trait]
pub trait BlockingStore: Send + Sync {
    async fn load(&self) -> Result<BlockingState, BlockingError>;
    /// Persists `state` and notifies subscribers when it differs from the last value
    async fn save(&self, state: &BlockingState) -> Result<(), BlockingError>;
    fn subscribe(&self) -> watch::Receiver<BlockingState>;
    /// Re-reads the backing storage so writes from other processes are observed
    async fn refresh(&self) -> Result<(), BlockingError> {
        Ok(())
    }
}

pub struct MemoryBlockingStore {
    sender: watch::Sender<BlockingState>,
}

impl MemoryBlockingStore {
    pub fn new(initial: BlockingState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }
}

impl Default for MemoryBlockingStore {
    fn default() -> Self {
        Self::new(BlockingState::default())
    }
}

#[async_trait]
impl BlockingStore for MemoryBlockingStore {
    async fn load(&self) -> Result<BlockingState, BlockingError> {
        Ok(self.sender.borrow().clone())
    }

    async fn save(&self, state: &BlockingState) -> Result<(), BlockingError> {
        publish(&self.sender, state);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<BlockingState> {
        self.sender.subscribe()
    }
}

/// JSON file store. Writes go to a unique temp file that is renamed into place.
pub struct FileBlockingStore {
    path: PathBuf,
    sender: watch::Sender<BlockingState>,
}

impl FileBlockingStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BlockingError> {
        let path = path.as_ref().to_path_buf();
        let initial = read_state(&path).await?;
        let (sender, _) = watch::channel(initial);
        Ok(Self { path, sender })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BlockingStore for FileBlockingStore {
    async fn load(&self) -> Result<BlockingState, BlockingError> {
        read_state(&self.path).await
    }

    async fn save(&self, state: &BlockingState) -> Result<(), BlockingError> {
        let write_err = |source| BlockingError::Write {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(state).map_err(|e| write_err(e.into()))?;
        write_atomic(&self.path, json).await.map_err(write_err)?;

        publish(&self.sender, state);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<BlockingState> {
        self.sender.subscribe()
    }

    async fn refresh(&self) -> Result<(), BlockingError> {
        let state = read_state(&self.path).await?;
        publish(&self.sender, &state);
        Ok(())
    }
}

fn publish(sender: &watch::Sender<BlockingState>, state: &BlockingState) {
    sender.send_if_modified(|current| {
        if current == state {
            false
        } else {
            *current = state.clone();
            true
        }
    });
}

async fn read_state(path: &Path) -> Result<BlockingState, BlockingError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| BlockingError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BlockingState::default()),
        Err(source) => Err(BlockingError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn missing_file_loads_as_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlockingStore::open(dir.path().join("state.json"))
            .await
            .unwrap();

        assert_eq!(store.load().await.unwrap(), BlockingState::default());
    }

    #[tokio::test]
    async fn saved_state_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = FileBlockingStore::open(&path).await.unwrap();

        let mut state = BlockingState::default();
        state.blocked_hosts.insert("example.com".to_string());
        state
            .temporarily_unlocked
            .insert("news.example.com".to_string(), Utc::now());
        store.save(&state).await.unwrap();

        let reopened = FileBlockingStore::open(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), state);
        assert_eq!(*reopened.subscribe().borrow(), state);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result = FileBlockingStore::open(&path).await;
        assert!(matches!(result, Err(BlockingError::Corrupt { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stores_sharing_a_file_can_save_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut saves = Vec::new();
        for n in 0..16 {
            let store = FileBlockingStore::open(&path).await.unwrap();
            saves.push(tokio::spawn(async move {
                let mut state = BlockingState::default();
                state.blocked_hosts.insert(format!("site-{n}.com"));
                store.save(&state).await
            }));
        }
        for save in saves {
            save.await.unwrap().unwrap();
        }

        let state = FileBlockingStore::open(&path).await.unwrap().load().await.unwrap();
        assert_eq!(state.blocked_hosts.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn refresh_publishes_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileBlockingStore::open(&path).await.unwrap();
        let mut changes = store.subscribe();

        // Another process writes the file
        let other = FileBlockingStore::open(&path).await.unwrap();
        let mut state = BlockingState::default();
        state.blocked_hosts.insert("example.com".to_string());
        other.save(&state).await.unwrap();
        assert!(!changes.has_changed().unwrap());

        store.refresh().await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), state);

        // Unchanged content does not notify again
        store.refresh().await.unwrap();
        assert!(!changes.has_changed().unwrap());
    }
}
