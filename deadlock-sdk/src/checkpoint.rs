//! Persisting high-water marks across restarts.
//!
//! A collector loads its mark once when it is built and saves it after every
//! cycle that advanced it. Without a store, a restarted collector begins at
//! its start time and anything that happened while it was down is skipped
//! (bounded by the lookback window either way).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadlock_types::HighWaterMark;
use parking_lot::RwLock;

use crate::CheckpointError;

/// Storage for high-water marks, keyed by collector instance.
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// The saved mark for `instance`, if there is one.
    async fn load(&self, instance: &str) -> Result<Option<DateTime<Utc>>, CheckpointError>;

    /// Save a mark.
    async fn save(&self, mark: &HighWaterMark) -> Result<(), CheckpointError>;
}

/// A JSON file mapping instance names to marks:
///
/// ```json
/// {"primary": "2024-03-01T12:00:05.123Z", "replica": "2024-03-01T11:59:58Z"}
/// ```
///
/// Several collectors in one process can share a file. Saves write a
/// sibling temp file and rename it over the original.
#[derive(Debug)]
pub struct FileCheckpoint {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileCheckpoint {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, DateTime<Utc>>, CheckpointError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self, instance: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.get(instance).copied())
    }

    async fn save(&self, mark: &HighWaterMark) -> Result<(), CheckpointError> {
        let _guard = self.lock.lock().await;

        let mut marks = self.read_all().await?;
        marks.insert(mark.instance().to_string(), mark.value());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&marks)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory marks. Nothing survives a restart.
///
/// ```
/// use chrono::Utc;
/// use deadlock_sdk::{CheckpointStore, HighWaterMark, MemoryCheckpoint};
///
/// # tokio_test::block_on(async {
/// let store = MemoryCheckpoint::new();
/// let mark = HighWaterMark::new("primary", Utc::now());
/// store.save(&mark).await.unwrap();
///
/// assert_eq!(store.load("primary").await.unwrap(), Some(mark.value()));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    marks: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a mark already saved for `instance`.
    pub fn with_mark(self, instance: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.marks.write().insert(instance.into(), value);
        self
    }

    /// The saved mark for `instance`, without going through the async API.
    pub fn get(&self, instance: &str) -> Option<DateTime<Utc>> {
        self.marks.read().get(instance).copied()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self, instance: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        Ok(self.get(instance))
    }

    async fn save(&self, mark: &HighWaterMark) -> Result<(), CheckpointError> {
        self.marks
            .write()
            .insert(mark.instance().to_string(), mark.value());
        Ok(())
    }
}
