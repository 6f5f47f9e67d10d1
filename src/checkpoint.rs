//! Position persistence for resumable extraction.
//!
//! A position map holds one string value per checkpoint key. It is the only
//! extractor state that survives a restart: it is loaded once when an
//! extractor starts and written after every run that advanced a checkpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use cdc_capture::checkpoint::{FilePositionStore, PositionStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FilePositionStore::new("positions.json");
//!
//!     let mut positions = store.load().await?;
//!     println!("Resuming with {} checkpoints", positions.len());
//!
//!     positions.insert("0$timestamp_begin$".to_string(), "2024-03-01 12:00:00".to_string());
//!     store.save(&positions).await?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{Error, Result};

/// Checkpoint key to last committed value.
pub type Positions = HashMap<String, String>;

/// Durable key/value storage for checkpoints.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Returns the persisted map, empty when nothing was saved yet.
    async fn load(&self) -> Result<Positions>;

    /// Replaces the persisted map; must be atomic per call.
    async fn save(&self, positions: &Positions) -> Result<()>;
}

/// On-disk layout of the position file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionFile {
    /// Sorted so the file diffs cleanly between saves
    pub positions: BTreeMap<String, String>,
    /// The timestamp when this file was written
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Stores positions as a JSON file.
///
/// Writes go to a temporary file which is synced and then renamed over the
/// target, so a crash mid-write never leaves a partial file behind.
///
/// # Example
///
/// ```rust
/// use cdc_capture::checkpoint::FilePositionStore;
///
/// let store = FilePositionStore::new("/var/lib/cdc-capture/positions.json");
/// assert!(store.path().ends_with("positions.json"));
/// ```
pub struct FilePositionStore {
    file_path: PathBuf,
}

impl FilePositionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Deletes the position file if it exists, so the next run starts fresh.
    pub async fn delete(&self) -> Result<()> {
        if self.file_path.exists() {
            fs::remove_file(&self.file_path).await?;
            info!("Deleted position file {:?}", self.file_path);
        }
        Ok(())
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn load(&self) -> Result<Positions> {
        if !self.file_path.exists() {
            debug!("No position file found at {:?}", self.file_path);
            return Ok(Positions::new());
        }

        let content = fs::read_to_string(&self.file_path).await.map_err(|e| {
            error!("Failed to read position file: {}", e);
            Error::Io(e)
        })?;
        let file: PositionFile = serde_json::from_str(&content).map_err(|e| {
            error!("Failed to parse position file: {}", e);
            Error::Config(format!("Invalid position file {:?}: {}", self.file_path, e))
        })?;

        info!(
            "Loaded {} positions written at {}",
            file.positions.len(),
            file.timestamp
        );
        Ok(file.positions.into_iter().collect())
    }

    async fn save(&self, positions: &Positions) -> Result<()> {
        debug!("Saving {} positions", positions.len());

        let file = PositionFile {
            positions: positions.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            timestamp: chrono::Utc::now(),
        };

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self.file_path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&file)?;
        let mut temp = fs::File::create(&temp_path).await?;
        temp.write_all(json.as_bytes()).await?;
        temp.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;

        debug!("Positions saved to {:?}", self.file_path);
        Ok(())
    }
}

/// Keeps positions in memory; counts saves for inspection.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: Mutex<Positions>,
    saves: AtomicUsize,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(positions: Positions) -> Self {
        Self {
            positions: Mutex::new(positions),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Positions {
        self.positions.lock().await.clone()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load(&self) -> Result<Positions> {
        Ok(self.positions.lock().await.clone())
    }

    async fn save(&self, positions: &Positions) -> Result<()> {
        *self.positions.lock().await = positions.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
