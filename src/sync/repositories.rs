//! Checkpoint persistence.
//!
//! A checkpoint is the highest block whose events have all been applied to the
//! record store. The file backing writes `{"lastProcessedBlock": n}` through a
//! temporary file and a rename, so a crash mid-save leaves the previous value
//! intact. The Redis backing is a single `SET` of the decimal value.

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Redis error: {0}")]
	Redis(#[from] redis::RedisError),

	#[error("Invalid checkpoint value: {0}")]
	Invalid(String),

	#[error("Checkpoint backend unavailable: {0}")]
	Unavailable(String),
}

/// Repository for checkpoint management
#[async_trait::async_trait]
pub trait CheckpointRepository: Send + Sync {
	/// Last durably committed block, `None` if nothing was ever committed.
	async fn load(&self) -> Result<Option<u64>, CheckpointError>;
	async fn save(&self, block: u64) -> Result<(), CheckpointError>;
	/// Where the checkpoint lives, for logging.
	fn describe(&self) -> String;
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
	#[serde(rename = "lastProcessedBlock")]
	last_processed_block: u64,
}

/// File-based implementation of CheckpointRepository
pub struct FileCheckpointRepository {
	path: PathBuf,
}

impl FileCheckpointRepository {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Flush the directory entry so the rename itself survives a power loss.
	#[cfg(unix)]
	async fn sync_parent_dir(&self) -> Result<(), CheckpointError> {
		let parent = match self.path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent,
			_ => Path::new("."),
		};
		tokio::fs::File::open(parent).await?.sync_all().await?;
		Ok(())
	}

	#[cfg(not(unix))]
	async fn sync_parent_dir(&self) -> Result<(), CheckpointError> {
		Ok(())
	}

	fn temp_path(&self) -> PathBuf {
		let mut name = self.path.clone().into_os_string();
		name.push(".tmp");
		PathBuf::from(name)
	}
}

#[async_trait::async_trait]
impl CheckpointRepository for FileCheckpointRepository {
	async fn load(&self) -> Result<Option<u64>, CheckpointError> {
		let contents = match tokio::fs::read(&self.path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No checkpoint file at {:?}", self.path);
				return Ok(None);
			}
			Err(e) => return Err(e.into()),
		};

		match serde_json::from_slice::<CheckpointFile>(&contents) {
			Ok(file) => Ok(Some(file.last_processed_block)),
			Err(e) => {
				warn!("Checkpoint file {:?} is unreadable: {}", self.path, e);
				Err(CheckpointError::Invalid(format!(
					"{} does not hold a checkpoint: {}",
					self.path.display(),
					e
				)))
			}
		}
	}

	async fn save(&self, block: u64) -> Result<(), CheckpointError> {
		let contents = serde_json::to_vec_pretty(&CheckpointFile {
			last_processed_block: block,
		})?;

		let temp_path = self.temp_path();
		let mut file = tokio::fs::File::create(&temp_path).await?;
		file.write_all(&contents).await?;
		file.sync_all().await?;
		drop(file);

		tokio::fs::rename(&temp_path, &self.path).await?;
		self.sync_parent_dir().await?;
		debug!("Saved checkpoint {} to {:?}", block, self.path);
		Ok(())
	}

	fn describe(&self) -> String {
		format!("file {}", self.path.display())
	}
}

/// Redis-backed implementation of CheckpointRepository
pub struct RedisCheckpointRepository {
	conn: MultiplexedConnection,
	key: String,
}

impl RedisCheckpointRepository {
	pub async fn connect(redis_url: &str, key: String) -> Result<Self, CheckpointError> {
		let client = redis::Client::open(redis_url)?;
		let conn = client.get_multiplexed_async_connection().await?;
		info!(key = %key, "Connected to Redis checkpoint store");
		Ok(Self { conn, key })
	}
}

#[async_trait::async_trait]
impl CheckpointRepository for RedisCheckpointRepository {
	async fn load(&self) -> Result<Option<u64>, CheckpointError> {
		let value: Option<String> = self.conn.clone().get(&self.key).await?;
		value
			.map(|v| {
				v.trim()
					.parse::<u64>()
					.map_err(|_| CheckpointError::Invalid(format!("{} = {:?}", self.key, v)))
			})
			.transpose()
	}

	async fn save(&self, block: u64) -> Result<(), CheckpointError> {
		let _: () = self.conn.clone().set(&self.key, block.to_string()).await?;
		debug!("Saved checkpoint {} to redis key {}", block, self.key);
		Ok(())
	}

	fn describe(&self) -> String {
		format!("redis key {}", self.key)
	}
}

#[derive(Debug, Default)]
struct MemoryCheckpointState {
	saved: Vec<u64>,
	initial: Option<u64>,
	failing_saves: bool,
	failing_loads: bool,
}

/// In-memory implementation of CheckpointRepository.
///
/// Keeps every saved value so callers can check the save history.
#[derive(Debug, Default)]
pub struct MemoryCheckpointRepository {
	state: Mutex<MemoryCheckpointState>,
}

impl MemoryCheckpointRepository {
	pub fn new(initial: Option<u64>) -> Self {
		Self {
			state: Mutex::new(MemoryCheckpointState {
				initial,
				..Default::default()
			}),
		}
	}

	fn with_state<T>(&self, f: impl FnOnce(&mut MemoryCheckpointState) -> T) -> Result<T, CheckpointError> {
		self.state
			.lock()
			.map(|mut state| f(&mut state))
			.map_err(|_| CheckpointError::Unavailable("lock poisoned".to_string()))
	}

	/// Every value passed to `save`, in order.
	pub fn history(&self) -> Vec<u64> {
		self.with_state(|s| s.saved.clone()).unwrap_or_default()
	}

	pub fn set_failing_saves(&self, failing: bool) {
		let _ = self.with_state(|s| s.failing_saves = failing);
	}

	pub fn set_failing_loads(&self, failing: bool) {
		let _ = self.with_state(|s| s.failing_loads = failing);
	}
}

#[async_trait::async_trait]
impl CheckpointRepository for MemoryCheckpointRepository {
	async fn load(&self) -> Result<Option<u64>, CheckpointError> {
		self.with_state(|s| {
			if s.failing_loads {
				return Err(CheckpointError::Unavailable("injected load failure".to_string()));
			}
			Ok(s.saved.last().copied().or(s.initial))
		})?
	}

	async fn save(&self, block: u64) -> Result<(), CheckpointError> {
		self.with_state(|s| {
			if s.failing_saves {
				return Err(CheckpointError::Unavailable("injected save failure".to_string()));
			}
			s.saved.push(block);
			Ok(())
		})?
	}

	fn describe(&self) -> String {
		"memory".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn file_checkpoint_round_trips_in_legacy_layout() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileCheckpointRepository::new(dir.path().join("last-block.json"));

		assert_eq!(repo.load().await.unwrap(), None);
		repo.save(1500).await.unwrap();
		assert_eq!(repo.load().await.unwrap(), Some(1500));

		let raw: serde_json::Value =
			serde_json::from_slice(&std::fs::read(repo.path()).unwrap()).unwrap();
		assert_eq!(raw, serde_json::json!({ "lastProcessedBlock": 1500 }));
		assert!(!repo.temp_path().exists());
	}

	#[tokio::test]
	async fn leftover_temp_file_does_not_affect_the_committed_value() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileCheckpointRepository::new(dir.path().join("last-block.json"));
		repo.save(1000).await.unwrap();

		// Crash after the temp write but before the rename
		std::fs::write(repo.temp_path(), b"{\"lastProcessedBlock\": 12").unwrap();
		assert_eq!(repo.load().await.unwrap(), Some(1000));

		repo.save(1200).await.unwrap();
		assert_eq!(repo.load().await.unwrap(), Some(1200));
	}

	#[tokio::test]
	async fn corrupt_checkpoint_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("last-block.json");
		std::fs::write(&path, b"{\"lastProcessedBlo").unwrap();

		let repo = FileCheckpointRepository::new(path.clone());
		assert!(matches!(
			repo.load().await,
			Err(CheckpointError::Invalid(_))
		));
		// Left in place for an operator to inspect
		assert_eq!(std::fs::read(&path).unwrap(), b"{\"lastProcessedBlo");
	}

	#[tokio::test]
	async fn save_flushes_the_containing_directory() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileCheckpointRepository::new(dir.path().join("last-block.json"));
		repo.save(7).await.unwrap();
		repo.sync_parent_dir().await.unwrap();
		assert_eq!(repo.load().await.unwrap(), Some(7));
	}

	#[tokio::test]
	async fn memory_checkpoint_records_history() {
		let repo = MemoryCheckpointRepository::new(Some(10));
		assert_eq!(repo.load().await.unwrap(), Some(10));

		repo.save(20).await.unwrap();
		repo.set_failing_saves(true);
		assert!(repo.save(30).await.is_err());
		repo.set_failing_saves(false);
		repo.save(30).await.unwrap();

		assert_eq!(repo.history(), vec![20, 30]);
		assert_eq!(repo.load().await.unwrap(), Some(30));
	}
}
