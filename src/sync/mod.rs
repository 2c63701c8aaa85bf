//! Staking Synchronization Module
//!
//! This module keeps the projected staking tables in step with the contract's event history.
//! It is composed of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `orchestrator`: The `SyncEngine` state machine driving catch-up, live following and retries.
//! - `events`: The closed catalog of staking events and their decoding from logs.
//! - `projector`: Maps each decoded event onto an idempotent store mutation.
//! - `repositories`: Checkpoint persistence backends (file, Redis, memory).
//! - `progress_tracker`: Tracks committed ranges and per-kind counts for logging.
//! - `types`: Engine configuration, states and errors.

/// Staking event catalog and decoding
pub mod events;
/// Main coordinator for the sync process
pub mod orchestrator;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Event to record projection
pub mod projector;
/// Checkpoint persistence
pub mod repositories;
/// Engine configuration, states and errors
pub mod types;

pub use orchestrator::*;
pub use projector::{Projection, RecordProjector};
pub use repositories::{
	CheckpointError, CheckpointRepository, FileCheckpointRepository, MemoryCheckpointRepository,
	RedisCheckpointRepository,
};
pub use types::*;
