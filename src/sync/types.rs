use std::time::Duration;

use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::sync::repositories::CheckpointError;

/// Errors raised while synchronizing
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Checkpoint error: {0}")]
	Checkpoint(#[from] CheckpointError),

	#[error("Checkpoint {position} could not be saved: {reason}")]
	CheckpointUnavailable { position: u64, reason: String },

	#[error("Checkpoint regression: attempted {attempted} after committing {committed}")]
	CheckpointRegression { attempted: u64, committed: u64 },

	#[error("Subscription ended: {0}")]
	SubscriptionEnded(String),
}

impl SyncError {
	/// Fatal errors halt the engine instead of being retried.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			SyncError::CheckpointUnavailable { .. }
				| SyncError::CheckpointRegression { .. }
				| SyncError::Checkpoint(CheckpointError::Invalid(_))
		)
	}

	/// An event whose payload cannot be interpreted; it is skipped, not retried.
	pub fn is_undecodable(&self) -> bool {
		matches!(self, SyncError::Ledger(e) if !e.is_retryable())
	}
}

/// Phase of the synchronization state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
	Bootstrapping,
	CatchingUp { from: u64, to: u64 },
	Live,
	Halted,
}

/// How the engine follows the ledger once caught up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMode {
	/// Re-run catch-up every `poll_interval`.
	Polling,
	/// Apply events pushed by a subscription.
	Subscribed,
}

/// Engine tuning, built from `IndexerConfig`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Start position used when no checkpoint exists; `None` starts at the head.
	pub start_block: Option<u64>,
	pub batch_size: u64,
	pub live_mode: LiveMode,
	pub poll_interval: Duration,
	pub retry_initial: Duration,
	pub retry_max: Duration,
	/// How long checkpoint saves are retried before halting.
	pub checkpoint_retry_window: Duration,
	/// Advance the checkpoint while applying subscribed events.
	pub persist_live_checkpoint: bool,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			start_block: None,
			batch_size: 500,
			live_mode: LiveMode::Polling,
			poll_interval: Duration::from_millis(120_000),
			retry_initial: Duration::from_millis(5_000),
			retry_max: Duration::from_millis(60_000),
			checkpoint_retry_window: Duration::from_secs(60),
			persist_live_checkpoint: true,
		}
	}
}
