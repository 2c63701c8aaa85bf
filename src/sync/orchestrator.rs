//! Synchronization engine for the staking contract.
//!
//! This module defines the `SyncEngine`, which keeps the record store in step
//! with the ledger. It runs an explicit state machine:
//!
//! - `Bootstrapping`: read the persisted checkpoint and the current head.
//! - `CatchingUp`: apply `[checkpoint + 1, head]` in sub-ranges of `batch_size`,
//!   each kind in declared order, and persist the checkpoint after each fully
//!   applied sub-range.
//! - `Live`: poll for new blocks, or apply events pushed by a subscription.
//! - `Halted`: a checkpoint could not be persisted, would have regressed, or
//!   could not be read back.
//!
//! Retryable failures are logged, followed by an exponential backoff, after
//! which the engine bootstraps again from the persisted checkpoint. Shutdown is
//! signalled through a `watch` channel and is honoured between kinds, between
//! events and during every sleep; an interrupted range is never checkpointed.

use backoff::backoff::Backoff;
use backoff::future::retry;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::ledger::{EventSource, EventSubscription};
use crate::sync::events::{DecodedLog, EventKind};
use crate::sync::progress_tracker::SyncProgressTracker;
use crate::sync::projector::RecordProjector;
use crate::sync::repositories::CheckpointRepository;
use crate::sync::types::{EngineConfig, LiveMode, SyncError, SyncState};

/// Whether the engine should keep going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
	Continue,
	Stopped,
}

/// Split `[from, to]` into contiguous inclusive ranges of at most `size` blocks.
pub fn sub_ranges(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
	let size = size.max(1);
	let mut ranges = Vec::new();
	let mut start = from;
	while start <= to {
		let end = start.saturating_add(size - 1).min(to);
		ranges.push((start, end));
		if end == u64::MAX {
			break;
		}
		start = end + 1;
	}
	ranges
}

/// Resolve once `shutdown` carries `true`. A dropped sender never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
	loop {
		if *shutdown.borrow_and_update() {
			return;
		}
		if shutdown.changed().await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}

/// Keeps the record store in step with the staking contract's events.
pub struct SyncEngine {
	source: Arc<dyn EventSource>,
	projector: RecordProjector,
	checkpoints: Arc<dyn CheckpointRepository>,
	config: EngineConfig,
	shutdown: watch::Receiver<bool>,

	state: SyncState,
	/// Last checkpoint known to be persisted.
	committed: Option<u64>,
	/// First block to apply when no checkpoint exists, fixed on first use.
	initial_start: Option<u64>,
	retry_policy: ExponentialBackoff,
	progress: SyncProgressTracker,
}

impl SyncEngine {
	pub fn new(
		source: Arc<dyn EventSource>,
		projector: RecordProjector,
		checkpoints: Arc<dyn CheckpointRepository>,
		mut config: EngineConfig,
		shutdown: watch::Receiver<bool>,
	) -> Self {
		if config.live_mode == LiveMode::Subscribed && !source.supports_subscription() {
			warn!("Event source does not support subscriptions, falling back to polling");
			config.live_mode = LiveMode::Polling;
		}

		let retry_policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(config.retry_initial)
			.with_max_interval(config.retry_max)
			.with_randomization_factor(0.1)
			.with_max_elapsed_time(None)
			.build();

		Self {
			source,
			projector,
			checkpoints,
			config,
			shutdown,
			state: SyncState::Bootstrapping,
			committed: None,
			initial_start: None,
			retry_policy,
			progress: SyncProgressTracker::new(),
		}
	}

	pub fn state(&self) -> SyncState {
		self.state
	}

	pub fn committed(&self) -> Option<u64> {
		self.committed
	}

	pub fn progress(&self) -> &SyncProgressTracker {
		&self.progress
	}

	pub fn live_mode(&self) -> LiveMode {
		self.config.live_mode
	}

	fn is_cancelled(&self) -> bool {
		*self.shutdown.borrow()
	}

	/// Sleep for `duration`, returning early with `Stopped` on shutdown.
	async fn sleep(&mut self, duration: Duration) -> Flow {
		tokio::select! {
			_ = tokio::time::sleep(duration) => Flow::Continue,
			_ = wait_for_shutdown(&mut self.shutdown) => Flow::Stopped,
		}
	}

	/// Run until shutdown or a fatal error.
	///
	/// Returns `Ok(())` on shutdown. A fatal error moves the engine to
	/// `Halted` and is returned.
	pub async fn run(&mut self) -> Result<(), SyncError> {
		info!(
			"Starting staking sync ({:?} live mode, checkpoint in {})",
			self.config.live_mode,
			self.checkpoints.describe()
		);

		loop {
			if self.is_cancelled() {
				break;
			}

			let result = match self.config.live_mode {
				LiveMode::Polling => self.follow_polling().await,
				LiveMode::Subscribed => self.follow_subscription().await,
			};

			match result {
				Ok(Flow::Stopped) | Ok(Flow::Continue) => break,
				Err(e) if e.is_fatal() => {
					self.state = SyncState::Halted;
					error!("Sync halted: {}", e);
					return Err(e);
				}
				Err(e) => {
					let delay = self
						.retry_policy
						.next_backoff()
						.unwrap_or(self.config.retry_max)
						.min(self.config.retry_max);
					warn!(
						"Sync cycle failed in {:?}: {}. Restarting from checkpoint in {:?}",
						self.state, e, delay
					);
					self.state = SyncState::Bootstrapping;
					if self.sleep(delay).await == Flow::Stopped {
						break;
					}
				}
			}
		}

		self.progress.log_progress(true);
		info!("Sync stopped at checkpoint {:?}", self.committed);
		Ok(())
	}

	/// Bootstrap and catch up to the current head once, without live mode or
	/// retries. Returns the committed checkpoint.
	pub async fn sync_to_latest(&mut self) -> Result<Option<u64>, SyncError> {
		let flow = match self.bootstrap().await {
			Ok((from, to)) => self.catch_up(from, to).await,
			Err(e) => Err(e),
		};
		if let Err(e) = &flow {
			if e.is_fatal() {
				self.state = SyncState::Halted;
			}
		}
		if flow? == Flow::Continue {
			self.state = SyncState::Live;
		}
		self.progress.log_progress(true);
		Ok(self.committed)
	}

	/// Load the persisted checkpoint and return the range still to apply.
	async fn bootstrap(&mut self) -> Result<(u64, u64), SyncError> {
		self.state = SyncState::Bootstrapping;
		if let Some(stored) = self.checkpoints.load().await? {
			if self.committed != Some(stored) {
				info!("Resuming from checkpoint {}", stored);
			}
			self.committed = Some(stored);
		}
		self.next_range().await
	}

	async fn next_range(&mut self) -> Result<(u64, u64), SyncError> {
		let head = self.source.current_head().await?;
		let from = match self.committed {
			Some(committed) => committed.saturating_add(1),
			None => *self.initial_start.get_or_insert_with(|| match self.config.start_block {
				Some(start) => {
					info!("No checkpoint found, starting at block {}", start);
					start
				}
				None => {
					info!("No checkpoint found, following from head {}", head);
					head.saturating_add(1)
				}
			}),
		};
		debug!("Next range {}..={}", from, head);
		Ok((from, head))
	}

	/// Apply `[from, to]` sub-range by sub-range, committing each.
	async fn catch_up(&mut self, from: u64, to: u64) -> Result<Flow, SyncError> {
		let ranges = sub_ranges(from, to, self.config.batch_size);
		if !ranges.is_empty() {
			info!(
				"Catching up blocks {}..={} in {} ranges",
				from,
				to,
				ranges.len()
			);
		}

		for (start, end) in ranges {
			self.state = SyncState::CatchingUp {
				from: start,
				to: end,
			};
			if self.apply_range(start, end).await? == Flow::Stopped {
				info!("Shutdown during range {}..={}, not checkpointing", start, end);
				return Ok(Flow::Stopped);
			}
			self.commit(end).await?;
			self.progress.record_range(start, end);
			self.progress.log_progress(false);
		}

		self.retry_policy.reset();
		self.state = SyncState::Live;
		Ok(Flow::Continue)
	}

	async fn apply_range(&mut self, from: u64, to: u64) -> Result<Flow, SyncError> {
		for kind in EventKind::ALL {
			if self.is_cancelled() {
				return Ok(Flow::Stopped);
			}
			let logs = self.source.query_range(kind, from, to).await?;
			for log in logs {
				if self.is_cancelled() {
					return Ok(Flow::Stopped);
				}
				self.apply_log(log).await?;
			}
		}
		Ok(Flow::Continue)
	}

	async fn apply_log(&mut self, log: DecodedLog) -> Result<(), SyncError> {
		match log {
			DecodedLog::Malformed {
				block_number,
				log_index,
				reason,
			} => {
				warn!(
					block = block_number,
					log_index, "Skipping malformed log: {}", reason
				);
				self.progress.record_skipped();
			}
			DecodedLog::Event(event) => match self.projector.apply(&event).await {
				Ok(projection) => self.progress.record_applied(event.kind(), projection),
				Err(e) if e.is_undecodable() => {
					warn!(
						block = event.block_number,
						log_index = event.log_index,
						"Skipping {} event: {}",
						event.kind().name(),
						e
					);
					self.progress.record_skipped();
				}
				Err(e) => return Err(e),
			},
		}
		Ok(())
	}

	/// Persist `position`, retrying for the checkpoint retry window.
	async fn commit(&mut self, position: u64) -> Result<(), SyncError> {
		if let Some(committed) = self.committed {
			if position < committed {
				return Err(SyncError::CheckpointRegression {
					attempted: position,
					committed,
				});
			}
			if position == committed {
				return Ok(());
			}
		}

		let policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.config.retry_initial)
			.with_max_interval(self.config.retry_max)
			.with_max_elapsed_time(Some(self.config.checkpoint_retry_window))
			.build();
		let checkpoints = self.checkpoints.clone();

		retry(policy, || async {
			checkpoints.save(position).await.map_err(|e| {
				warn!("Failed to save checkpoint {}: {}", position, e);
				backoff::Error::transient(e)
			})
		})
		.await
		.map_err(|e| SyncError::CheckpointUnavailable {
			position,
			reason: e.to_string(),
		})?;

		debug!("Committed checkpoint {}", position);
		self.committed = Some(position);
		self.progress.record_checkpoint(position);
		Ok(())
	}

	async fn follow_polling(&mut self) -> Result<Flow, SyncError> {
		let (mut from, mut to) = self.bootstrap().await?;
		loop {
			if self.catch_up(from, to).await? == Flow::Stopped {
				return Ok(Flow::Stopped);
			}
			self.progress.log_progress(false);

			debug!("Caught up to {}, polling again in {:?}", to, self.config.poll_interval);
			if self.sleep(self.config.poll_interval).await == Flow::Stopped {
				return Ok(Flow::Stopped);
			}
			(from, to) = self.next_range().await?;
		}
	}

	async fn follow_subscription(&mut self) -> Result<Flow, SyncError> {
		let mut subscription = self.source.subscribe().await?;
		let result = self.drive_subscription(subscription.as_mut()).await;
		subscription.detach().await;
		result
	}

	/// Close the gap up to the head, then apply pushed events.
	async fn drive_subscription(
		&mut self,
		subscription: &mut dyn EventSubscription,
	) -> Result<Flow, SyncError> {
		let (from, to) = self.bootstrap().await?;
		if self.catch_up(from, to).await? == Flow::Stopped {
			return Ok(Flow::Stopped);
		}
		info!("Caught up to {}, applying subscribed events", to);

		// The stream starts at the latest block when subscribing, which can be
		// past the head the catch-up pass saw.
		let mut stream_joined = false;
		loop {
			let next = tokio::select! {
				next = subscription.next_event() => next,
				_ = wait_for_shutdown(&mut self.shutdown) => return Ok(Flow::Stopped),
			};

			let decoded = match next {
				Some(Ok(decoded)) => decoded,
				Some(Err(e)) => return Err(e.into()),
				None => {
					return Err(SyncError::SubscriptionEnded(
						"event stream closed".to_string(),
					));
				}
			};

			let (block, _) = decoded.position();
			if block <= to {
				debug!("Ignoring subscribed event at {} already caught up", block);
				continue;
			}

			let complete = block - 1;
			if !stream_joined {
				stream_joined = true;
				if complete > to {
					info!(
						"Closing gap {}..={} before the first subscribed event",
						to + 1,
						complete
					);
					if self.catch_up(to + 1, complete).await? == Flow::Stopped {
						return Ok(Flow::Stopped);
					}
				}
			}
			if self.config.persist_live_checkpoint && self.committed.is_none_or(|c| complete > c) {
				self.commit(complete).await?;
			}
			self.apply_log(decoded).await?;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_batch_when_range_fits() {
		assert_eq!(sub_ranges(1001, 1500, 500), vec![(1001, 1500)]);
	}

	#[test]
	fn splits_into_contiguous_batches() {
		assert_eq!(
			sub_ranges(0, 1200, 500),
			vec![(0, 499), (500, 999), (1000, 1200)]
		);
	}

	#[test]
	fn empty_when_from_is_past_to() {
		assert!(sub_ranges(1501, 1500, 500).is_empty());
	}

	#[test]
	fn single_block_and_upper_bound() {
		assert_eq!(sub_ranges(7, 7, 500), vec![(7, 7)]);
		assert_eq!(
			sub_ranges(u64::MAX - 1, u64::MAX, 500),
			vec![(u64::MAX - 1, u64::MAX)]
		);
	}

	struct IdleSource;

	#[async_trait::async_trait]
	impl EventSource for IdleSource {
		async fn current_head(&self) -> Result<u64, crate::ledger::LedgerError> {
			Ok(1500)
		}

		async fn query_range(
			&self,
			_kind: EventKind,
			_from: u64,
			_to: u64,
		) -> Result<Vec<DecodedLog>, crate::ledger::LedgerError> {
			Ok(Vec::new())
		}

		fn supports_subscription(&self) -> bool {
			false
		}

		async fn subscribe(
			&self,
		) -> Result<Box<dyn EventSubscription>, crate::ledger::LedgerError> {
			Err(crate::ledger::LedgerError::SubscriptionError(
				"unsupported".to_string(),
			))
		}
	}

	#[async_trait::async_trait]
	impl crate::ledger::ContractReader for IdleSource {
		async fn tier_max_stake(&self, _tier_id: u128) -> Result<u128, crate::ledger::LedgerError> {
			Ok(0)
		}
	}

	#[tokio::test]
	async fn checkpoint_regression_is_fatal() {
		let checkpoints = Arc::new(crate::sync::MemoryCheckpointRepository::new(Some(1000)));
		let projector = RecordProjector::new(
			Arc::new(crate::store::MemoryStore::new()),
			Arc::new(IdleSource),
		);
		let (_tx, rx) = watch::channel(false);
		let mut engine = SyncEngine::new(
			Arc::new(IdleSource),
			projector,
			checkpoints.clone(),
			EngineConfig::default(),
			rx,
		);

		assert_eq!(engine.sync_to_latest().await.unwrap(), Some(1500));
		let err = engine.commit(1400).await.unwrap_err();
		assert!(matches!(
			err,
			SyncError::CheckpointRegression {
				attempted: 1400,
				committed: 1500
			}
		));
		assert!(err.is_fatal());
		assert_eq!(checkpoints.history(), vec![1500]);
	}

	#[tokio::test]
	async fn shutdown_wait_resolves_on_signal() {
		let (tx, mut rx) = watch::channel(false);
		tx.send(true).unwrap();
		tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
			.await
			.unwrap();
	}
}
