//! Test harness for sync engine integration tests.
//!
//! Provides:
//! - ScriptedSource: an in-memory event source with a movable head, query log,
//!   failure injection and an optional push subscription
//! - StaticReader: a contract reader with a fixed tier max stake
//! - Harness: wires a source, a `MemoryStore` and a `MemoryCheckpointRepository`

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use staking_state_sync::ledger::{
	Address, ContractReader, EventSource, EventSubscription, LedgerError,
};
use staking_state_sync::store::MemoryStore;
use staking_state_sync::sync::events::{
	DecodedLog, EventKind, LedgerEvent, RewardClaimed, StakeWithdrawn, Staked, StakingEvent,
	TierCreated,
};
use staking_state_sync::sync::{
	EngineConfig, LiveMode, MemoryCheckpointRepository, RecordProjector, SyncEngine,
};
use tokio::sync::{mpsc, watch};

pub const ETHER: u128 = 1_000_000_000_000_000_000;

pub type Push = Result<DecodedLog, LedgerError>;

/// In-memory event source driven by the test.
#[derive(Default)]
pub struct ScriptedSource {
	logs: Mutex<Vec<(EventKind, DecodedLog)>>,
	head: Mutex<u64>,
	queries: Mutex<Vec<(EventKind, u64, u64)>>,
	/// Errors returned by the next queries, in order.
	query_failures: Mutex<VecDeque<LedgerError>>,
	/// Flip the shutdown signal when this kind is queried.
	cancel_on: Mutex<Option<(EventKind, Arc<watch::Sender<bool>>)>>,
	subscription: Mutex<Option<mpsc::UnboundedReceiver<Push>>>,
	subscribable: bool,
	pub detached: Arc<AtomicBool>,
}

impl ScriptedSource {
	pub fn new(head: u64) -> Self {
		Self {
			head: Mutex::new(head),
			..Default::default()
		}
	}

	/// A source that also accepts a subscription; events are pushed through
	/// the returned sender.
	pub fn with_subscription(head: u64) -> (Self, mpsc::UnboundedSender<Push>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let source = Self {
			head: Mutex::new(head),
			subscription: Mutex::new(Some(rx)),
			subscribable: true,
			..Default::default()
		};
		(source, tx)
	}

	pub fn push(&self, event: LedgerEvent) {
		self.logs
			.lock()
			.unwrap()
			.push((event.kind(), DecodedLog::Event(event)));
	}

	pub fn push_all(&self, events: impl IntoIterator<Item = LedgerEvent>) {
		for event in events {
			self.push(event);
		}
	}

	/// Add a malformed log of `kind` at the given position.
	pub fn push_malformed(&self, kind: EventKind, block_number: u64, log_index: u64) {
		self.logs.lock().unwrap().push((
			kind,
			DecodedLog::Malformed {
				block_number,
				log_index,
				reason: format!("truncated {} payload", kind.name()),
			},
		));
	}

	pub fn set_head(&self, head: u64) {
		*self.head.lock().unwrap() = head;
	}

	pub fn fail_next_queries(&self, errors: impl IntoIterator<Item = LedgerError>) {
		self.query_failures.lock().unwrap().extend(errors);
	}

	pub fn cancel_when_querying(&self, kind: EventKind, shutdown: Arc<watch::Sender<bool>>) {
		*self.cancel_on.lock().unwrap() = Some((kind, shutdown));
	}

	pub fn queries(&self) -> Vec<(EventKind, u64, u64)> {
		self.queries.lock().unwrap().clone()
	}
}

#[async_trait]
impl EventSource for ScriptedSource {
	async fn current_head(&self) -> Result<u64, LedgerError> {
		Ok(*self.head.lock().unwrap())
	}

	async fn query_range(
		&self,
		kind: EventKind,
		from: u64,
		to: u64,
	) -> Result<Vec<DecodedLog>, LedgerError> {
		if let Some((cancel_kind, shutdown)) = self.cancel_on.lock().unwrap().as_ref() {
			if *cancel_kind == kind {
				shutdown.send_replace(true);
			}
		}
		if let Some(error) = self.query_failures.lock().unwrap().pop_front() {
			return Err(error);
		}
		self.queries.lock().unwrap().push((kind, from, to));

		let mut matching: Vec<DecodedLog> = self
			.logs
			.lock()
			.unwrap()
			.iter()
			.filter(|(log_kind, log)| {
				let (block, _) = log.position();
				*log_kind == kind && block >= from && block <= to
			})
			.map(|(_, log)| log.clone())
			.collect();
		matching.sort_by_key(DecodedLog::position);
		Ok(matching)
	}

	fn supports_subscription(&self) -> bool {
		self.subscribable
	}

	async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, LedgerError> {
		let receiver = self.subscription.lock().unwrap().take().ok_or_else(|| {
			LedgerError::SubscriptionError("subscription already taken".to_string())
		})?;
		Ok(Box::new(ScriptedSubscription {
			receiver,
			detached: self.detached.clone(),
		}))
	}
}

struct ScriptedSubscription {
	receiver: mpsc::UnboundedReceiver<Push>,
	detached: Arc<AtomicBool>,
}

#[async_trait]
impl EventSubscription for ScriptedSubscription {
	async fn next_event(&mut self) -> Option<Push> {
		self.receiver.recv().await
	}

	async fn detach(self: Box<Self>) {
		self.detached.store(true, Ordering::SeqCst);
	}
}

/// Contract reader with a fixed tier max stake.
pub struct StaticReader {
	pub max_stake: u128,
}

#[async_trait]
impl ContractReader for StaticReader {
	async fn tier_max_stake(&self, _tier_id: u128) -> Result<u128, LedgerError> {
		Ok(self.max_stake)
	}
}

pub struct Harness {
	pub source: Arc<ScriptedSource>,
	pub store: Arc<MemoryStore>,
	pub checkpoints: Arc<MemoryCheckpointRepository>,
	pub shutdown: Arc<watch::Sender<bool>>,
}

impl Harness {
	pub fn new(source: ScriptedSource, checkpoint: Option<u64>) -> Self {
		Self::with_store(source, checkpoint, Arc::new(MemoryStore::new()))
	}

	pub fn with_store(
		source: ScriptedSource,
		checkpoint: Option<u64>,
		store: Arc<MemoryStore>,
	) -> Self {
		let (shutdown, _) = watch::channel(false);
		Self {
			source: Arc::new(source),
			store,
			checkpoints: Arc::new(MemoryCheckpointRepository::new(checkpoint)),
			shutdown: Arc::new(shutdown),
		}
	}

	pub fn engine(&self, config: EngineConfig) -> SyncEngine {
		let projector = RecordProjector::new(
			self.store.clone(),
			Arc::new(StaticReader {
				max_stake: 1_000 * ETHER,
			}),
		);
		SyncEngine::new(
			self.source.clone(),
			projector,
			self.checkpoints.clone(),
			config,
			self.shutdown.subscribe(),
		)
	}

	pub fn stop(&self) {
		self.shutdown.send_replace(true);
	}
}

/// Engine settings with millisecond timings.
pub fn fast_config() -> EngineConfig {
	EngineConfig {
		start_block: None,
		batch_size: 500,
		live_mode: LiveMode::Polling,
		poll_interval: Duration::from_millis(10),
		retry_initial: Duration::from_millis(1),
		retry_max: Duration::from_millis(5),
		checkpoint_retry_window: Duration::from_millis(30),
		persist_live_checkpoint: true,
	}
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
	tokio::time::timeout(Duration::from_secs(5), async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}

pub fn owner(byte: u8) -> Address {
	Address([byte; 20])
}

pub fn at(block_number: u64, log_index: u64, event: StakingEvent) -> LedgerEvent {
	LedgerEvent {
		block_number,
		log_index,
		transaction_hash: Some(format!("0x{:060x}{:04x}", block_number, log_index)),
		event,
	}
}

pub fn tier_created(tier_id: u128) -> StakingEvent {
	StakingEvent::TierCreated(TierCreated {
		tier_id,
		name: format!("Tier {}", tier_id),
		min_stake: ETHER,
		lockup_period: 2_592_000,
		apy: 8,
	})
}

pub fn staked(stake_id: u128, owner_byte: u8, amount: u128) -> StakingEvent {
	StakingEvent::Staked(Staked {
		stake_id,
		owner: owner(owner_byte),
		amount,
		tier_id: 1,
		start_time: 1_700_000_000,
		end_time: 1_702_592_000,
	})
}

pub fn withdrawn(stake_id: u128, owner_byte: u8, amount: u128) -> StakingEvent {
	StakingEvent::StakeWithdrawn(StakeWithdrawn {
		stake_id,
		owner: owner(owner_byte),
		amount,
	})
}

pub fn claimed(stake_id: u128, owner_byte: u8, token_byte: u8, amount: u128) -> StakingEvent {
	StakingEvent::RewardClaimed(RewardClaimed {
		stake_id,
		owner: owner(owner_byte),
		token: owner(token_byte),
		amount,
	})
}
