//! Event source adapter for the staking contract.
//!
//! `EventSource` is the seam the sync engine talks to. `StakingEventSource`
//! implements it on top of `LedgerRpcClient`: one `eth_getLogs` per kind and
//! range, and a single `eth_subscribe` covering every kind for live delivery.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::abi::{self, AbiReader};
use super::client::{LedgerRpcClient, LogSubscription};
use super::types::{Address, LedgerError, Log, LogFilter, RpcLog};
use crate::sync::events::{DecodedLog, EventKind, LedgerEvent};

/// Range-scoped access to contract events.
#[async_trait]
pub trait EventSource: Send + Sync {
	/// Latest position considered final.
	async fn current_head(&self) -> Result<u64, LedgerError>;

	/// Events of one kind in `[from, to]`, ordered by block then log index.
	async fn query_range(
		&self,
		kind: EventKind,
		from: u64,
		to: u64,
	) -> Result<Vec<DecodedLog>, LedgerError>;

	/// Whether `subscribe` can be used.
	fn supports_subscription(&self) -> bool;

	/// Open a push subscription delivering every event kind.
	async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, LedgerError>;
}

/// A live stream of decoded events.
#[async_trait]
pub trait EventSubscription: Send {
	/// Next delivered event; `None` when the stream has ended.
	async fn next_event(&mut self) -> Option<Result<DecodedLog, LedgerError>>;

	/// Cancel the subscription.
	async fn detach(self: Box<Self>);
}

/// Supplemental contract reads needed by the projector.
#[async_trait]
pub trait ContractReader: Send + Sync {
	/// `maxStake` of a tier, which `TierCreated`/`TierUpdated` do not carry.
	async fn tier_max_stake(&self, tier_id: u128) -> Result<u128, LedgerError>;
}

/// `EventSource` backed by a JSON-RPC node.
#[derive(Clone)]
pub struct StakingEventSource {
	client: LedgerRpcClient,
	contract: Address,
	finality_depth: u64,
}

impl StakingEventSource {
	pub fn new(client: LedgerRpcClient, contract: Address, finality_depth: u64) -> Self {
		Self {
			client,
			contract,
			finality_depth,
		}
	}
}

/// Decode a raw log, dropping logs removed by a reorganisation.
fn decode_raw(raw: RpcLog) -> Option<DecodedLog> {
	if raw.removed {
		debug!("Dropping removed log {:?}", raw.transaction_hash);
		return None;
	}
	let block_number = raw
		.block_number
		.as_deref()
		.and_then(|b| super::types::parse_quantity(b).ok());
	let log_index = raw
		.log_index
		.as_deref()
		.and_then(|i| super::types::parse_quantity(i).ok());

	let decoded = Log::try_from(raw).and_then(|log| LedgerEvent::decode(&log));
	Some(match decoded {
		Ok(event) => DecodedLog::Event(event),
		Err(e) => DecodedLog::Malformed {
			block_number: block_number.unwrap_or_default(),
			log_index: log_index.unwrap_or_default(),
			reason: e.to_string(),
		},
	})
}

#[async_trait]
impl EventSource for StakingEventSource {
	async fn current_head(&self) -> Result<u64, LedgerError> {
		let latest = self.client.block_number().await?;
		Ok(latest.saturating_sub(self.finality_depth))
	}

	async fn query_range(
		&self,
		kind: EventKind,
		from: u64,
		to: u64,
	) -> Result<Vec<DecodedLog>, LedgerError> {
		let filter = LogFilter::new(&self.contract, &[kind.topic()]).with_range(from, to);
		let raw_logs = self.client.get_logs(&filter).await?;

		let mut decoded: Vec<DecodedLog> = raw_logs.into_iter().filter_map(decode_raw).collect();
		decoded.sort_by_key(DecodedLog::position);

		debug!(
			"{} {} logs in blocks {}..={}",
			decoded.len(),
			kind.name(),
			from,
			to
		);
		Ok(decoded)
	}

	fn supports_subscription(&self) -> bool {
		self.client.has_ws()
	}

	async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, LedgerError> {
		let topics: Vec<_> = EventKind::ALL.iter().map(EventKind::topic).collect();
		let filter = LogFilter::new(&self.contract, &topics);
		let inner = self.client.subscribe_logs(&filter).await?;
		Ok(Box::new(RpcEventSubscription { inner }))
	}
}

#[async_trait]
impl ContractReader for StakingEventSource {
	async fn tier_max_stake(&self, tier_id: u128) -> Result<u128, LedgerError> {
		let mut calldata = abi::selector("tiers(uint256)").to_vec();
		calldata.extend_from_slice(&abi::encode_uint(tier_id));

		let output = self.client.call(&self.contract, &calldata).await?;
		if output.is_empty() {
			return Err(LedgerError::NoData);
		}

		// (string name, uint256 minStake, uint256 maxStake, uint256 lockupPeriod, uint256 apy, bool isActive)
		let mut reader = AbiReader::new(&output);
		reader.raw()?;
		reader.uint()?;
		reader.uint()
	}
}

struct RpcEventSubscription {
	inner: LogSubscription,
}

#[async_trait]
impl EventSubscription for RpcEventSubscription {
	async fn next_event(&mut self) -> Option<Result<DecodedLog, LedgerError>> {
		loop {
			match self.inner.next_log().await? {
				Ok(raw) => {
					if let Some(decoded) = decode_raw(raw) {
						return Some(Ok(decoded));
					}
				}
				Err(LedgerError::JsonError(e)) => {
					warn!("Skipping undecodable notification: {}", e);
				}
				Err(e) => return Some(Err(e)),
			}
		}
	}

	async fn detach(self: Box<Self>) {
		self.inner.unsubscribe().await;
	}
}
