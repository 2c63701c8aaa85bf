//! Staking contract event catalog.
//!
//! `EventKind` is the closed set of events the indexer consumes, listed in the
//! order they are queried and applied within a range. `StakingEvent` carries the
//! typed payload of each kind, and `LedgerEvent` adds the log position.

use crate::ledger::abi::{self, AbiReader};
use crate::ledger::{Address, H256, LedgerError, Log};

/// Event kinds, in declared processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
	TierCreated,
	TierUpdated,
	Staked,
	StakeWithdrawn,
	RewardClaimed,
	RewardTokenRegistered,
	RewardTokenUpdated,
	TierRewardTokenAdded,
	TierRewardTokenRemoved,
}

impl EventKind {
	/// Every kind, in the order ranges are processed.
	pub const ALL: [EventKind; 9] = [
		EventKind::TierCreated,
		EventKind::TierUpdated,
		EventKind::Staked,
		EventKind::StakeWithdrawn,
		EventKind::RewardClaimed,
		EventKind::RewardTokenRegistered,
		EventKind::RewardTokenUpdated,
		EventKind::TierRewardTokenAdded,
		EventKind::TierRewardTokenRemoved,
	];

	pub fn name(&self) -> &'static str {
		match self {
			EventKind::TierCreated => "TierCreated",
			EventKind::TierUpdated => "TierUpdated",
			EventKind::Staked => "Staked",
			EventKind::StakeWithdrawn => "StakeWithdrawn",
			EventKind::RewardClaimed => "RewardClaimed",
			EventKind::RewardTokenRegistered => "RewardTokenRegistered",
			EventKind::RewardTokenUpdated => "RewardTokenUpdated",
			EventKind::TierRewardTokenAdded => "TierRewardTokenAdded",
			EventKind::TierRewardTokenRemoved => "TierRewardTokenRemoved",
		}
	}

	/// Canonical Solidity signature, hashed into topic 0.
	pub fn signature(&self) -> &'static str {
		match self {
			EventKind::TierCreated => "TierCreated(uint256,string,uint256,uint256,uint256)",
			EventKind::TierUpdated => "TierUpdated(uint256,string,uint256,uint256,uint256,bool)",
			EventKind::Staked => "Staked(uint256,address,uint256,uint256,uint256,uint256)",
			EventKind::StakeWithdrawn => "StakeWithdrawn(uint256,address,uint256)",
			EventKind::RewardClaimed => "RewardClaimed(uint256,address,address,uint256)",
			EventKind::RewardTokenRegistered => "RewardTokenRegistered(address,string,uint256)",
			EventKind::RewardTokenUpdated => "RewardTokenUpdated(address,string,uint256)",
			EventKind::TierRewardTokenAdded => "TierRewardTokenAdded(uint256,address)",
			EventKind::TierRewardTokenRemoved => "TierRewardTokenRemoved(uint256,address)",
		}
	}

	pub fn topic(&self) -> H256 {
		abi::event_topic(self.signature())
	}

	pub fn from_topic(topic: &H256) -> Option<EventKind> {
		EventKind::ALL.into_iter().find(|kind| kind.topic() == *topic)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCreated {
	pub tier_id: u128,
	pub name: String,
	pub min_stake: u128,
	pub lockup_period: u128,
	pub apy: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierUpdated {
	pub tier_id: u128,
	pub name: String,
	pub min_stake: u128,
	pub lockup_period: u128,
	pub apy: u128,
	pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staked {
	pub stake_id: u128,
	pub owner: Address,
	pub amount: u128,
	pub tier_id: u128,
	pub start_time: u128,
	pub end_time: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeWithdrawn {
	pub stake_id: u128,
	pub owner: Address,
	pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardClaimed {
	pub stake_id: u128,
	pub owner: Address,
	pub token: Address,
	pub amount: u128,
}

/// Payload shared by `RewardTokenRegistered` and `RewardTokenUpdated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardTokenDetails {
	pub token_address: Address,
	pub symbol: String,
	pub reward_rate: u128,
}

/// Payload shared by `TierRewardTokenAdded` and `TierRewardTokenRemoved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRewardToken {
	pub tier_id: u128,
	pub token_address: Address,
}

/// Decoded staking contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakingEvent {
	TierCreated(TierCreated),
	TierUpdated(TierUpdated),
	Staked(Staked),
	StakeWithdrawn(StakeWithdrawn),
	RewardClaimed(RewardClaimed),
	RewardTokenRegistered(RewardTokenDetails),
	RewardTokenUpdated(RewardTokenDetails),
	TierRewardTokenAdded(TierRewardToken),
	TierRewardTokenRemoved(TierRewardToken),
}

impl StakingEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			StakingEvent::TierCreated(_) => EventKind::TierCreated,
			StakingEvent::TierUpdated(_) => EventKind::TierUpdated,
			StakingEvent::Staked(_) => EventKind::Staked,
			StakingEvent::StakeWithdrawn(_) => EventKind::StakeWithdrawn,
			StakingEvent::RewardClaimed(_) => EventKind::RewardClaimed,
			StakingEvent::RewardTokenRegistered(_) => EventKind::RewardTokenRegistered,
			StakingEvent::RewardTokenUpdated(_) => EventKind::RewardTokenUpdated,
			StakingEvent::TierRewardTokenAdded(_) => EventKind::TierRewardTokenAdded,
			StakingEvent::TierRewardTokenRemoved(_) => EventKind::TierRewardTokenRemoved,
		}
	}

	/// Decode the payload of a log already known to be of `kind`.
	pub fn decode(kind: EventKind, log: &Log) -> Result<StakingEvent, LedgerError> {
		let topics = Topics::new(kind, log)?;
		let mut data = AbiReader::new(&log.data);

		let event = match kind {
			EventKind::TierCreated => StakingEvent::TierCreated(TierCreated {
				tier_id: topics.uint(1)?,
				name: data.string()?,
				min_stake: data.uint()?,
				lockup_period: data.uint()?,
				apy: data.uint()?,
			}),
			EventKind::TierUpdated => StakingEvent::TierUpdated(TierUpdated {
				tier_id: topics.uint(1)?,
				name: data.string()?,
				min_stake: data.uint()?,
				lockup_period: data.uint()?,
				apy: data.uint()?,
				is_active: data.boolean()?,
			}),
			EventKind::Staked => StakingEvent::Staked(Staked {
				stake_id: topics.uint(1)?,
				owner: topics.address(2)?,
				amount: data.uint()?,
				tier_id: data.uint()?,
				start_time: data.uint()?,
				end_time: data.uint()?,
			}),
			EventKind::StakeWithdrawn => StakingEvent::StakeWithdrawn(StakeWithdrawn {
				stake_id: topics.uint(1)?,
				owner: topics.address(2)?,
				amount: data.uint()?,
			}),
			EventKind::RewardClaimed => StakingEvent::RewardClaimed(RewardClaimed {
				stake_id: topics.uint(1)?,
				owner: topics.address(2)?,
				token: topics.address(3)?,
				amount: data.uint()?,
			}),
			EventKind::RewardTokenRegistered => {
				StakingEvent::RewardTokenRegistered(RewardTokenDetails {
					token_address: topics.address(1)?,
					symbol: data.string()?,
					reward_rate: data.uint()?,
				})
			}
			EventKind::RewardTokenUpdated => StakingEvent::RewardTokenUpdated(RewardTokenDetails {
				token_address: topics.address(1)?,
				symbol: data.string()?,
				reward_rate: data.uint()?,
			}),
			EventKind::TierRewardTokenAdded => StakingEvent::TierRewardTokenAdded(TierRewardToken {
				tier_id: topics.uint(1)?,
				token_address: topics.address(2)?,
			}),
			EventKind::TierRewardTokenRemoved => {
				StakingEvent::TierRewardTokenRemoved(TierRewardToken {
					tier_id: topics.uint(1)?,
					token_address: topics.address(2)?,
				})
			}
		};
		Ok(event)
	}
}

/// Indexed parameters of a log, checked against the expected kind.
struct Topics<'a> {
	kind: EventKind,
	topics: &'a [H256],
}

impl<'a> Topics<'a> {
	fn new(kind: EventKind, log: &'a Log) -> Result<Self, LedgerError> {
		match log.topics.first() {
			Some(topic) if *topic == kind.topic() => Ok(Self {
				kind,
				topics: &log.topics,
			}),
			_ => Err(LedgerError::Decode(format!(
				"log is not a {} event",
				kind.name()
			))),
		}
	}

	fn word(&self, index: usize) -> Result<&[u8; 32], LedgerError> {
		self.topics.get(index).map(|t| &t.0).ok_or_else(|| {
			LedgerError::Decode(format!(
				"{} is missing indexed topic {}",
				self.kind.name(),
				index
			))
		})
	}

	fn uint(&self, index: usize) -> Result<u128, LedgerError> {
		abi::word_to_u128(self.word(index)?)
	}

	fn address(&self, index: usize) -> Result<Address, LedgerError> {
		abi::word_to_address(self.word(index)?)
	}
}

/// A staking event with its position in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
	pub block_number: u64,
	pub log_index: u64,
	pub transaction_hash: Option<String>,
	pub event: StakingEvent,
}

impl LedgerEvent {
	/// Decode a log, identifying its kind from topic 0.
	pub fn decode(log: &Log) -> Result<LedgerEvent, LedgerError> {
		let kind = log
			.topics
			.first()
			.and_then(EventKind::from_topic)
			.ok_or_else(|| LedgerError::Decode("log has an unknown event signature".to_string()))?;

		Ok(LedgerEvent {
			block_number: log.block_number,
			log_index: log.log_index,
			transaction_hash: log.transaction_hash.clone(),
			event: StakingEvent::decode(kind, log)?,
		})
	}

	pub fn kind(&self) -> EventKind {
		self.event.kind()
	}

	pub fn position(&self) -> (u64, u64) {
		(self.block_number, self.log_index)
	}
}

/// Outcome of decoding one delivered log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLog {
	Event(LedgerEvent),
	/// The log matched a filter but its payload did not fit the schema.
	Malformed {
		block_number: u64,
		log_index: u64,
		reason: String,
	},
}

impl DecodedLog {
	pub fn position(&self) -> (u64, u64) {
		match self {
			DecodedLog::Event(event) => event.position(),
			DecodedLog::Malformed {
				block_number,
				log_index,
				..
			} => (*block_number, *log_index),
		}
	}
}

impl From<LedgerEvent> for DecodedLog {
	fn from(event: LedgerEvent) -> Self {
		DecodedLog::Event(event)
	}
}
