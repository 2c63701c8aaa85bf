//! Projection of staking events into store records.
//!
//! Each event kind maps to one keyed mutation. Creations check for an existing
//! row first and never overwrite it, so redelivering an event leaves the store
//! unchanged.

use std::sync::Arc;
use tracing::{debug, info};

use crate::ledger::ContractReader;
use crate::store::{
	Insertion, RecordStore, RewardClaimRecord, RewardTokenChanges, RewardTokenRecord,
	StakeRecord, TierChanges, TierRecord, TierRewardTokenRecord,
};
use crate::sync::events::{
	LedgerEvent, RewardClaimed, RewardTokenDetails, StakeWithdrawn, Staked, StakingEvent,
	TierCreated, TierRewardToken, TierUpdated,
};
use crate::sync::types::SyncError;
use crate::utils::{TOKEN_DECIMALS, format_token_amount};

/// What applying an event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
	Inserted,
	/// The natural key was already present; nothing was written.
	AlreadyExists,
	/// A keyed update or delete was issued.
	Written,
}

impl From<Insertion> for Projection {
	fn from(insertion: Insertion) -> Self {
		match insertion {
			Insertion::Inserted => Projection::Inserted,
			Insertion::Duplicate => Projection::AlreadyExists,
		}
	}
}

#[derive(Clone)]
pub struct RecordProjector {
	store: Arc<dyn RecordStore>,
	reader: Arc<dyn ContractReader>,
}

impl RecordProjector {
	pub fn new(store: Arc<dyn RecordStore>, reader: Arc<dyn ContractReader>) -> Self {
		Self { store, reader }
	}

	pub async fn apply(&self, event: &LedgerEvent) -> Result<Projection, SyncError> {
		let projection = match &event.event {
			StakingEvent::TierCreated(e) => self.tier_created(e).await?,
			StakingEvent::TierUpdated(e) => self.tier_updated(e).await?,
			StakingEvent::Staked(e) => self.staked(e).await?,
			StakingEvent::StakeWithdrawn(e) => self.stake_withdrawn(e).await?,
			StakingEvent::RewardClaimed(e) => self.reward_claimed(e, event).await?,
			StakingEvent::RewardTokenRegistered(e) => self.reward_token_registered(e).await?,
			StakingEvent::RewardTokenUpdated(e) => self.reward_token_updated(e).await?,
			StakingEvent::TierRewardTokenAdded(e) => self.tier_reward_token_added(e).await?,
			StakingEvent::TierRewardTokenRemoved(e) => self.tier_reward_token_removed(e).await?,
		};

		debug!(
			kind = event.kind().name(),
			block = event.block_number,
			log_index = event.log_index,
			"Applied event: {:?}",
			projection
		);
		Ok(projection)
	}

	async fn tier_created(&self, e: &TierCreated) -> Result<Projection, SyncError> {
		let id = e.tier_id.to_string();
		if self.store.find_tier(&id).await?.is_some() {
			info!("Tier {} already exists, skipping creation", id);
			return Ok(Projection::AlreadyExists);
		}

		let max_stake = self.reader.tier_max_stake(e.tier_id).await?;
		let tier = TierRecord {
			id,
			name: e.name.clone(),
			min_stake: format_token_amount(e.min_stake, TOKEN_DECIMALS),
			max_stake: format_token_amount(max_stake, TOKEN_DECIMALS),
			lockup_period: e.lockup_period.to_string(),
			apy: e.apy.to_string(),
			is_active: true,
		};
		Ok(self.store.insert_tier(&tier).await?.into())
	}

	async fn tier_updated(&self, e: &TierUpdated) -> Result<Projection, SyncError> {
		let max_stake = self.reader.tier_max_stake(e.tier_id).await?;
		let changes = TierChanges {
			name: e.name.clone(),
			min_stake: format_token_amount(e.min_stake, TOKEN_DECIMALS),
			max_stake: format_token_amount(max_stake, TOKEN_DECIMALS),
			lockup_period: e.lockup_period.to_string(),
			apy: e.apy.to_string(),
			is_active: e.is_active,
		};
		self.store
			.update_tier(&e.tier_id.to_string(), &changes)
			.await?;
		Ok(Projection::Written)
	}

	async fn staked(&self, e: &Staked) -> Result<Projection, SyncError> {
		let id = e.stake_id.to_string();
		if self.store.find_stake(&id).await?.is_some() {
			info!("Stake {} already exists, skipping creation", id);
			return Ok(Projection::AlreadyExists);
		}

		let stake = StakeRecord {
			id,
			owner: e.owner.to_string(),
			amount: format_token_amount(e.amount, TOKEN_DECIMALS),
			tier_id: e.tier_id.to_string(),
			start_time: e.start_time.to_string(),
			end_time: e.end_time.to_string(),
			has_withdrawn: false,
			has_claimed_rewards: false,
		};
		Ok(self.store.insert_stake(&stake).await?.into())
	}

	async fn stake_withdrawn(&self, e: &StakeWithdrawn) -> Result<Projection, SyncError> {
		self.store
			.mark_stake_withdrawn(&e.stake_id.to_string())
			.await?;
		Ok(Projection::Written)
	}

	async fn reward_claimed(
		&self,
		e: &RewardClaimed,
		event: &LedgerEvent,
	) -> Result<Projection, SyncError> {
		let stake_id = e.stake_id.to_string();
		let owner = e.owner.to_string();
		let token_address = e.token.to_string();

		let projection = match self
			.store
			.find_reward_claim(&stake_id, &owner, &token_address)
			.await?
		{
			Some(_) => {
				info!(
					"Reward claim for stake {} already exists, skipping creation",
					stake_id
				);
				Projection::AlreadyExists
			}
			None => {
				let claim = RewardClaimRecord {
					stake_id: stake_id.clone(),
					owner,
					token_address,
					amount: e.amount.to_string(),
					block_timestamp: event.block_number,
					transaction_hash: event.transaction_hash.clone(),
				};
				self.store.insert_reward_claim(&claim).await?.into()
			}
		};

		// Always set, so a crash between the two writes heals on redelivery
		self.store.mark_stake_claimed(&stake_id).await?;
		Ok(projection)
	}

	async fn reward_token_registered(
		&self,
		e: &RewardTokenDetails,
	) -> Result<Projection, SyncError> {
		let address = e.token_address.to_string();
		if self.store.find_reward_token(&address).await?.is_some() {
			info!("Reward token {} already exists, skipping creation", address);
			return Ok(Projection::AlreadyExists);
		}

		let token = RewardTokenRecord {
			address,
			symbol: e.symbol.clone(),
			reward_rate: e.reward_rate.to_string(),
			is_active: true,
		};
		Ok(self.store.insert_reward_token(&token).await?.into())
	}

	async fn reward_token_updated(&self, e: &RewardTokenDetails) -> Result<Projection, SyncError> {
		let changes = RewardTokenChanges {
			symbol: e.symbol.clone(),
			reward_rate: e.reward_rate.to_string(),
		};
		self.store
			.update_reward_token(&e.token_address.to_string(), &changes)
			.await?;
		Ok(Projection::Written)
	}

	async fn tier_reward_token_added(&self, e: &TierRewardToken) -> Result<Projection, SyncError> {
		let link = TierRewardTokenRecord {
			tier_id: e.tier_id.to_string(),
			token_address: e.token_address.to_string(),
		};
		if self
			.store
			.find_tier_reward_token(&link.tier_id, &link.token_address)
			.await?
			.is_some()
		{
			info!(
				"Tier reward token {} already exists for tier {}, skipping addition",
				link.token_address, link.tier_id
			);
			return Ok(Projection::AlreadyExists);
		}
		Ok(self.store.insert_tier_reward_token(&link).await?.into())
	}

	async fn tier_reward_token_removed(
		&self,
		e: &TierRewardToken,
	) -> Result<Projection, SyncError> {
		self.store
			.delete_tier_reward_token(&e.tier_id.to_string(), &e.token_address.to_string())
			.await?;
		Ok(Projection::Written)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::{Address, LedgerError};
	use crate::store::MemoryStore;
	use std::sync::atomic::{AtomicUsize, Ordering};

	const ETHER: u128 = 1_000_000_000_000_000_000;

	struct FixedReader {
		max_stake: std::sync::Mutex<u128>,
		calls: AtomicUsize,
	}

	#[async_trait::async_trait]
	impl ContractReader for FixedReader {
		async fn tier_max_stake(&self, _tier_id: u128) -> Result<u128, LedgerError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(*self.max_stake.lock().unwrap())
		}
	}

	fn projector() -> (RecordProjector, Arc<MemoryStore>, Arc<FixedReader>) {
		let store = Arc::new(MemoryStore::new());
		let reader = Arc::new(FixedReader {
			max_stake: std::sync::Mutex::new(1000 * ETHER),
			calls: AtomicUsize::new(0),
		});
		(
			RecordProjector::new(store.clone(), reader.clone()),
			store,
			reader,
		)
	}

	fn at(block_number: u64, event: StakingEvent) -> LedgerEvent {
		LedgerEvent {
			block_number,
			log_index: 0,
			transaction_hash: Some(format!("0x{:064x}", block_number)),
			event,
		}
	}

	fn staked(stake_id: u128, amount: u128) -> StakingEvent {
		StakingEvent::Staked(Staked {
			stake_id,
			owner: Address([0xab; 20]),
			amount,
			tier_id: 1,
			start_time: 100,
			end_time: 200,
		})
	}

	#[tokio::test]
	async fn tier_creation_reads_max_stake_and_is_idempotent() {
		let (projector, store, reader) = projector();
		let created = at(
			10,
			StakingEvent::TierCreated(TierCreated {
				tier_id: 1,
				name: "Bronze".to_string(),
				min_stake: ETHER / 2,
				lockup_period: 2_592_000,
				apy: 5,
			}),
		);

		assert_eq!(projector.apply(&created).await.unwrap(), Projection::Inserted);
		assert_eq!(
			projector.apply(&created).await.unwrap(),
			Projection::AlreadyExists
		);
		assert_eq!(reader.calls.load(Ordering::SeqCst), 1);

		let tiers = store.snapshot().tiers;
		assert_eq!(tiers.len(), 1);
		assert_eq!(tiers[0].min_stake, "0.5");
		assert_eq!(tiers[0].max_stake, "1000.0");
		assert!(tiers[0].is_active);
	}

	fn tier_created_event(tier_id: u128) -> StakingEvent {
		StakingEvent::TierCreated(TierCreated {
			tier_id,
			name: "Bronze".to_string(),
			min_stake: ETHER / 2,
			lockup_period: 2_592_000,
			apy: 5,
		})
	}

	fn token_details(symbol: &str, reward_rate: u128) -> RewardTokenDetails {
		RewardTokenDetails {
			token_address: Address([0xcd; 20]),
			symbol: symbol.to_string(),
			reward_rate,
		}
	}

	#[tokio::test]
	async fn tier_update_rereads_max_stake_and_sets_active_flag() {
		let (projector, store, reader) = projector();
		projector.apply(&at(10, tier_created_event(1))).await.unwrap();
		*reader.max_stake.lock().unwrap() = 2500 * ETHER;

		let updated = at(
			20,
			StakingEvent::TierUpdated(TierUpdated {
				tier_id: 1,
				name: "Silver".to_string(),
				min_stake: 2 * ETHER,
				lockup_period: 5_184_000,
				apy: 9,
				is_active: false,
			}),
		);
		assert_eq!(projector.apply(&updated).await.unwrap(), Projection::Written);
		assert_eq!(reader.calls.load(Ordering::SeqCst), 2);

		let after_first = store.snapshot();
		projector.apply(&updated).await.unwrap();
		assert_eq!(store.snapshot(), after_first);

		assert_eq!(
			after_first.tiers,
			vec![TierRecord {
				id: "1".to_string(),
				name: "Silver".to_string(),
				min_stake: "2.0".to_string(),
				max_stake: "2500.0".to_string(),
				lockup_period: "5184000".to_string(),
				apy: "9".to_string(),
				is_active: false,
			}]
		);
	}

	#[tokio::test]
	async fn reward_token_registration_keeps_first_delivery() {
		let (projector, store, _) = projector();
		let first = at(
			10,
			StakingEvent::RewardTokenRegistered(token_details("RWD", 150)),
		);
		let second = at(
			11,
			StakingEvent::RewardTokenRegistered(token_details("OTHER", 999)),
		);

		assert_eq!(projector.apply(&first).await.unwrap(), Projection::Inserted);
		assert_eq!(
			projector.apply(&second).await.unwrap(),
			Projection::AlreadyExists
		);

		let tokens = store.snapshot().reward_tokens;
		assert_eq!(
			tokens,
			vec![RewardTokenRecord {
				address: Address([0xcd; 20]).to_string(),
				symbol: "RWD".to_string(),
				reward_rate: "150".to_string(),
				is_active: true,
			}]
		);
	}

	#[tokio::test]
	async fn reward_token_update_rewrites_symbol_and_rate() {
		let (projector, store, _) = projector();
		projector
			.apply(&at(
				10,
				StakingEvent::RewardTokenRegistered(token_details("RWD", 150)),
			))
			.await
			.unwrap();

		let updated = at(
			20,
			StakingEvent::RewardTokenUpdated(token_details("RWD2", 300)),
		);
		assert_eq!(projector.apply(&updated).await.unwrap(), Projection::Written);
		projector.apply(&updated).await.unwrap();

		let tokens = store.snapshot().reward_tokens;
		assert_eq!(tokens.len(), 1);
		assert_eq!(tokens[0].symbol, "RWD2");
		assert_eq!(tokens[0].reward_rate, "300");
		assert!(tokens[0].is_active);
	}

	#[tokio::test]
	async fn duplicate_stake_keeps_first_delivery() {
		let (projector, store, _) = projector();
		projector.apply(&at(10, staked(7, 5 * ETHER))).await.unwrap();
		let second = projector.apply(&at(11, staked(7, 9 * ETHER))).await.unwrap();

		assert_eq!(second, Projection::AlreadyExists);
		let stakes = store.snapshot().stakes;
		assert_eq!(stakes.len(), 1);
		assert_eq!(stakes[0].amount, "5.0");
		assert_eq!(stakes[0].owner, Address([0xab; 20]).to_string());
	}

	#[tokio::test]
	async fn reward_claim_marks_stake_and_is_recorded_once() {
		let (projector, store, _) = projector();
		projector.apply(&at(10, staked(7, ETHER))).await.unwrap();

		let claim = at(
			12,
			StakingEvent::RewardClaimed(RewardClaimed {
				stake_id: 7,
				owner: Address([0xab; 20]),
				token: Address([0xcd; 20]),
				amount: 42,
			}),
		);
		assert_eq!(projector.apply(&claim).await.unwrap(), Projection::Inserted);
		let after_first = store.snapshot();
		assert_eq!(
			projector.apply(&claim).await.unwrap(),
			Projection::AlreadyExists
		);

		let snapshot = store.snapshot();
		assert_eq!(snapshot, after_first);
		assert!(snapshot.stakes[0].has_claimed_rewards);
		assert_eq!(snapshot.reward_claims.len(), 1);
		assert_eq!(snapshot.reward_claims[0].amount, "42");
		assert_eq!(snapshot.reward_claims[0].block_timestamp, 12);
	}

	#[tokio::test]
	async fn claim_flag_heals_when_claim_row_already_exists() {
		let (projector, store, _) = projector();
		projector.apply(&at(10, staked(7, ETHER))).await.unwrap();
		store
			.insert_reward_claim(&RewardClaimRecord {
				stake_id: "7".to_string(),
				owner: Address([0xab; 20]).to_string(),
				token_address: Address([0xcd; 20]).to_string(),
				amount: "42".to_string(),
				block_timestamp: 12,
				transaction_hash: None,
			})
			.await
			.unwrap();

		let claim = at(
			12,
			StakingEvent::RewardClaimed(RewardClaimed {
				stake_id: 7,
				owner: Address([0xab; 20]),
				token: Address([0xcd; 20]),
				amount: 42,
			}),
		);
		projector.apply(&claim).await.unwrap();
		assert!(store.snapshot().stakes[0].has_claimed_rewards);
	}

	#[tokio::test]
	async fn tier_reward_token_link_is_added_and_removed() {
		let (projector, store, _) = projector();
		let link = TierRewardToken {
			tier_id: 2,
			token_address: Address([0x01; 20]),
		};

		projector
			.apply(&at(1, StakingEvent::TierRewardTokenAdded(link.clone())))
			.await
			.unwrap();
		assert_eq!(store.snapshot().tier_reward_tokens.len(), 1);

		for _ in 0..2 {
			assert_eq!(
				projector
					.apply(&at(2, StakingEvent::TierRewardTokenRemoved(link.clone())))
					.await
					.unwrap(),
				Projection::Written
			);
		}
		assert!(store.snapshot().tier_reward_tokens.is_empty());
	}

	#[tokio::test]
	async fn store_failures_surface_as_retryable_errors() {
		let (projector, store, _) = projector();
		store.fail_after(0);

		let err = projector.apply(&at(1, staked(1, ETHER))).await.unwrap_err();
		assert!(matches!(err, SyncError::Store(_)));
		assert!(!err.is_fatal());
	}
}
