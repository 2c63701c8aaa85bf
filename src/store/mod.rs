//! Relational store for projected staking records.
//!
//! `RecordStore` is the seam between the projector and the backing tables. Every
//! operation is keyed by the record's natural key: lookups return the stored key
//! as an `Option`, inserts report duplicates instead of overwriting, and deletes of missing
//! rows are no-ops.

/// In-memory store for dry runs and tests
mod memory;
/// PostgREST (Supabase) client
mod postgrest;
/// Row types and errors
mod types;

pub use memory::{MemoryStore, StoreSnapshot};
pub use postgrest::PostgrestStore;
pub use types::*;

use async_trait::async_trait;

#[async_trait]
pub trait RecordStore: Send + Sync {
	async fn find_tier(&self, id: &str) -> Result<Option<StoredKey>, StoreError>;
	async fn insert_tier(&self, tier: &TierRecord) -> Result<Insertion, StoreError>;
	async fn update_tier(&self, id: &str, changes: &TierChanges) -> Result<(), StoreError>;

	async fn find_stake(&self, id: &str) -> Result<Option<StoredKey>, StoreError>;
	async fn insert_stake(&self, stake: &StakeRecord) -> Result<Insertion, StoreError>;
	async fn mark_stake_withdrawn(&self, id: &str) -> Result<(), StoreError>;
	async fn mark_stake_claimed(&self, id: &str) -> Result<(), StoreError>;

	async fn find_reward_token(&self, address: &str)
	-> Result<Option<StoredKey>, StoreError>;
	async fn insert_reward_token(&self, token: &RewardTokenRecord)
	-> Result<Insertion, StoreError>;
	async fn update_reward_token(
		&self,
		address: &str,
		changes: &RewardTokenChanges,
	) -> Result<(), StoreError>;

	async fn find_tier_reward_token(
		&self,
		tier_id: &str,
		token_address: &str,
	) -> Result<Option<StoredKey>, StoreError>;
	async fn insert_tier_reward_token(
		&self,
		link: &TierRewardTokenRecord,
	) -> Result<Insertion, StoreError>;
	async fn delete_tier_reward_token(
		&self,
		tier_id: &str,
		token_address: &str,
	) -> Result<(), StoreError>;

	async fn find_reward_claim(
		&self,
		stake_id: &str,
		owner: &str,
		token_address: &str,
	) -> Result<Option<StoredKey>, StoreError>;
	async fn insert_reward_claim(&self, claim: &RewardClaimRecord)
	-> Result<Insertion, StoreError>;
}
