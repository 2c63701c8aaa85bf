//! In-memory record store.
//!
//! Used for `STORE_BACKEND=memory` dry runs and by the integration tests. Writes
//! can be made to fail after a given number of successes to simulate a store
//! outage in the middle of a range.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::RecordStore;
use super::types::*;

#[derive(Debug, Default)]
struct Tables {
	tiers: BTreeMap<String, TierRecord>,
	stakes: BTreeMap<String, StakeRecord>,
	reward_tokens: BTreeMap<String, RewardTokenRecord>,
	tier_reward_tokens: BTreeMap<(String, String), TierRewardTokenRecord>,
	reward_claims: BTreeMap<(String, String, String), RewardClaimRecord>,
	/// Writes still allowed before every write fails; `None` means unlimited.
	writes_remaining: Option<usize>,
	writes: usize,
}

/// Contents of every table, in natural key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
	pub tiers: Vec<TierRecord>,
	pub stakes: Vec<StakeRecord>,
	pub reward_tokens: Vec<RewardTokenRecord>,
	pub tier_reward_tokens: Vec<TierRewardTokenRecord>,
	pub reward_claims: Vec<RewardClaimRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
	tables: Mutex<Tables>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
		self.tables
			.lock()
			.map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
	}

	/// Lock the tables for a write, consuming one allowed write.
	fn writable(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
		let mut tables = self.tables()?;
		if let Some(remaining) = tables.writes_remaining.as_mut() {
			if *remaining == 0 {
				return Err(StoreError::Unavailable("injected write failure".to_string()));
			}
			*remaining -= 1;
		}
		tables.writes += 1;
		Ok(tables)
	}

	/// Let `writes` more writes succeed, then fail every write.
	pub fn fail_after(&self, writes: usize) {
		if let Ok(mut tables) = self.tables.lock() {
			tables.writes_remaining = Some(writes);
		}
	}

	pub fn clear_failures(&self) {
		if let Ok(mut tables) = self.tables.lock() {
			tables.writes_remaining = None;
		}
	}

	/// Number of successful writes so far, including no-op updates.
	pub fn write_count(&self) -> usize {
		self.tables.lock().map(|t| t.writes).unwrap_or_default()
	}

	pub fn snapshot(&self) -> StoreSnapshot {
		match self.tables.lock() {
			Ok(tables) => StoreSnapshot {
				tiers: tables.tiers.values().cloned().collect(),
				stakes: tables.stakes.values().cloned().collect(),
				reward_tokens: tables.reward_tokens.values().cloned().collect(),
				tier_reward_tokens: tables.tier_reward_tokens.values().cloned().collect(),
				reward_claims: tables.reward_claims.values().cloned().collect(),
			},
			Err(_) => StoreSnapshot::default(),
		}
	}
}

fn insert_new<K: Ord, V: Clone>(table: &mut BTreeMap<K, V>, key: K, value: &V) -> Insertion {
	if table.contains_key(&key) {
		return Insertion::Duplicate;
	}
	table.insert(key, value.clone());
	Insertion::Inserted
}

#[async_trait]
impl RecordStore for MemoryStore {
	async fn find_tier(&self, id: &str) -> Result<Option<StoredKey>, StoreError> {
		Ok(self.tables()?.tiers.get(id).map(|_| StoredKey::new(&[id])))
	}

	async fn insert_tier(&self, tier: &TierRecord) -> Result<Insertion, StoreError> {
		let mut tables = self.writable()?;
		Ok(insert_new(&mut tables.tiers, tier.id.clone(), tier))
	}

	async fn update_tier(&self, id: &str, changes: &TierChanges) -> Result<(), StoreError> {
		let mut tables = self.writable()?;
		if let Some(tier) = tables.tiers.get_mut(id) {
			tier.name = changes.name.clone();
			tier.min_stake = changes.min_stake.clone();
			tier.max_stake = changes.max_stake.clone();
			tier.lockup_period = changes.lockup_period.clone();
			tier.apy = changes.apy.clone();
			tier.is_active = changes.is_active;
		}
		Ok(())
	}

	async fn find_stake(&self, id: &str) -> Result<Option<StoredKey>, StoreError> {
		Ok(self.tables()?.stakes.get(id).map(|_| StoredKey::new(&[id])))
	}

	async fn insert_stake(&self, stake: &StakeRecord) -> Result<Insertion, StoreError> {
		let mut tables = self.writable()?;
		Ok(insert_new(&mut tables.stakes, stake.id.clone(), stake))
	}

	async fn mark_stake_withdrawn(&self, id: &str) -> Result<(), StoreError> {
		let mut tables = self.writable()?;
		if let Some(stake) = tables.stakes.get_mut(id) {
			stake.has_withdrawn = true;
		}
		Ok(())
	}

	async fn mark_stake_claimed(&self, id: &str) -> Result<(), StoreError> {
		let mut tables = self.writable()?;
		if let Some(stake) = tables.stakes.get_mut(id) {
			stake.has_claimed_rewards = true;
		}
		Ok(())
	}

	async fn find_reward_token(
		&self,
		address: &str,
	) -> Result<Option<StoredKey>, StoreError> {
		Ok(self
			.tables()?
			.reward_tokens
			.get(address)
			.map(|_| StoredKey::new(&[address])))
	}

	async fn insert_reward_token(
		&self,
		token: &RewardTokenRecord,
	) -> Result<Insertion, StoreError> {
		let mut tables = self.writable()?;
		Ok(insert_new(
			&mut tables.reward_tokens,
			token.address.clone(),
			token,
		))
	}

	async fn update_reward_token(
		&self,
		address: &str,
		changes: &RewardTokenChanges,
	) -> Result<(), StoreError> {
		let mut tables = self.writable()?;
		if let Some(token) = tables.reward_tokens.get_mut(address) {
			token.symbol = changes.symbol.clone();
			token.reward_rate = changes.reward_rate.clone();
		}
		Ok(())
	}

	async fn find_tier_reward_token(
		&self,
		tier_id: &str,
		token_address: &str,
	) -> Result<Option<StoredKey>, StoreError> {
		let key = (tier_id.to_string(), token_address.to_string());
		Ok(self
			.tables()?
			.tier_reward_tokens
			.get(&key)
			.map(|_| StoredKey::new(&[tier_id, token_address])))
	}

	async fn insert_tier_reward_token(
		&self,
		link: &TierRewardTokenRecord,
	) -> Result<Insertion, StoreError> {
		let mut tables = self.writable()?;
		let key = (link.tier_id.clone(), link.token_address.clone());
		Ok(insert_new(&mut tables.tier_reward_tokens, key, link))
	}

	async fn delete_tier_reward_token(
		&self,
		tier_id: &str,
		token_address: &str,
	) -> Result<(), StoreError> {
		let mut tables = self.writable()?;
		let key = (tier_id.to_string(), token_address.to_string());
		tables.tier_reward_tokens.remove(&key);
		Ok(())
	}

	async fn find_reward_claim(
		&self,
		stake_id: &str,
		owner: &str,
		token_address: &str,
	) -> Result<Option<StoredKey>, StoreError> {
		let key = (
			stake_id.to_string(),
			owner.to_string(),
			token_address.to_string(),
		);
		Ok(self
			.tables()?
			.reward_claims
			.get(&key)
			.map(|_| StoredKey::new(&[stake_id, owner, token_address])))
	}

	async fn insert_reward_claim(
		&self,
		claim: &RewardClaimRecord,
	) -> Result<Insertion, StoreError> {
		let mut tables = self.writable()?;
		let key = (
			claim.stake_id.clone(),
			claim.owner.clone(),
			claim.token_address.clone(),
		);
		Ok(insert_new(&mut tables.reward_claims, key, claim))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn link() -> TierRewardTokenRecord {
		TierRewardTokenRecord {
			tier_id: "1".to_string(),
			token_address: "0xToken".to_string(),
		}
	}

	#[tokio::test]
	async fn inserts_are_keyed_and_never_overwrite() {
		let store = MemoryStore::new();
		assert_eq!(
			store.insert_tier_reward_token(&link()).await.unwrap(),
			Insertion::Inserted
		);
		assert_eq!(
			store.insert_tier_reward_token(&link()).await.unwrap(),
			Insertion::Duplicate
		);
		assert_eq!(store.snapshot().tier_reward_tokens, vec![link()]);
	}

	#[tokio::test]
	async fn deleting_a_missing_row_is_a_no_op() {
		let store = MemoryStore::new();
		store
			.delete_tier_reward_token("1", "0xToken")
			.await
			.unwrap();
		assert_eq!(store.snapshot(), StoreSnapshot::default());
	}

	#[tokio::test]
	async fn injected_failures_stop_writes_until_cleared() {
		let store = MemoryStore::new();
		store.fail_after(1);
		store.insert_tier_reward_token(&link()).await.unwrap();
		assert!(matches!(
			store.delete_tier_reward_token("1", "0xToken").await,
			Err(StoreError::Unavailable(_))
		));
		assert!(store.find_tier_reward_token("1", "0xToken").await.unwrap().is_some());

		store.clear_failures();
		store.delete_tier_reward_token("1", "0xToken").await.unwrap();
		assert_eq!(store.write_count(), 2);
	}
}
