//! Row types and errors for the projected record store

use serde::Serialize;

/// Row of the `tiers` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierRecord {
	pub id: String,
	pub name: String,
	pub min_stake: String,
	pub max_stake: String,
	pub lockup_period: String,
	pub apy: String,
	pub is_active: bool,
}

/// Fields rewritten by a tier update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierChanges {
	pub name: String,
	pub min_stake: String,
	pub max_stake: String,
	pub lockup_period: String,
	pub apy: String,
	pub is_active: bool,
}

/// Row of the `stakes` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StakeRecord {
	pub id: String,
	pub owner: String,
	pub amount: String,
	pub tier_id: String,
	pub start_time: String,
	pub end_time: String,
	pub has_withdrawn: bool,
	pub has_claimed_rewards: bool,
}

/// Row of the `reward_tokens` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardTokenRecord {
	pub address: String,
	pub symbol: String,
	pub reward_rate: String,
	pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardTokenChanges {
	pub symbol: String,
	pub reward_rate: String,
}

/// Row of the `tier_reward_tokens` link table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TierRewardTokenRecord {
	pub tier_id: String,
	pub token_address: String,
}

/// Row of the `reward_claims` table.
///
/// `block_timestamp` holds the block number the claim was observed at, which is
/// what existing rows in the table contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardClaimRecord {
	pub stake_id: String,
	pub owner: String,
	pub token_address: String,
	pub amount: String,
	pub block_timestamp: u64,
	pub transaction_hash: Option<String>,
}

/// Natural key of a row found by a lookup, one value per key column.
///
/// Only key columns are read back; other columns may be stored as text or as
/// numbers depending on who wrote the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey(pub Vec<String>);

impl StoredKey {
	pub fn new(parts: &[&str]) -> Self {
		Self(parts.iter().map(|part| part.to_string()).collect())
	}
}

/// Outcome of an insert keyed by a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
	Inserted,
	/// A row with the same natural key already exists.
	Duplicate,
}

/// Errors from the record store. All of them are retryable.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("Store rejected request on {table} with status {status}: {body}")]
	Rejected {
		table: String,
		status: u16,
		body: String,
	},

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Store unavailable: {0}")]
	Unavailable(String),
}
