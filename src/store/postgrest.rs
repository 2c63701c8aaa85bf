//!
//! PostgREST client for the Supabase-hosted staking tables.
//!
//! Lookups are `GET /rest/v1/<table>?col=eq.value&select=col&limit=1`, inserts are
//! `POST` with `Prefer: return=minimal`, updates are `PATCH` and deletes are
//! `DELETE`, all filtered by natural key.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::RecordStore;
use super::types::*;

const TIERS: &str = "tiers";
const STAKES: &str = "stakes";
const REWARD_TOKENS: &str = "reward_tokens";
const TIER_REWARD_TOKENS: &str = "tier_reward_tokens";
const REWARD_CLAIMS: &str = "reward_claims";

/// Record store backed by a PostgREST endpoint.
#[derive(Clone)]
pub struct PostgrestStore {
	http_client: Client,
	/// `<SUPABASE_URL>/rest/v1`
	rest_url: String,
	api_key: String,
}

impl PostgrestStore {
	pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, StoreError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			rest_url: format!("{}/rest/v1", base_url.trim_end_matches('/')),
			api_key,
		})
	}

	fn request(&self, method: reqwest::Method, table: &str, filters: &[(&str, &str)]) -> RequestBuilder {
		let query: Vec<(String, String)> = filters
			.iter()
			.map(|(column, value)| (column.to_string(), format!("eq.{}", value)))
			.collect();

		self.http_client
			.request(method, format!("{}/{}", self.rest_url, table))
			.header("apikey", &self.api_key)
			.header("Authorization", format!("Bearer {}", self.api_key))
			.query(&query)
	}

	async fn ensure_success(table: &str, response: Response) -> Result<Response, StoreError> {
		let status = response.status();
		if status.is_success() {
			return Ok(response);
		}
		let body = response.text().await.unwrap_or_default();
		Err(StoreError::Rejected {
			table: table.to_string(),
			status: status.as_u16(),
			body,
		})
	}

	/// Probe for a row matching `filters`, reading back only the key columns.
	async fn select_key(
		&self,
		table: &str,
		filters: &[(&str, &str)],
	) -> Result<Option<StoredKey>, StoreError> {
		let columns: Vec<&str> = filters.iter().map(|(column, _)| *column).collect();
		let response = self
			.request(reqwest::Method::GET, table, filters)
			.query(&[("select", columns.join(",").as_str()), ("limit", "1")])
			.send()
			.await?;
		let response = Self::ensure_success(table, response).await?;

		first_key(&response.bytes().await?, &columns)
	}

	async fn insert<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<Insertion, StoreError> {
		let response = self
			.request(reqwest::Method::POST, table, &[])
			.header("Prefer", "return=minimal")
			.json(row)
			.send()
			.await?;

		if response.status() == StatusCode::CONFLICT {
			debug!("Insert into {} conflicted with an existing row", table);
			return Ok(Insertion::Duplicate);
		}
		Self::ensure_success(table, response).await?;
		Ok(Insertion::Inserted)
	}

	async fn patch<T: Serialize + Sync>(
		&self,
		table: &str,
		filters: &[(&str, &str)],
		changes: &T,
	) -> Result<(), StoreError> {
		let response = self
			.request(reqwest::Method::PATCH, table, filters)
			.header("Prefer", "return=minimal")
			.json(changes)
			.send()
			.await?;
		Self::ensure_success(table, response).await?;
		Ok(())
	}

	async fn delete(&self, table: &str, filters: &[(&str, &str)]) -> Result<(), StoreError> {
		let response = self
			.request(reqwest::Method::DELETE, table, filters)
			.send()
			.await?;
		Self::ensure_success(table, response).await?;
		Ok(())
	}
}

/// Key of the first row in a PostgREST response body. Key values stored as
/// numbers render as their JSON text.
fn first_key(body: &[u8], columns: &[&str]) -> Result<Option<StoredKey>, StoreError> {
	let rows: Vec<Map<String, Value>> = serde_json::from_slice(body)?;
	let Some(row) = rows.into_iter().next() else {
		return Ok(None);
	};

	let parts = columns
		.iter()
		.map(|column| match row.get(*column) {
			Some(Value::String(value)) => value.clone(),
			Some(Value::Null) | None => String::new(),
			Some(other) => other.to_string(),
		})
		.collect();
	Ok(Some(StoredKey(parts)))
}

#[derive(Serialize)]
struct StakeFlag {
	#[serde(skip_serializing_if = "Option::is_none")]
	has_withdrawn: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	has_claimed_rewards: Option<bool>,
}

#[async_trait]
impl RecordStore for PostgrestStore {
	async fn find_tier(&self, id: &str) -> Result<Option<StoredKey>, StoreError> {
		self.select_key(TIERS, &[("id", id)]).await
	}

	async fn insert_tier(&self, tier: &TierRecord) -> Result<Insertion, StoreError> {
		self.insert(TIERS, tier).await
	}

	async fn update_tier(&self, id: &str, changes: &TierChanges) -> Result<(), StoreError> {
		self.patch(TIERS, &[("id", id)], changes).await
	}

	async fn find_stake(&self, id: &str) -> Result<Option<StoredKey>, StoreError> {
		self.select_key(STAKES, &[("id", id)]).await
	}

	async fn insert_stake(&self, stake: &StakeRecord) -> Result<Insertion, StoreError> {
		self.insert(STAKES, stake).await
	}

	async fn mark_stake_withdrawn(&self, id: &str) -> Result<(), StoreError> {
		let flag = StakeFlag {
			has_withdrawn: Some(true),
			has_claimed_rewards: None,
		};
		self.patch(STAKES, &[("id", id)], &flag).await
	}

	async fn mark_stake_claimed(&self, id: &str) -> Result<(), StoreError> {
		let flag = StakeFlag {
			has_withdrawn: None,
			has_claimed_rewards: Some(true),
		};
		self.patch(STAKES, &[("id", id)], &flag).await
	}

	async fn find_reward_token(
		&self,
		address: &str,
	) -> Result<Option<StoredKey>, StoreError> {
		self.select_key(REWARD_TOKENS, &[("address", address)]).await
	}

	async fn insert_reward_token(
		&self,
		token: &RewardTokenRecord,
	) -> Result<Insertion, StoreError> {
		self.insert(REWARD_TOKENS, token).await
	}

	async fn update_reward_token(
		&self,
		address: &str,
		changes: &RewardTokenChanges,
	) -> Result<(), StoreError> {
		self.patch(REWARD_TOKENS, &[("address", address)], changes)
			.await
	}

	async fn find_tier_reward_token(
		&self,
		tier_id: &str,
		token_address: &str,
	) -> Result<Option<StoredKey>, StoreError> {
		self.select_key(
			TIER_REWARD_TOKENS,
			&[("tier_id", tier_id), ("token_address", token_address)],
		)
		.await
	}

	async fn insert_tier_reward_token(
		&self,
		link: &TierRewardTokenRecord,
	) -> Result<Insertion, StoreError> {
		self.insert(TIER_REWARD_TOKENS, link).await
	}

	async fn delete_tier_reward_token(
		&self,
		tier_id: &str,
		token_address: &str,
	) -> Result<(), StoreError> {
		self.delete(
			TIER_REWARD_TOKENS,
			&[("tier_id", tier_id), ("token_address", token_address)],
		)
		.await
	}

	async fn find_reward_claim(
		&self,
		stake_id: &str,
		owner: &str,
		token_address: &str,
	) -> Result<Option<StoredKey>, StoreError> {
		self.select_key(
			REWARD_CLAIMS,
			&[
				("stake_id", stake_id),
				("owner", owner),
				("token_address", token_address),
			],
		)
		.await
	}

	async fn insert_reward_claim(
		&self,
		claim: &RewardClaimRecord,
	) -> Result<Insertion, StoreError> {
		self.insert(REWARD_CLAIMS, claim).await
	}
}
