//! Types for JSON-RPC ledger integration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::abi::keccak256;

/// JSON-RPC error code used by most providers for "limit exceeded" responses.
const RPC_LIMIT_EXCEEDED: i64 = -32005;

/// A 20-byte account or contract address.
///
/// Parsing accepts any casing; `Display` renders the EIP-55 mixed-case checksum
/// form, which is also the form used as a natural key in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
	/// Lowercase `0x`-prefixed hex, as expected by JSON-RPC filters.
	pub fn to_lower_hex(&self) -> String {
		format!("0x{}", hex::encode(self.0))
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let lower = hex::encode(self.0);
		let hash = keccak256(lower.as_bytes());

		let mut out = String::with_capacity(42);
		out.push_str("0x");
		for (i, c) in lower.chars().enumerate() {
			let nibble = if i % 2 == 0 {
				hash[i / 2] >> 4
			} else {
				hash[i / 2] & 0x0f
			};
			if c.is_ascii_alphabetic() && nibble >= 8 {
				out.push(c.to_ascii_uppercase());
			} else {
				out.push(c);
			}
		}
		f.write_str(&out)
	}
}

impl FromStr for Address {
	type Err = LedgerError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = decode_hex_prefixed(s)?;
		let array: [u8; 20] = bytes
			.try_into()
			.map_err(|_| LedgerError::Decode(format!("address must be 20 bytes: {}", s)))?;
		Ok(Address(array))
	}
}

impl Serialize for Address {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

/// A 32-byte word, used for topics and transaction hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct H256(pub [u8; 32]);

impl H256 {
	pub fn to_hex(&self) -> String {
		format!("0x{}", hex::encode(self.0))
	}
}

impl FromStr for H256 {
	type Err = LedgerError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = decode_hex_prefixed(s)?;
		let array: [u8; 32] = bytes
			.try_into()
			.map_err(|_| LedgerError::Decode(format!("expected a 32-byte word: {}", s)))?;
		Ok(H256(array))
	}
}

/// Log entry as returned by `eth_getLogs` and `eth_subscription` notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
	/// Emitting contract address.
	pub address: String,
	/// Topic list; topic 0 is the event signature hash.
	pub topics: Vec<String>,
	/// ABI-encoded non-indexed parameters.
	pub data: String,
	/// Block number as a hex quantity. Absent for pending logs.
	pub block_number: Option<String>,
	/// Position of the log within its block.
	pub log_index: Option<String>,
	/// Hash of the emitting transaction.
	pub transaction_hash: Option<String>,
	/// Set when the log was removed by a reorganisation.
	#[serde(default)]
	pub removed: bool,
}

/// A log with its hex fields decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
	pub address: Address,
	pub topics: Vec<H256>,
	pub data: Vec<u8>,
	pub block_number: u64,
	pub log_index: u64,
	pub transaction_hash: Option<String>,
}

impl TryFrom<RpcLog> for Log {
	type Error = LedgerError;

	fn try_from(raw: RpcLog) -> Result<Self, Self::Error> {
		let block_number = raw
			.block_number
			.as_deref()
			.ok_or_else(|| LedgerError::Decode("log has no block number".to_string()))
			.and_then(parse_quantity)?;
		let log_index = raw.log_index.as_deref().map(parse_quantity).transpose()?.unwrap_or(0);
		let topics = raw
			.topics
			.iter()
			.map(|t| t.parse::<H256>())
			.collect::<Result<Vec<_>, _>>()?;

		Ok(Log {
			address: raw.address.parse()?,
			topics,
			data: decode_hex_prefixed(&raw.data)?,
			block_number,
			log_index,
			transaction_hash: raw.transaction_hash,
		})
	}
}

/// Filter passed to `eth_getLogs` / `eth_subscribe("logs")`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
	pub address: String,
	/// Topic 0 alternatives; a log matches if its signature hash is any of these.
	pub topics: Vec<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub from_block: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub to_block: Option<String>,
}

impl LogFilter {
	pub fn new(address: &Address, signatures: &[H256]) -> Self {
		Self {
			address: address.to_lower_hex(),
			topics: vec![signatures.iter().map(H256::to_hex).collect()],
			from_block: None,
			to_block: None,
		}
	}

	pub fn with_range(mut self, from: u64, to: u64) -> Self {
		self.from_block = Some(format!("{:#x}", from));
		self.to_block = Some(format!("{:#x}", to));
		self
	}
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
	pub code: i64,
	pub message: String,
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Result<u64, LedgerError> {
	let digits = value
		.strip_prefix("0x")
		.ok_or_else(|| LedgerError::Decode(format!("quantity is not 0x-prefixed: {}", value)))?;
	u64::from_str_radix(digits, 16)
		.map_err(|e| LedgerError::Decode(format!("invalid quantity {}: {}", value, e)))
}

/// Decode `0x`-prefixed (or bare) hex data.
pub fn decode_hex_prefixed(value: &str) -> Result<Vec<u8>, LedgerError> {
	let digits = value.strip_prefix("0x").unwrap_or(value);
	hex::decode(digits).map_err(|e| LedgerError::Decode(format!("invalid hex {}: {}", value, e)))
}

/// Error types for ledger access
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("Rate limited: {0}")]
	RateLimited(String),

	#[error("No data returned")]
	NoData,

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Subscription error: {0}")]
	SubscriptionError(String),

	#[error("Decode error: {0}")]
	Decode(String),
}

impl LedgerError {
	/// Build an error from a JSON-RPC error object, classifying rate limits.
	pub fn from_rpc(error: RpcErrorObject) -> Self {
		if error.code == RPC_LIMIT_EXCEEDED || error.message.to_lowercase().contains("rate limit") {
			LedgerError::RateLimited(error.message)
		} else {
			LedgerError::Rpc {
				code: error.code,
				message: error.message,
			}
		}
	}

	/// Whether retrying the same request later can succeed.
	///
	/// Only undecodable payloads are permanent.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, LedgerError::Decode(_))
	}
}
