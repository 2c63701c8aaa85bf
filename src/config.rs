//! Indexer configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::ledger::Address;
use crate::sync::{EngineConfig, LiveMode};

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Missing required environment variable {0}")]
	Missing(&'static str),

	#[error("Invalid value for {name}: {value:?} ({reason})")]
	Invalid {
		name: &'static str,
		value: String,
		reason: String,
	},
}

/// Where projected records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
	Supabase { url: String, key: String },
	/// Records kept in process memory only.
	Memory,
}

/// Where the checkpoint is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointBackend {
	File { path: PathBuf },
	Redis { url: String, key: String },
}

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
	pub rpc_url: String,
	pub ws_url: Option<String>,
	pub contract_address: Address,
	pub store: StoreBackend,
	pub checkpoint: CheckpointBackend,
	/// First block to index when no checkpoint exists.
	pub start_block: Option<u64>,
	pub batch_size: u64,
	pub poll_interval: Duration,
	pub use_subscription: bool,
	pub live_checkpoints: bool,
	pub finality_depth: u64,
	pub retry_initial: Duration,
	pub retry_max: Duration,
	pub checkpoint_retry_window: Duration,
	pub rpc_timeout: Duration,
}

impl IndexerConfig {
	/// Load configuration from the process environment.
	///
	/// Required:
	/// - `RPC_URL`, `STAKING_CONTRACT_ADDRESS`
	/// - `SUPABASE_URL`, `SUPABASE_KEY` unless `STORE_BACKEND=memory`
	///
	/// Everything else has a default; see `from_lookup`.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Load configuration through `lookup`, which maps a variable name to its
	/// value. Empty values count as unset.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
		let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

		let rpc_url = required("RPC_URL")?;
		let ws_url = var("WS_URL");

		let contract_value = required("STAKING_CONTRACT_ADDRESS")?;
		let contract_address =
			Address::from_str(&contract_value).map_err(|e| ConfigError::Invalid {
				name: "STAKING_CONTRACT_ADDRESS",
				value: contract_value.clone(),
				reason: e.to_string(),
			})?;

		let store = match var("STORE_BACKEND").as_deref().unwrap_or("supabase") {
			"supabase" => StoreBackend::Supabase {
				url: required("SUPABASE_URL")?,
				key: required("SUPABASE_KEY")?,
			},
			"memory" => StoreBackend::Memory,
			other => {
				return Err(ConfigError::Invalid {
					name: "STORE_BACKEND",
					value: other.to_string(),
					reason: "expected supabase or memory".to_string(),
				});
			}
		};

		let checkpoint = match var("CHECKPOINT_BACKEND").as_deref().unwrap_or("file") {
			"file" => CheckpointBackend::File {
				path: PathBuf::from(var("CHECKPOINT_PATH").unwrap_or_else(|| "last-block.json".to_string())),
			},
			"redis" => CheckpointBackend::Redis {
				url: redis_url(&var)?,
				key: var("CHECKPOINT_KEY").unwrap_or_else(|| "lastProcessedBlock".to_string()),
			},
			other => {
				return Err(ConfigError::Invalid {
					name: "CHECKPOINT_BACKEND",
					value: other.to_string(),
					reason: "expected file or redis".to_string(),
				});
			}
		};

		let batch_size = parse_or(&var, "BATCH_SIZE", 500u64)?;
		if batch_size == 0 {
			return Err(ConfigError::Invalid {
				name: "BATCH_SIZE",
				value: "0".to_string(),
				reason: "must be greater than zero".to_string(),
			});
		}

		let retry_initial = Duration::from_millis(parse_or(&var, "RETRY_INITIAL_MS", 5_000u64)?);
		let retry_max = Duration::from_millis(parse_or(&var, "RETRY_MAX_MS", 60_000u64)?);
		if retry_max < retry_initial {
			return Err(ConfigError::Invalid {
				name: "RETRY_MAX_MS",
				value: retry_max.as_millis().to_string(),
				reason: "must not be below RETRY_INITIAL_MS".to_string(),
			});
		}

		let config = Self {
			rpc_url,
			ws_url,
			contract_address,
			store,
			checkpoint,
			start_block: parse_opt(&var, "STARTING_BLOCK")?,
			batch_size,
			poll_interval: Duration::from_millis(parse_or(&var, "POLL_INTERVAL_MS", 120_000u64)?),
			use_subscription: parse_bool_or(&var, "USE_SUBSCRIPTION", false)?,
			live_checkpoints: parse_bool_or(&var, "LIVE_CHECKPOINTS", true)?,
			finality_depth: parse_or(&var, "FINALITY_DEPTH", 0u64)?,
			retry_initial,
			retry_max,
			checkpoint_retry_window: Duration::from_secs(parse_or(&var, "CHECKPOINT_RETRY_SECS", 60u64)?),
			rpc_timeout: Duration::from_secs(parse_or(&var, "RPC_TIMEOUT_SECS", 30u64)?),
		};

		if config.use_subscription && config.finality_depth > 0 {
			return Err(ConfigError::Invalid {
				name: "USE_SUBSCRIPTION",
				value: "true".to_string(),
				reason: format!(
					"subscriptions deliver unfinalized blocks, incompatible with FINALITY_DEPTH={}",
					config.finality_depth
				),
			});
		}

		tracing::info!(
			rpc_url = %config.rpc_url,
			ws = config.ws_url.is_some(),
			contract = %config.contract_address,
			batch_size = config.batch_size,
			subscription = config.use_subscription,
			"indexer configuration loaded"
		);
		Ok(config)
	}

	/// Engine settings derived from this configuration.
	pub fn engine_config(&self) -> EngineConfig {
		EngineConfig {
			start_block: self.start_block,
			batch_size: self.batch_size,
			live_mode: if self.use_subscription {
				LiveMode::Subscribed
			} else {
				LiveMode::Polling
			},
			poll_interval: self.poll_interval,
			retry_initial: self.retry_initial,
			retry_max: self.retry_max,
			checkpoint_retry_window: self.checkpoint_retry_window,
			persist_live_checkpoint: self.live_checkpoints,
		}
	}
}

/// `REDIS_URL`, or one built from `REDIS_HOST`/`REDIS_PORT`.
fn redis_url(var: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
	if let Some(url) = var("REDIS_URL") {
		return Ok(url);
	}
	match var("REDIS_HOST") {
		Some(host) => {
			let port: u16 = parse_or(var, "REDIS_PORT", 6379u16)?;
			Ok(format!("redis://{}:{}", host, port))
		}
		None => Ok(DEFAULT_REDIS_URL.to_string()),
	}
}

fn parse_opt<T>(var: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	var(name)
		.map(|value| {
			value.parse::<T>().map_err(|e| ConfigError::Invalid {
				name,
				value: value.clone(),
				reason: e.to_string(),
			})
		})
		.transpose()
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	Ok(parse_opt(var, name)?.unwrap_or(default))
}

fn parse_bool_or(
	var: &impl Fn(&str) -> Option<String>,
	name: &'static str,
	default: bool,
) -> Result<bool, ConfigError> {
	match var(name) {
		None => Ok(default),
		Some(value) => match value.to_ascii_lowercase().as_str() {
			"true" | "1" | "yes" => Ok(true),
			"false" | "0" | "no" => Ok(false),
			_ => Err(ConfigError::Invalid {
				name,
				value,
				reason: "expected true or false".to_string(),
			}),
		},
	}
}
