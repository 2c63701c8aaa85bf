use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use staking_state_sync::config::{CheckpointBackend, IndexerConfig, StoreBackend};
use staking_state_sync::ledger::{
	ContractReader, EventSource, FailureDecoder, LedgerRpcClient, StakingEventSource,
};
use staking_state_sync::store::{MemoryStore, PostgrestStore, RecordStore};
use staking_state_sync::sync::{
	CheckpointRepository, FileCheckpointRepository, RecordProjector, RedisCheckpointRepository,
	SyncEngine,
};

/// Indexes staking contract events into relational tables.
#[derive(Parser, Debug)]
#[command(name = "staking-state-sync")]
#[command(about = "Synchronizes staking contract events into a relational store")]
struct Args {
	/// Optional `.env` file loaded before reading the configuration.
	#[arg(long, env = "DOTENV_PATH", default_value = ".env")]
	dotenv: PathBuf,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the indexer (default).
	Run {
		/// Catch up to the current head once and exit.
		#[arg(long)]
		once: bool,
	},
	/// Decode a hex revert payload from the staking contract.
	DecodeFailure {
		/// `0x`-prefixed or bare hex payload.
		payload: String,
	},
	/// List the staking contract's declared errors and their selectors.
	ListFailures,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	match dotenvy::from_path(&args.dotenv) {
		Ok(()) => {}
		Err(e) if e.not_found() => {}
		Err(e) => eprintln!("Failed to load {}: {}", args.dotenv.display(), e),
	}

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	match args.command.unwrap_or(Command::Run { once: false }) {
		Command::Run { once } => run(once).await,
		Command::DecodeFailure { payload } => {
			let decoded = FailureDecoder::staking().decode_hex(&payload);
			println!("{}: {}", decoded.name(), decoded.message());
			Ok(())
		}
		Command::ListFailures => {
			for (selector, signature) in FailureDecoder::staking().declared() {
				println!(
					"{}  {}  {}",
					selector,
					signature.canonical(),
					signature.message.as_deref().unwrap_or("-")
				);
			}
			Ok(())
		}
	}
}

async fn run(once: bool) -> anyhow::Result<()> {
	let config = IndexerConfig::from_env().context("Invalid configuration")?;

	let client = LedgerRpcClient::new(
		config.rpc_url.clone(),
		config.ws_url.clone(),
		config.rpc_timeout,
	)?;
	let source = Arc::new(StakingEventSource::new(
		client,
		config.contract_address,
		config.finality_depth,
	));
	info!("Created ledger client for contract {}", config.contract_address);

	let store: Arc<dyn RecordStore> = match &config.store {
		StoreBackend::Supabase { url, key } => {
			Arc::new(PostgrestStore::new(url, key.clone(), config.rpc_timeout)?)
		}
		StoreBackend::Memory => {
			warn!("Using the in-memory store, records will not be persisted");
			Arc::new(MemoryStore::new())
		}
	};

	let checkpoints: Arc<dyn CheckpointRepository> = match &config.checkpoint {
		CheckpointBackend::File { path } => Arc::new(FileCheckpointRepository::new(path.clone())),
		CheckpointBackend::Redis { url, key } => Arc::new(
			RedisCheckpointRepository::connect(url, key.clone())
				.await
				.context("Failed to connect to the Redis checkpoint store")?,
		),
	};

	let reader: Arc<dyn ContractReader> = source.clone();
	let events: Arc<dyn EventSource> = source;
	let projector = RecordProjector::new(store, reader);

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				info!("Received SIGINT, shutting down");
				let _ = shutdown_tx.send(true);
			}
			Err(e) => debug!("Unable to listen for SIGINT: {}", e),
		}
	});

	let mut engine = SyncEngine::new(
		events,
		projector,
		checkpoints,
		config.engine_config(),
		shutdown_rx,
	);

	if once {
		let checkpoint = engine.sync_to_latest().await.map_err(|e| {
			error!("Sync failed: {}", e);
			e
		})?;
		info!("Synced to checkpoint {:?}", checkpoint);
		info!("{}", engine.progress().summary());
		return Ok(());
	}

	engine.run().await.map_err(|e| {
		error!("Indexer halted in {:?}: {}", engine.state(), e);
		e
	})?;
	Ok(())
}
