//! Ledger integration module for the staking contract
//!
//! This module provides the JSON-RPC client, the event source adapter used by
//! the sync engine, and the revert payload decoder.

/// ABI word decoding and signature hashing
pub mod abi;
/// JSON-RPC client for HTTP queries and WebSocket subscriptions
mod client;
/// Revert payload decoding
pub mod failure;
/// Event source adapter over the JSON-RPC client
pub mod source;
/// Type definitions for ledger data structures
mod types;

pub use client::{LedgerRpcClient, LogSubscription};
pub use failure::{DecodedFailure, FailureDecoder};
pub use source::{ContractReader, EventSource, EventSubscription, StakingEventSource};
pub use types::*;
