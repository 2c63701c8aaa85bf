//! Staking event indexer.
//!
//! Follows a staking contract's event history over JSON-RPC and projects it into
//! relational tables, resuming from a persisted checkpoint after restarts.

pub mod config;
pub mod ledger;
pub mod store;
pub mod sync;
pub mod utils;
