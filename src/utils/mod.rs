//!
//! Utility module for the staking indexer.
//!
//! Re-exports formatting helpers used when projecting events into records.
/// Utility functions for formatting and display
pub mod index;

pub use index::{TOKEN_DECIMALS, format_token_amount};
