//! Progress tracking for staking event synchronization.
//!
//! This module provides the `SyncProgressTracker`, which records committed ranges,
//! counts applied and skipped events per kind, and produces a summary for logging.
//! The engine owns one tracker per run.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::sync::events::EventKind;
use crate::sync::projector::Projection;

/// Blocks between periodic progress lines.
const LOG_INTERVAL_BLOCKS: u64 = 10_000;

/// Service for tracking synchronization progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
	/// First block of this session
	start_block: Option<u64>,
	/// Highest committed checkpoint
	committed: Option<u64>,
	/// Inserted or written events per kind
	applied: BTreeMap<EventKind, usize>,
	/// Events that found their row already present
	already_present: usize,
	/// Malformed or undecodable logs
	skipped: usize,
	/// Committed sub-ranges, in commit order
	ranges: Vec<(u64, u64)>,
	/// Checkpoint at which we last logged progress
	last_logged: u64,
}

impl SyncProgressTracker {
	pub fn new() -> Self {
		Self {
			start_block: None,
			committed: None,
			applied: BTreeMap::new(),
			already_present: 0,
			skipped: 0,
			ranges: Vec::new(),
			last_logged: 0,
		}
	}

	/// Record the outcome of applying one event
	pub fn record_applied(&mut self, kind: EventKind, projection: Projection) {
		match projection {
			Projection::AlreadyExists => self.already_present += 1,
			Projection::Inserted | Projection::Written => {
				*self.applied.entry(kind).or_default() += 1;
			}
		}
	}

	pub fn record_skipped(&mut self) {
		self.skipped += 1;
	}

	/// Record a fully applied range `[from, to]`
	pub fn record_range(&mut self, from: u64, to: u64) {
		if let Some((_, last_to)) = self.ranges.last() {
			if from <= *last_to {
				warn!(
					"Committed range {}..={} overlaps previous range ending at {}",
					from, to, last_to
				);
			}
		}
		self.start_block.get_or_insert(from);
		self.ranges.push((from, to));
		self.record_checkpoint(to);
	}

	/// Record a checkpoint advanced outside of a range, in subscribed mode
	pub fn record_checkpoint(&mut self, block: u64) {
		self.committed = Some(self.committed.map_or(block, |c| c.max(block)));
	}

	pub fn committed(&self) -> Option<u64> {
		self.committed
	}

	pub fn ranges(&self) -> &[(u64, u64)] {
		&self.ranges
	}

	pub fn applied(&self, kind: EventKind) -> usize {
		self.applied.get(&kind).copied().unwrap_or_default()
	}

	/// Log progress every `LOG_INTERVAL_BLOCKS` committed blocks, or when forced
	pub fn log_progress(&mut self, force: bool) {
		let Some(committed) = self.committed else {
			return;
		};
		if force || committed.saturating_sub(self.last_logged) >= LOG_INTERVAL_BLOCKS {
			info!("Sync progress: {}", self.summary());
			self.last_logged = committed;
		}
	}

	/// Human-readable summary of the session
	pub fn summary(&self) -> String {
		let total: usize = self.applied.values().sum();
		let per_kind = self
			.applied
			.iter()
			.map(|(kind, count)| format!("{}={}", kind.name(), count))
			.collect::<Vec<_>>()
			.join(", ");

		format!(
			"blocks {}..={}: {} events applied{}, {} already present, {} skipped, {} ranges",
			self.start_block.map_or("-".to_string(), |b| b.to_string()),
			self.committed.map_or("-".to_string(), |b| b.to_string()),
			total,
			if per_kind.is_empty() {
				String::new()
			} else {
				format!(" ({})", per_kind)
			},
			self.already_present,
			self.skipped,
			self.ranges.len()
		)
	}
}

impl Default for SyncProgressTracker {
	fn default() -> Self {
		Self::new()
	}
}
