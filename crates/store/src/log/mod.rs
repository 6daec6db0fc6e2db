// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! The persistent shard-log boundary consumed by the versioned log
//! adapter, with a memory-backed and a file-backed implementation.

pub use file::FileLog;
pub use memory::MemoryLog;

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use weir_core::{Result, Version};

mod file;
mod memory;

/// A signature chained onto a log entry by the signed log mode:
/// `signature = sign(delta || signature(previous_signed_version))`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
	pub signature: Vec<u8>,
	pub previous_signed_version: Version,
}

/// One ordered mutation in a shard's log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
	pub version: Version,
	pub timestamp_us: u64,
	#[serde(with = "serde_bytes")]
	pub delta: Vec<u8>,
	pub signature: Option<SignatureRecord>,
}

impl weir_core::encoding::Value for LogEntry {}

/// A per-shard log of encoded deltas. Versions strictly increase across
/// appended entries; timestamps are non-decreasing.
pub trait DeltaLog: Send + Sync {
	/// Appends one entry. The entry's version must be greater than the
	/// latest appended version.
	fn append(&self, entry: LogEntry) -> Result<()>;

	/// The version of the last appended entry.
	fn latest_version(&self) -> Option<Version>;

	/// The version of the last entry known durable on this replica.
	fn last_persisted_version(&self) -> Option<Version>;

	/// The entry at `version`. With `exact`, only an entry carrying
	/// exactly that version is returned; otherwise the greatest entry
	/// at or below it.
	fn entry_at(&self, version: Version, exact: bool) -> Option<LogEntry>;

	/// The latest version whose timestamp is at or below `ts_us`.
	fn version_at_time(&self, ts_us: u64) -> Option<Version>;

	/// Visits entries in version order up to and including `up_to`.
	fn replay(&self, up_to: Version, visit: &mut dyn FnMut(&LogEntry) -> Result<()>) -> Result<()>;

	/// Visits entries in reverse version order starting at or below
	/// `from`, until the visitor returns `false`.
	fn replay_backward(&self, from: Version, visit: &mut dyn FnMut(&LogEntry) -> bool);

	/// The global persistence frontier: the greatest version durable on
	/// every replica, as reported by the runtime's persistence
	/// callbacks.
	fn global_persistence_frontier(&self) -> Option<Version>;

	/// Advances the local or global frontier. Called by the runtime's
	/// persistence pump; frontiers never move backwards.
	fn advance_persistence_frontier(&self, version: Version, is_global: bool);

	/// Blocks until the global frontier reaches `version` or the
	/// timeout elapses; returns whether it did.
	fn wait_for_global_persistence_frontier(&self, version: Version, timeout: Duration) -> bool;
}

/// Shared local/global frontier state with waiters, used by every log
/// implementation.
pub(crate) struct FrontierTracker {
	state: Mutex<Frontiers>,
	advanced: Condvar,
}

#[derive(Default)]
struct Frontiers {
	local: Option<Version>,
	global: Option<Version>,
}

impl FrontierTracker {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(Frontiers::default()),
			advanced: Condvar::new(),
		}
	}

	pub(crate) fn local(&self) -> Option<Version> {
		self.state.lock().local
	}

	pub(crate) fn global(&self) -> Option<Version> {
		self.state.lock().global
	}

	pub(crate) fn advance(&self, version: Version, is_global: bool) {
		let mut state = self.state.lock();
		let frontier = if is_global {
			&mut state.global
		} else {
			&mut state.local
		};
		if frontier.map_or(true, |current| version > current) {
			*frontier = Some(version);
			self.advanced.notify_all();
		}
	}

	pub(crate) fn wait_global(&self, version: Version, timeout: Duration) -> bool {
		let mut state = self.state.lock();
		let deadline = std::time::Instant::now() + timeout;
		loop {
			if state.global.is_some_and(|global| global >= version) {
				return true;
			}
			if self.advanced.wait_until(&mut state, deadline).timed_out() {
				return state.global.is_some_and(|global| global >= version);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_frontier_never_retreats() {
		let tracker = FrontierTracker::new();
		tracker.advance(Version(5), true);
		tracker.advance(Version(3), true);
		assert_eq!(tracker.global(), Some(Version(5)));
		assert_eq!(tracker.local(), None);

		tracker.advance(Version(4), false);
		assert_eq!(tracker.local(), Some(Version(4)));
	}

	#[test]
	fn test_wait_global_times_out() {
		let tracker = FrontierTracker::new();
		assert!(!tracker.wait_global(Version(1), Duration::from_millis(10)));
		tracker.advance(Version(1), true);
		assert!(tracker.wait_global(Version(1), Duration::from_millis(10)));
	}
}
