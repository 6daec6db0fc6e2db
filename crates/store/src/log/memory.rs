// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::time::Duration;

use parking_lot::RwLock;

use weir_core::{Error, Result, Version};

use super::{DeltaLog, FrontierTracker, LogEntry};

/// An in-memory shard log. Entries count as locally persisted the
/// moment they are appended.
pub struct MemoryLog {
	entries: RwLock<Vec<LogEntry>>,
	frontier: FrontierTracker,
}

impl MemoryLog {
	pub fn new() -> Self {
		Self {
			entries: RwLock::new(Vec::new()),
			frontier: FrontierTracker::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Index of the greatest entry with version <= `version`.
	fn floor_index(entries: &[LogEntry], version: Version) -> Option<usize> {
		let at = entries.partition_point(|entry| entry.version <= version);
		at.checked_sub(1)
	}
}

impl Default for MemoryLog {
	fn default() -> Self {
		Self::new()
	}
}

impl DeltaLog for MemoryLog {
	fn append(&self, entry: LogEntry) -> Result<()> {
		let mut entries = self.entries.write();
		if let Some(last) = entries.last() {
			if entry.version <= last.version {
				return Err(Error::Fatal(format!(
					"log version regression: {} after {}",
					entry.version, last.version
				)));
			}
		}
		let version = entry.version;
		entries.push(entry);
		drop(entries);
		self.frontier.advance(version, false);
		Ok(())
	}

	fn latest_version(&self) -> Option<Version> {
		self.entries.read().last().map(|entry| entry.version)
	}

	fn last_persisted_version(&self) -> Option<Version> {
		self.frontier.local()
	}

	fn entry_at(&self, version: Version, exact: bool) -> Option<LogEntry> {
		let entries = self.entries.read();
		let at = Self::floor_index(&entries, version)?;
		let entry = &entries[at];
		if exact && entry.version != version {
			return None;
		}
		Some(entry.clone())
	}

	fn version_at_time(&self, ts_us: u64) -> Option<Version> {
		let entries = self.entries.read();
		let at = entries.partition_point(|entry| entry.timestamp_us <= ts_us);
		at.checked_sub(1).map(|at| entries[at].version)
	}

	fn replay(&self, up_to: Version, visit: &mut dyn FnMut(&LogEntry) -> Result<()>) -> Result<()> {
		let entries = self.entries.read();
		for entry in entries.iter().take_while(|entry| entry.version <= up_to) {
			visit(entry)?;
		}
		Ok(())
	}

	fn replay_backward(&self, from: Version, visit: &mut dyn FnMut(&LogEntry) -> bool) {
		let entries = self.entries.read();
		let Some(start) = Self::floor_index(&entries, from) else {
			return;
		};
		for entry in entries[..=start].iter().rev() {
			if !visit(entry) {
				break;
			}
		}
	}

	fn global_persistence_frontier(&self) -> Option<Version> {
		self.frontier.global()
	}

	fn advance_persistence_frontier(&self, version: Version, is_global: bool) {
		self.frontier.advance(version, is_global);
	}

	fn wait_for_global_persistence_frontier(&self, version: Version, timeout: Duration) -> bool {
		self.frontier.wait_global(version, timeout)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(version: u64, ts_us: u64) -> LogEntry {
		LogEntry {
			version: Version(version),
			timestamp_us: ts_us,
			delta: vec![version as u8],
			signature: None,
		}
	}

	#[test]
	fn test_append_rejects_version_regression() {
		let log = MemoryLog::new();
		log.append(entry(3, 30)).unwrap();
		assert!(log.append(entry(3, 31)).is_err());
		assert!(log.append(entry(2, 32)).is_err());
		log.append(entry(7, 40)).unwrap();
		assert_eq!(log.latest_version(), Some(Version(7)));
	}

	#[test]
	fn test_entry_at_exact_and_floor() {
		let log = MemoryLog::new();
		log.append(entry(2, 20)).unwrap();
		log.append(entry(5, 50)).unwrap();

		assert_eq!(log.entry_at(Version(5), true).unwrap().version, Version(5));
		assert!(log.entry_at(Version(4), true).is_none());
		assert_eq!(log.entry_at(Version(4), false).unwrap().version, Version(2));
		assert!(log.entry_at(Version(1), false).is_none());
	}

	#[test]
	fn test_version_at_time() {
		let log = MemoryLog::new();
		log.append(entry(1, 100)).unwrap();
		log.append(entry(2, 200)).unwrap();

		assert_eq!(log.version_at_time(99), None);
		assert_eq!(log.version_at_time(100), Some(Version(1)));
		assert_eq!(log.version_at_time(150), Some(Version(1)));
		assert_eq!(log.version_at_time(500), Some(Version(2)));
	}

	#[test]
	fn test_replay_backward_stops() {
		let log = MemoryLog::new();
		for v in 0..5 {
			log.append(entry(v, v * 10)).unwrap();
		}
		let mut seen = Vec::new();
		log.replay_backward(Version(3), &mut |entry| {
			seen.push(entry.version.0);
			seen.len() < 2
		});
		assert_eq!(seen, vec![3, 2]);
	}
}
