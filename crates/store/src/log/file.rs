// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use weir_core::encoding::Value;
use weir_core::{Error, Result, Version};

use super::{DeltaLog, LogEntry, MemoryLog};

/// A file-backed shard log: length-prefixed serialized entries appended
/// to a single file, mirrored in memory for reads. An entry counts as
/// locally persisted once its bytes are synced.
///
/// On open the file is scanned to rebuild the mirror; a truncated tail
/// record (a crash mid-append) is dropped with a warning.
pub struct FileLog {
	mirror: MemoryLog,
	file: Mutex<File>,
	path: PathBuf,
}

impl FileLog {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref().to_path_buf();
		let mut file = OpenOptions::new()
			.read(true)
			.append(true)
			.create(true)
			.open(&path)
			.map_err(|err| Error::Fatal(format!("cannot open log {}: {err}", path.display())))?;

		let mirror = MemoryLog::new();
		let recovered = Self::recover(&mut file, &mirror, &path)?;
		if recovered > 0 {
			tracing::debug!(log = %path.display(), entries = recovered, "recovered shard log");
		}

		Ok(Self {
			mirror,
			file: Mutex::new(file),
			path,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn recover(file: &mut File, mirror: &MemoryLog, path: &Path) -> Result<usize> {
		let mut reader = BufReader::new(file);
		let mut recovered = 0usize;
		loop {
			let mut len_bytes = [0u8; 4];
			match reader.read_exact(&mut len_bytes) {
				Ok(()) => {}
				Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
				Err(err) => {
					return Err(Error::Fatal(format!("log read failed {}: {err}", path.display())));
				}
			}
			let len = u32::from_le_bytes(len_bytes) as usize;
			let mut record = vec![0u8; len];
			if let Err(err) = reader.read_exact(&mut record) {
				warn!(log = %path.display(), "dropping truncated tail record: {err}");
				break;
			}
			match LogEntry::decode(&record) {
				Ok(entry) => {
					mirror.append(entry)?;
					recovered += 1;
				}
				Err(err) => {
					return Err(Error::Fatal(format!(
						"log corruption in {}: {err}",
						path.display()
					)));
				}
			}
		}
		Ok(recovered)
	}
}

impl DeltaLog for FileLog {
	fn append(&self, entry: LogEntry) -> Result<()> {
		let record = entry.encode();
		{
			let mut file = self.file.lock();
			file.write_all(&(record.len() as u32).to_le_bytes())
				.and_then(|_| file.write_all(&record))
				.and_then(|_| file.sync_data())
				.map_err(|err| {
					Error::Fatal(format!("log append failed {}: {err}", self.path.display()))
				})?;
		}
		self.mirror.append(entry)
	}

	fn latest_version(&self) -> Option<Version> {
		self.mirror.latest_version()
	}

	fn last_persisted_version(&self) -> Option<Version> {
		self.mirror.last_persisted_version()
	}

	fn entry_at(&self, version: Version, exact: bool) -> Option<LogEntry> {
		self.mirror.entry_at(version, exact)
	}

	fn version_at_time(&self, ts_us: u64) -> Option<Version> {
		self.mirror.version_at_time(ts_us)
	}

	fn replay(&self, up_to: Version, visit: &mut dyn FnMut(&LogEntry) -> Result<()>) -> Result<()> {
		self.mirror.replay(up_to, visit)
	}

	fn replay_backward(&self, from: Version, visit: &mut dyn FnMut(&LogEntry) -> bool) {
		self.mirror.replay_backward(from, visit)
	}

	fn global_persistence_frontier(&self) -> Option<Version> {
		self.mirror.global_persistence_frontier()
	}

	fn advance_persistence_frontier(&self, version: Version, is_global: bool) {
		self.mirror.advance_persistence_frontier(version, is_global)
	}

	fn wait_for_global_persistence_frontier(&self, version: Version, timeout: Duration) -> bool {
		self.mirror.wait_for_global_persistence_frontier(version, timeout)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(version: u64, payload: &[u8]) -> LogEntry {
		LogEntry {
			version: Version(version),
			timestamp_us: version * 10,
			delta: payload.to_vec(),
			signature: None,
		}
	}

	#[test]
	fn test_reopen_recovers_entries() {
		let dir = weir_testing::tempdir();
		let path = dir.path().join("shard.log");

		{
			let log = FileLog::open(&path).unwrap();
			log.append(entry(0, b"a")).unwrap();
			log.append(entry(1, b"bb")).unwrap();
			log.append(entry(2, b"ccc")).unwrap();
		}

		let log = FileLog::open(&path).unwrap();
		assert_eq!(log.latest_version(), Some(Version(2)));
		assert_eq!(log.last_persisted_version(), Some(Version(2)));
		assert_eq!(log.entry_at(Version(1), true).unwrap().delta, b"bb".to_vec());
	}

	#[test]
	fn test_truncated_tail_is_dropped() {
		let dir = weir_testing::tempdir();
		let path = dir.path().join("shard.log");

		{
			let log = FileLog::open(&path).unwrap();
			log.append(entry(0, b"a")).unwrap();
			log.append(entry(1, b"bb")).unwrap();
		}

		// Chop bytes off the final record.
		let bytes = std::fs::read(&path).unwrap();
		std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

		let log = FileLog::open(&path).unwrap();
		assert_eq!(log.latest_version(), Some(Version(0)));
	}
}
