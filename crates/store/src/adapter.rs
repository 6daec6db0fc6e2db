// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::BTreeMap;
use std::time::Duration;

use weir_core::encoding::Value;
use weir_core::{Error, ObjectKey, Result, StoreObject, Version};

use crate::delta::DeltaStoreCore;
use crate::log::{DeltaLog, LogEntry, SignatureRecord};

/// How long a stable read waits for the global persistence frontier to
/// reach a version that has already been delivered locally. The
/// frontier is driven by the runtime's persistence callbacks; this
/// bound only guards against a stalled pump.
const STABLE_READ_WAIT: Duration = Duration::from_secs(5);

/// Wraps a [`DeltaStoreCore`] so that each accepted ordered mutation
/// becomes one log entry, adding versioned, temporal, and stable read
/// resolution on top of the current-state map.
pub struct VersionedLog<O: StoreObject + Value> {
	core: DeltaStoreCore<O>,
	log: Box<dyn DeltaLog>,
}

impl<O: StoreObject + Value> VersionedLog<O> {
	pub fn new(log: Box<dyn DeltaLog>) -> Self {
		let core = DeltaStoreCore::new();
		let adapter = Self {
			core,
			log,
		};
		adapter.recover();
		adapter
	}

	/// Replays whatever the log already contains into the map; a
	/// freshly created log is a no-op.
	fn recover(&self) {
		if let Some(latest) = self.log.latest_version() {
			let _ = self.log.replay(latest, &mut |entry| {
				self.core.apply_delta(&entry.delta)
			});
		}
	}

	pub fn core(&self) -> &DeltaStoreCore<O> {
		&self.core
	}

	pub fn log(&self) -> &dyn DeltaLog {
		self.log.as_ref()
	}

	/// Moves the pending delta produced by the last accepted ordered
	/// operation into the log as version `version`. `sign` may produce
	/// a signature record over the delta bytes for signed logs.
	pub fn commit_pending(
		&self,
		version: Version,
		timestamp_us: u64,
		sign: impl FnOnce(&[u8]) -> Option<SignatureRecord>,
	) -> Result<()> {
		let delta = self.core.take_delta();
		debug_assert!(!delta.is_empty(), "commit without pending delta");
		let signature = sign(&delta);
		self.log.append(LogEntry {
			version,
			timestamp_us,
			delta,
			signature,
		})
	}

	/// Drops a pending delta after a rejected ordered operation.
	pub fn discard_pending(&self) {
		let _ = self.core.take_delta();
	}

	pub fn latest_version(&self) -> Option<Version> {
		self.log.latest_version()
	}

	pub fn latest_persisted_version(&self) -> Option<Version> {
		self.log.last_persisted_version()
	}

	/// Reconstructs the full map state at `version` by replaying
	/// deltas from the log base. O(log length), documented slow; use
	/// [`Self::get_delta`] when a single version's mutation suffices.
	pub fn get_snapshot(&self, version: Version) -> Result<Snapshot<O>> {
		let mut snapshot = Snapshot {
			version,
			map: BTreeMap::new(),
		};
		self.log.replay(version, &mut |entry| {
			let value = O::decode(&entry.delta)?;
			snapshot.map.insert(value.key_ref().clone(), value);
			Ok(())
		})?;
		Ok(snapshot)
	}

	/// The single mutation logged at `version`. With `exact`, only an
	/// entry carrying exactly that version is considered; otherwise the
	/// greatest entry at or below it.
	pub fn get_delta(&self, version: Version, exact: bool) -> Result<Option<O>> {
		match self.log.entry_at(version, exact) {
			None => Ok(None),
			Some(entry) => Ok(Some(O::decode(&entry.delta)?)),
		}
	}

	/// The value of `key` as of `version`.
	///
	/// The single-delta fast path is tried first; when the delta at
	/// that version belongs to a different key, `exact` mode reports
	/// not-found and inexact mode falls back to a full replay.
	pub fn value_at(&self, key: &O::Key, version: Version, exact: bool) -> Result<Option<O>> {
		match self.get_delta(version, exact)? {
			None if exact => Err(Error::NotFound(format!("no update of {key} at {version}"))),
			None => Ok(None),
			Some(value) if value.key_ref() == key => Ok(Some(value)),
			Some(_) if exact => {
				Err(Error::NotFound(format!("no update of {key} at {version}")))
			}
			Some(_) => {
				let mut found = None;
				self.log.replay_backward(version, &mut |entry| {
					match O::decode(&entry.delta) {
						Ok(value) if value.key_ref() == key => {
							found = Some(value);
							false
						}
						_ => true,
					}
				});
				Ok(found)
			}
		}
	}

	/// The latest version whose timestamp is at or below `ts_us`.
	pub fn version_at_time(&self, ts_us: u64) -> Option<Version> {
		self.log.version_at_time(ts_us)
	}

	/// Resolves the version a stable read should serve.
	///
	/// `None` resolves to the current global persistence frontier;
	/// `Ok(None)` means nothing is globally durable yet and the read
	/// cannot be served. A specific version waits for the frontier to
	/// reach it and fails with future-version when it lies beyond the
	/// latest delivered entry.
	pub fn resolve_stable(&self, requested: Option<Version>) -> Result<Option<Version>> {
		match requested {
			None => Ok(self.log.global_persistence_frontier()),
			Some(version) => {
				let latest = self.latest_version().unwrap_or(Version::INVALID);
				if !latest.is_valid() || version > latest {
					return Err(Error::FutureVersion {
						requested: version,
						latest,
					});
				}
				if !self.log.wait_for_global_persistence_frontier(version, STABLE_READ_WAIT) {
					return Err(Error::Transport(format!(
						"global persistence frontier did not reach {version}"
					)));
				}
				Ok(Some(version))
			}
		}
	}

	/// The signature chained at `version`, for signed logs.
	pub fn signature(&self, version: Version) -> Option<SignatureRecord> {
		self.log.entry_at(version, true).and_then(|entry| entry.signature)
	}

	/// Walks backward from `version` until a logged delta satisfies
	/// `pred`, returning that delta's signature. O(log length) when the
	/// predicate never matches.
	pub fn get_delta_signature(
		&self,
		version: Version,
		pred: impl Fn(&O) -> bool,
	) -> Option<(Version, SignatureRecord)> {
		let mut found = None;
		self.log.replay_backward(version, &mut |entry| {
			match O::decode(&entry.delta) {
				Ok(value) if pred(&value) => {
					found = entry.signature.clone().map(|sig| (entry.version, sig));
					false
				}
				_ => true,
			}
		});
		found
	}
}

/// A reconstructed full-map state at one version.
pub struct Snapshot<O: StoreObject> {
	version: Version,
	map: BTreeMap<O::Key, O>,
}

impl<O: StoreObject> Snapshot<O> {
	pub fn version(&self) -> Version {
		self.version
	}

	pub fn get(&self, key: &O::Key) -> Option<&O> {
		self.map.get(key)
	}

	/// Keys whose pathname begins with `prefix`.
	pub fn list_keys(&self, prefix: &str, skip_tombstones: bool) -> Vec<O::Key> {
		self.map
			.iter()
			.filter(|(key, value)| {
				key.pathname().starts_with(prefix) && (!skip_tombstones || !value.is_null())
			})
			.map(|(key, _)| key.clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}
}
