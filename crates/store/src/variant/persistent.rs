// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;

use tracing::debug;

use weir_core::encoding::Value;
use weir_core::{Error, NodeId, Result, ShardRef, StoreObject, Version, VersionStamp};

use crate::adapter::VersionedLog;
use crate::log::DeltaLog;
use crate::observer::CriticalDataPathObserver;
use crate::variant::ShardStore;

/// The persistent variant: every accepted mutation becomes a log entry,
/// enabling versioned, temporal, stable and unstable reads.
pub struct PersistentStore<O: StoreObject + Value> {
	shard: ShardRef,
	log: VersionedLog<O>,
	observer: Arc<dyn CriticalDataPathObserver<O>>,
}

impl<O: StoreObject + Value> PersistentStore<O> {
	pub fn new(
		shard: ShardRef,
		log: Box<dyn DeltaLog>,
		observer: Arc<dyn CriticalDataPathObserver<O>>,
	) -> Self {
		Self {
			shard,
			log: VersionedLog::new(log),
			observer,
		}
	}

	pub fn shard(&self) -> ShardRef {
		self.shard
	}

	fn observe(&self, sender: NodeId, key: &O::Key, is_trigger: bool) {
		if let Some(stored) = self.log.core().ordered_get(key) {
			self.observer.observe(self.shard, sender, key, &stored, is_trigger);
		}
	}

	/// Serves a versioned read once the stable/current resolution has
	/// produced a concrete version (or `None` for the live map).
	fn read_at(&self, key: &O::Key, version: Option<Version>, exact: bool) -> Result<O> {
		match version {
			None => Ok(self
				.log
				.core()
				.lockless_get(key)
				.map(|stored| stored.as_ref().clone())
				.unwrap_or_else(O::invalid)),
			Some(version) => {
				Ok(self.log.value_at(key, version, exact)?.unwrap_or_else(O::invalid))
			}
		}
	}

	/// Maps the stable flag onto the version to serve. A stable read
	/// never serves the live map: CURRENT resolves to the global
	/// persistence frontier, and both a missing frontier and a
	/// future-version request degrade to the invalid sentinel, per the
	/// read-path error contract.
	fn resolve(&self, version: Option<Version>, stable: bool) -> Result<Resolved> {
		if !stable {
			return Ok(Resolved::At(version));
		}
		match self.log.resolve_stable(version) {
			Ok(Some(resolved)) => Ok(Resolved::At(Some(resolved))),
			Ok(None) => Ok(Resolved::Unserved),
			Err(Error::FutureVersion {
				..
			}) => Ok(Resolved::Unserved),
			Err(err) => Err(err),
		}
	}
}

enum Resolved {
	At(Option<Version>),
	Unserved,
}

impl<O: StoreObject + Value> ShardStore<O> for PersistentStore<O> {
	fn ordered_put(&self, mut value: O, stamp: VersionStamp, sender: NodeId) -> VersionStamp {
		value.set_version(stamp.version);
		value.set_timestamp(stamp.timestamp_us);
		let key = value.key_ref().clone();
		let tail = self.log.latest_version().unwrap_or(Version::INVALID);

		match self.log.core().ordered_put(value, tail) {
			Ok(_) => {
				self.log
					.commit_pending(stamp.version, stamp.timestamp_us, |_| None)
					.unwrap_or_else(|err| panic!("shard {} log append failed: {err}", self.shard));
				self.observe(sender, &key, false);
				stamp
			}
			Err(err) => {
				debug!(shard = %self.shard, key = %key, "ordered put rejected: {err}");
				self.log.discard_pending();
				VersionStamp::INVALID
			}
		}
	}

	fn ordered_remove(&self, key: O::Key, stamp: VersionStamp, sender: NodeId) -> VersionStamp {
		let mut tombstone = O::tombstone(key.clone());
		tombstone.set_version(stamp.version);
		tombstone.set_timestamp(stamp.timestamp_us);
		let tail = self.log.latest_version().unwrap_or(Version::INVALID);

		match self.log.core().ordered_remove(tombstone, tail) {
			Ok(_) => {
				self.log
					.commit_pending(stamp.version, stamp.timestamp_us, |_| None)
					.unwrap_or_else(|err| panic!("shard {} log append failed: {err}", self.shard));
				self.observe(sender, &key, false);
				stamp
			}
			Err(err) => {
				debug!(shard = %self.shard, key = %key, "ordered remove rejected: {err}");
				self.log.discard_pending();
				VersionStamp::INVALID
			}
		}
	}

	fn ordered_get(&self, key: &O::Key) -> O {
		self.log
			.core()
			.ordered_get(key)
			.map(|stored| stored.as_ref().clone())
			.unwrap_or_else(O::invalid)
	}

	fn ordered_list_keys(&self, prefix: &str) -> Vec<O::Key> {
		self.log.core().live_keys(prefix)
	}

	fn ordered_get_size(&self, key: &O::Key) -> u64 {
		self.log.core().ordered_get_size(key)
	}

	fn trigger_put(&self, value: O, sender: NodeId) {
		let key = value.key_ref().clone();
		let value = Arc::new(value);
		self.observer.observe(self.shard, sender, &key, &value, true);
	}

	fn get(&self, key: &O::Key, version: Option<Version>, stable: bool, exact: bool) -> Result<O> {
		match self.resolve(version, stable)? {
			Resolved::Unserved => Ok(O::invalid()),
			Resolved::At(resolved) => self.read_at(key, resolved, exact),
		}
	}

	fn get_by_time(&self, key: &O::Key, ts_us: u64, stable: bool) -> Result<O> {
		match self.log.version_at_time(ts_us) {
			None => Ok(O::invalid()),
			Some(version) => self.get(key, Some(version), stable, false),
		}
	}

	fn list_keys(&self, prefix: &str, version: Option<Version>, stable: bool) -> Result<Vec<O::Key>> {
		match self.resolve(version, stable)? {
			Resolved::Unserved => Ok(Vec::new()),
			Resolved::At(None) => Ok(self.log.core().live_keys(prefix)),
			Resolved::At(Some(version)) => {
				Ok(self.log.get_snapshot(version)?.list_keys(prefix, true))
			}
		}
	}

	fn list_keys_by_time(&self, prefix: &str, ts_us: u64, stable: bool) -> Result<Vec<O::Key>> {
		match self.log.version_at_time(ts_us) {
			None => Ok(Vec::new()),
			Some(version) => self.list_keys(prefix, Some(version), stable),
		}
	}

	fn get_size(&self, key: &O::Key, version: Option<Version>, stable: bool, exact: bool) -> Result<u64> {
		match self.resolve(version, stable)? {
			Resolved::Unserved => Ok(0),
			Resolved::At(None) => Ok(self.log.core().lockless_get_size(key)),
			Resolved::At(Some(version)) => Ok(self
				.log
				.value_at(key, version, exact)?
				.map(|value| value.encoded_size() as u64)
				.unwrap_or(0)),
		}
	}

	fn get_size_by_time(&self, key: &O::Key, ts_us: u64, stable: bool) -> Result<u64> {
		match self.log.version_at_time(ts_us) {
			None => Ok(0),
			Some(version) => self.get_size(key, Some(version), stable, false),
		}
	}

	fn latest_version(&self) -> Option<Version> {
		self.log.latest_version()
	}

	fn latest_persisted_version(&self) -> Option<Version> {
		self.log.latest_persisted_version()
	}

	fn advance_persistence_frontier(&self, version: Version, is_global: bool) {
		self.log.log().advance_persistence_frontier(version, is_global);
	}
}
