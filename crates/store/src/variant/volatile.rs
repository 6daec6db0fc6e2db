// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use weir_core::encoding::Value;
use weir_core::{NodeId, Result, ShardRef, StoreObject, Version, VersionStamp};

use crate::delta::DeltaStoreCore;
use crate::observer::CriticalDataPathObserver;
use crate::variant::ShardStore;

/// The volatile variant: the shard map without a log. Reads at specific
/// past versions and temporal reads are unsupported and return the
/// invalid sentinel.
///
/// Removes insert null objects rather than erasing, so `list_keys`
/// includes tombstoned keys, the historical behavior of this variant,
/// unlike the persistent one.
pub struct VolatileStore<O: StoreObject + Value> {
	shard: ShardRef,
	core: DeltaStoreCore<O>,
	/// Version of the latest delivered mutation, for tail tracking and
	/// current-version queries.
	latest: AtomicU64,
	observer: Arc<dyn CriticalDataPathObserver<O>>,
}

impl<O: StoreObject + Value> VolatileStore<O> {
	pub fn new(shard: ShardRef, observer: Arc<dyn CriticalDataPathObserver<O>>) -> Self {
		Self {
			shard,
			core: DeltaStoreCore::without_delta(),
			latest: AtomicU64::new(Version::INVALID.0),
			observer,
		}
	}

	pub fn shard(&self) -> ShardRef {
		self.shard
	}

	fn observe(&self, sender: NodeId, key: &O::Key, is_trigger: bool) {
		if let Some(stored) = self.core.ordered_get(key) {
			self.observer.observe(self.shard, sender, key, &stored, is_trigger);
		}
	}
}

impl<O: StoreObject + Value> ShardStore<O> for VolatileStore<O> {
	fn ordered_put(&self, mut value: O, stamp: VersionStamp, sender: NodeId) -> VersionStamp {
		value.set_version(stamp.version);
		value.set_timestamp(stamp.timestamp_us);
		let key = value.key_ref().clone();
		let tail = Version(self.latest.load(Ordering::Acquire));

		match self.core.ordered_put(value, tail) {
			Ok(_) => {
				self.latest.store(stamp.version.0, Ordering::Release);
				self.observe(sender, &key, false);
				stamp
			}
			Err(err) => {
				debug!(shard = %self.shard, key = %key, "ordered put rejected: {err}");
				VersionStamp::INVALID
			}
		}
	}

	fn ordered_remove(&self, key: O::Key, stamp: VersionStamp, sender: NodeId) -> VersionStamp {
		let mut tombstone = O::tombstone(key.clone());
		tombstone.set_version(stamp.version);
		tombstone.set_timestamp(stamp.timestamp_us);
		let tail = Version(self.latest.load(Ordering::Acquire));

		match self.core.ordered_remove(tombstone, tail) {
			Ok(_) => {
				self.latest.store(stamp.version.0, Ordering::Release);
				self.observe(sender, &key, false);
				stamp
			}
			Err(err) => {
				debug!(shard = %self.shard, key = %key, "ordered remove rejected: {err}");
				VersionStamp::INVALID
			}
		}
	}

	fn ordered_get(&self, key: &O::Key) -> O {
		self.core.ordered_get(key).map(|stored| stored.as_ref().clone()).unwrap_or_else(O::invalid)
	}

	fn ordered_list_keys(&self, prefix: &str) -> Vec<O::Key> {
		self.core.ordered_list_keys(prefix)
	}

	fn ordered_get_size(&self, key: &O::Key) -> u64 {
		self.core.ordered_get_size(key)
	}

	fn trigger_put(&self, value: O, sender: NodeId) {
		let key = value.key_ref().clone();
		let value = Arc::new(value);
		self.observer.observe(self.shard, sender, &key, &value, true);
	}

	fn get(&self, key: &O::Key, version: Option<Version>, _stable: bool, _exact: bool) -> Result<O> {
		match version {
			// No log: past versions cannot be served.
			Some(_) => Ok(O::invalid()),
			None => Ok(self
				.core
				.lockless_get(key)
				.map(|stored| stored.as_ref().clone())
				.unwrap_or_else(O::invalid)),
		}
	}

	fn get_by_time(&self, _key: &O::Key, _ts_us: u64, _stable: bool) -> Result<O> {
		Ok(O::invalid())
	}

	fn list_keys(&self, prefix: &str, version: Option<Version>, _stable: bool) -> Result<Vec<O::Key>> {
		match version {
			Some(_) => Ok(Vec::new()),
			None => Ok(self.core.lockless_list_keys(prefix)),
		}
	}

	fn list_keys_by_time(&self, _prefix: &str, _ts_us: u64, _stable: bool) -> Result<Vec<O::Key>> {
		Ok(Vec::new())
	}

	fn get_size(&self, key: &O::Key, version: Option<Version>, _stable: bool, _exact: bool) -> Result<u64> {
		match version {
			Some(_) => Ok(0),
			None => Ok(self.core.lockless_get_size(key)),
		}
	}

	fn get_size_by_time(&self, _key: &O::Key, _ts_us: u64, _stable: bool) -> Result<u64> {
		Ok(0)
	}

	fn latest_version(&self) -> Option<Version> {
		let latest = Version(self.latest.load(Ordering::Acquire));
		latest.is_valid().then_some(latest)
	}
}
