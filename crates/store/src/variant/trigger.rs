// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;

use tracing::warn;

use weir_core::{NodeId, Result, ShardRef, StoreObject, Version, VersionStamp};

use crate::observer::CriticalDataPathObserver;
use crate::variant::ShardStore;

/// The trigger-no-store variant: every state-mutating or state-reading
/// operation is a no-op returning the invalid sentinel; only
/// `trigger_put` is meaningful and forwards straight to the
/// critical-data-path observer.
pub struct TriggerStore<O: StoreObject> {
	shard: ShardRef,
	observer: Arc<dyn CriticalDataPathObserver<O>>,
}

impl<O: StoreObject> TriggerStore<O> {
	pub fn new(shard: ShardRef, observer: Arc<dyn CriticalDataPathObserver<O>>) -> Self {
		Self {
			shard,
			observer,
		}
	}

	pub fn shard(&self) -> ShardRef {
		self.shard
	}
}

impl<O: StoreObject> ShardStore<O> for TriggerStore<O> {
	fn ordered_put(&self, value: O, _stamp: VersionStamp, _sender: NodeId) -> VersionStamp {
		warn!(shard = %self.shard, key = %value.key_ref(), "put on a trigger store is a no-op");
		VersionStamp::INVALID
	}

	fn ordered_remove(&self, key: O::Key, _stamp: VersionStamp, _sender: NodeId) -> VersionStamp {
		warn!(shard = %self.shard, %key, "remove on a trigger store is a no-op");
		VersionStamp::INVALID
	}

	fn ordered_get(&self, _key: &O::Key) -> O {
		O::invalid()
	}

	fn ordered_list_keys(&self, _prefix: &str) -> Vec<O::Key> {
		Vec::new()
	}

	fn ordered_get_size(&self, _key: &O::Key) -> u64 {
		0
	}

	fn trigger_put(&self, value: O, sender: NodeId) {
		let key = value.key_ref().clone();
		let value = Arc::new(value);
		self.observer.observe(self.shard, sender, &key, &value, true);
	}

	fn get(&self, _key: &O::Key, _version: Option<Version>, _stable: bool, _exact: bool) -> Result<O> {
		Ok(O::invalid())
	}

	fn get_by_time(&self, _key: &O::Key, _ts_us: u64, _stable: bool) -> Result<O> {
		Ok(O::invalid())
	}

	fn list_keys(&self, _prefix: &str, _version: Option<Version>, _stable: bool) -> Result<Vec<O::Key>> {
		Ok(Vec::new())
	}

	fn list_keys_by_time(&self, _prefix: &str, _ts_us: u64, _stable: bool) -> Result<Vec<O::Key>> {
		Ok(Vec::new())
	}

	fn get_size(&self, _key: &O::Key, _version: Option<Version>, _stable: bool, _exact: bool) -> Result<u64> {
		Ok(0)
	}

	fn get_size_by_time(&self, _key: &O::Key, _ts_us: u64, _stable: bool) -> Result<u64> {
		Ok(0)
	}

	fn latest_version(&self) -> Option<Version> {
		None
	}
}
