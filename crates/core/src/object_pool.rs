// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{encoding, ObjectKey, StoreObject, Version};

/// Subgroup type index marking a null (tombstoned slot) metadata
/// record.
pub const INVALID_SUBGROUP_TYPE_INDEX: u32 = u32::MAX;

/// How keys of a pool spread across its subgroup's shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingPolicy {
	/// `hash(key) mod num_shards`.
	#[default]
	Hash,
	/// Reserved for lexicographic range tables; resolving a key
	/// against a RANGE pool without a table is a policy error.
	Range,
}

/// The replicated directory record of one object pool: a hierarchical
/// key namespace mapped to a subgroup, plus placement overrides.
///
/// Pools are identified by an absolute '/'-separated pathname. A
/// removed pool is tombstoned (`deleted`, and the record nulled) but
/// retained for history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectPoolMetadata {
	pub version: Version,
	pub timestamp_us: u64,
	pub previous_version: Version,
	pub previous_version_by_key: Version,
	pub pathname: String,
	pub subgroup_type_index: u32,
	pub subgroup_index: u32,
	pub sharding_policy: ShardingPolicy,
	/// Keys pinned to specific shards, overriding the policy.
	pub object_locations: HashMap<String, u32>,
	/// Regex extracting the affinity set from a key; keys in the same
	/// affinity set land on the same shard. Empty disables it.
	pub affinity_set_regex: String,
	pub deleted: bool,
}

impl ObjectPoolMetadata {
	pub fn new(
		pathname: impl Into<String>,
		subgroup_type_index: u32,
		subgroup_index: u32,
		sharding_policy: ShardingPolicy,
	) -> Self {
		Self {
			version: Version::INVALID,
			timestamp_us: 0,
			previous_version: Version::INVALID,
			previous_version_by_key: Version::INVALID,
			pathname: pathname.into(),
			subgroup_type_index,
			subgroup_index,
			sharding_policy,
			object_locations: HashMap::new(),
			affinity_set_regex: String::new(),
			deleted: false,
		}
	}
}

impl encoding::Value for ObjectPoolMetadata {}

impl StoreObject for ObjectPoolMetadata {
	type Key = String;

	fn invalid() -> Self {
		let mut metadata = Self::new(String::new(), INVALID_SUBGROUP_TYPE_INDEX, 0, ShardingPolicy::Hash);
		metadata.deleted = false;
		metadata
	}

	fn tombstone(key: String) -> Self {
		let mut metadata = Self::new(key, INVALID_SUBGROUP_TYPE_INDEX, 0, ShardingPolicy::Hash);
		metadata.deleted = true;
		metadata
	}

	fn key_ref(&self) -> &String {
		&self.pathname
	}

	fn is_null(&self) -> bool {
		self.subgroup_type_index == INVALID_SUBGROUP_TYPE_INDEX
	}

	fn is_valid(&self) -> bool {
		self.pathname.is_valid() && self.pathname.starts_with('/')
	}

	fn version(&self) -> Version {
		self.version
	}

	fn set_version(&mut self, version: Version) {
		self.version = version;
	}

	fn timestamp_us(&self) -> u64 {
		self.timestamp_us
	}

	fn set_timestamp(&mut self, timestamp_us: u64) {
		self.timestamp_us = timestamp_us;
	}

	fn previous_versions(&self) -> (Version, Version) {
		(self.previous_version, self.previous_version_by_key)
	}

	fn set_previous_versions(&mut self, prev: Version, prev_by_key: Version) {
		self.previous_version = prev;
		self.previous_version_by_key = prev_by_key;
	}

	fn verify_previous_version(&self, log_tail: Version, prev_by_key: Version) -> bool {
		// Pool mutations are optimistic: a client updates the record
		// it read, and loses if another update slipped in between.
		(!self.previous_version.is_valid()
			|| !log_tail.is_valid()
			|| self.previous_version >= log_tail)
			&& (!self.previous_version_by_key.is_valid()
				|| !prev_by_key.is_valid()
				|| self.previous_version_by_key >= prev_by_key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::encoding::Value;

	#[test]
	fn test_tombstone_is_null_and_deleted() {
		let tombstone = ObjectPoolMetadata::tombstone("/pool/a".to_string());
		assert!(tombstone.is_null());
		assert!(tombstone.deleted);
		assert!(StoreObject::is_valid(&tombstone));
	}

	#[test]
	fn test_roundtrip() {
		let mut metadata = ObjectPoolMetadata::new("/pool/a", 1, 0, ShardingPolicy::Hash);
		metadata.object_locations.insert("/pool/a/pinned".to_string(), 1);
		metadata.affinity_set_regex = "^/pool/a/(\\w+)/".to_string();

		let decoded = ObjectPoolMetadata::decode(&metadata.encode()).unwrap();
		assert_eq!(metadata, decoded);
	}

	#[test]
	fn test_stale_update_is_rejected() {
		let mut update = ObjectPoolMetadata::new("/pool/a", 1, 0, ShardingPolicy::Hash);
		update.previous_version_by_key = Version(3);
		assert!(update.verify_previous_version(Version(9), Version(3)));
		assert!(!update.verify_previous_version(Version(9), Version(4)));
	}
}
