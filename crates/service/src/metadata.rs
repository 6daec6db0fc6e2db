// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use weir_core::{Error, ObjectPoolMetadata, Result, ShardingPolicy, SubgroupId};

/// The reserved subgroup hosting the object-pool directory.
pub const METADATA_SUBGROUP: SubgroupId = SubgroupId::new(0, 0);

/// Where a key lives: the pool's subgroup and the shard within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolLocation {
	pub subgroup: SubgroupId,
	pub shard_index: u32,
}

struct CachedPool {
	metadata: ObjectPoolMetadata,
	affinity_regex: Option<Regex>,
}

/// The client-side cache of pool metadata: pool pathname to record,
/// with the affinity-set regex compiled once per pool. Many readers,
/// one writer on refresh.
pub struct PoolCache {
	pools: RwLock<HashMap<String, CachedPool>>,
}

impl PoolCache {
	pub fn new() -> Self {
		Self {
			pools: RwLock::new(HashMap::new()),
		}
	}

	/// Caches a pool record, compiling its affinity regex. A broken
	/// regex disables affinity extraction for the pool rather than
	/// failing the lookup.
	pub fn insert(&self, metadata: ObjectPoolMetadata) {
		let affinity_regex = if metadata.affinity_set_regex.is_empty() {
			None
		} else {
			match Regex::new(&metadata.affinity_set_regex) {
				Ok(regex) => Some(regex),
				Err(err) => {
					warn!(
						pool = %metadata.pathname,
						"invalid affinity regex, ignoring: {err}"
					);
					None
				}
			}
		};
		self.pools.write().insert(
			metadata.pathname.clone(),
			CachedPool {
				metadata,
				affinity_regex,
			},
		);
	}

	pub fn evict(&self, pathname: &str) {
		self.pools.write().remove(pathname);
	}

	pub fn contains(&self, pathname: &str) -> bool {
		self.pools.read().contains_key(pathname)
	}

	pub fn get(&self, pathname: &str) -> Option<ObjectPoolMetadata> {
		self.pools.read().get(pathname).map(|pool| pool.metadata.clone())
	}

	pub fn cached_pathnames(&self) -> Vec<String> {
		self.pools.read().keys().cloned().collect()
	}

	/// The longest cached pool pathname that prefixes `key` at a
	/// component boundary.
	pub fn longest_prefix_match(&self, key: &str) -> Option<String> {
		let pools = self.pools.read();
		let mut candidate = key;
		while let Some(at) = candidate.rfind('/') {
			candidate = &candidate[..at];
			if candidate.is_empty() {
				break;
			}
			if pools.contains_key(candidate) {
				return Some(candidate.to_string());
			}
		}
		None
	}

	/// Resolves `key` against a cached pool: placement override first,
	/// then the sharding policy over `num_shards`.
	pub fn resolve(&self, pathname: &str, key: &str, num_shards: u32) -> Result<PoolLocation> {
		let pools = self.pools.read();
		let pool = pools
			.get(pathname)
			.ok_or_else(|| Error::NotFound(format!("object pool {pathname} is not cached")))?;
		if pool.metadata.deleted {
			return Err(Error::NotFound(format!("object pool {pathname} has been removed")));
		}
		let subgroup = SubgroupId::new(pool.metadata.subgroup_type_index, pool.metadata.subgroup_index);

		if let Some(shard_index) = pool.metadata.object_locations.get(key) {
			return Ok(PoolLocation {
				subgroup,
				shard_index: *shard_index,
			});
		}

		match pool.metadata.sharding_policy {
			ShardingPolicy::Hash => {
				let routed = match &pool.affinity_regex {
					None => key,
					Some(regex) => match regex.captures(key) {
						Some(captures) => captures
							.get(1)
							.or_else(|| captures.get(0))
							.map(|matched| matched.as_str())
							.unwrap_or(key),
						None => key,
					},
				};
				Ok(PoolLocation {
					subgroup,
					shard_index: (xxh3_64(routed.as_bytes()) % num_shards as u64) as u32,
				})
			}
			ShardingPolicy::Range => Err(Error::Policy(format!(
				"object pool {pathname} is configured for RANGE sharding without a range table"
			))),
		}
	}
}

impl Default for PoolCache {
	fn default() -> Self {
		Self::new()
	}
}
