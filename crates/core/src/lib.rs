// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

#![cfg_attr(not(debug_assertions), deny(missing_docs))]

//! Core data model of the Weir key/value service: versioned objects,
//! hybrid-logical timestamps, the capability surface stores rely on, the
//! binary encoding used for deltas and wire payloads, and the shared
//! error taxonomy.

pub use config::{ServiceConfig, ShardLayout, SubgroupKind, SubgroupLayout, SubgroupTypeLayout};
pub use encoding::Value;
pub use error::Error;
pub use object::{Blob, Object, ObjectKey, StoreObject};
pub use object_pool::{ObjectPoolMetadata, ShardingPolicy, INVALID_SUBGROUP_TYPE_INDEX};
pub use version::{Version, VersionStamp};

pub mod config;
pub mod encoding;
mod error;
mod object;
mod object_pool;
mod version;

pub type Result<T> = std::result::Result<T, Error>;

/// Node identifier inside a shard's member list, assigned by the group
/// runtime.
pub type NodeId = u32;

/// Identifies one replicated subgroup: `(subgroup type index, subgroup
/// index)` into the service layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SubgroupId {
	pub type_index: u32,
	pub subgroup_index: u32,
}

impl SubgroupId {
	pub const fn new(type_index: u32, subgroup_index: u32) -> Self {
		Self {
			type_index,
			subgroup_index,
		}
	}
}

impl std::fmt::Display for SubgroupId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.type_index, self.subgroup_index)
	}
}

/// Identifies one shard of one subgroup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ShardRef {
	pub subgroup: SubgroupId,
	pub shard_index: u32,
}

impl ShardRef {
	pub const fn new(subgroup: SubgroupId, shard_index: u32) -> Self {
		Self {
			subgroup,
			shard_index,
		}
	}
}

impl std::fmt::Display for ShardRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}", self.subgroup, self.shard_index)
	}
}
