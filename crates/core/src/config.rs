// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_worker_pool_size() -> usize {
	2
}

/// The store flavor hosted by a subgroup type. Type index 0 is reserved
/// for the persistent metadata subgroup backing the object-pool
/// directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgroupKind {
	Metadata,
	Volatile,
	Persistent,
	Signature,
	Trigger,
}

/// One shard: the ids of the nodes replicating it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardLayout {
	pub replicas: Vec<crate::NodeId>,
}

/// One subgroup of a subgroup type: its shards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubgroupLayout {
	pub shards: Vec<ShardLayout>,
}

/// All subgroups of one store flavor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubgroupTypeLayout {
	pub kind: SubgroupKind,
	pub subgroups: Vec<SubgroupLayout>,
}

/// Service configuration, deserialized from a JSON file at startup.
///
/// The worker-pool keys carry the names the deployment tooling has
/// always used; the stateful pool sizes are also the modulus of the
/// key-hash worker routing and must therefore match on every node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
	#[serde(default = "default_worker_pool_size")]
	pub num_stateless_workers_for_multicast_ocdp: usize,
	#[serde(default = "default_worker_pool_size")]
	pub num_stateless_workers_for_p2p_ocdp: usize,
	#[serde(default = "default_worker_pool_size")]
	pub num_stateful_workers_for_multicast_ocdp: usize,
	#[serde(default = "default_worker_pool_size")]
	pub num_stateful_workers_for_p2p_ocdp: usize,

	/// CPU cores available to worker pools. Empty means no pinning.
	#[serde(default)]
	pub cpu_cores: Vec<usize>,

	/// Per-worker core pinning: worker name (e.g. `"m_stateful-1"`) to
	/// the cores it may run on.
	#[serde(default)]
	pub worker_cpu_affinity: HashMap<String, Vec<usize>>,

	/// Comma-separated numeric event tags whose timestamps would be
	/// recorded by an evaluation logger. Parsed and exposed; no logger
	/// is wired in this core.
	#[serde(default)]
	pub timestamp_tag_enabler: String,

	/// The subgroup layout, outermost index being the subgroup type
	/// index. Entry 0 must be the metadata subgroup type with exactly
	/// one subgroup.
	pub layout: Vec<SubgroupTypeLayout>,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			num_stateless_workers_for_multicast_ocdp: default_worker_pool_size(),
			num_stateless_workers_for_p2p_ocdp: default_worker_pool_size(),
			num_stateful_workers_for_multicast_ocdp: default_worker_pool_size(),
			num_stateful_workers_for_p2p_ocdp: default_worker_pool_size(),
			cpu_cores: Vec::new(),
			worker_cpu_affinity: HashMap::new(),
			timestamp_tag_enabler: String::new(),
			layout: vec![SubgroupTypeLayout {
				kind: SubgroupKind::Metadata,
				subgroups: vec![SubgroupLayout {
					shards: vec![ShardLayout {
						replicas: vec![0],
					}],
				}],
			}],
		}
	}
}

impl ServiceConfig {
	/// Loads and validates a configuration from a JSON file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let raw = std::fs::read_to_string(path.as_ref())
			.map_err(|err| Error::Fatal(format!("cannot read config {}: {err}", path.as_ref().display())))?;
		let config: ServiceConfig = serde_json::from_str(&raw)
			.map_err(|err| Error::Fatal(format!("malformed config {}: {err}", path.as_ref().display())))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.layout.is_empty() || self.layout[0].kind != SubgroupKind::Metadata {
			return Err(Error::Fatal("layout entry 0 must be the metadata subgroup type".into()));
		}
		if self.layout[0].subgroups.len() != 1 {
			return Err(Error::Fatal("the metadata type hosts exactly one subgroup".into()));
		}
		if self.layout.iter().skip(1).any(|layout| layout.kind == SubgroupKind::Metadata) {
			return Err(Error::Fatal("only layout entry 0 may be the metadata type".into()));
		}
		for (type_index, type_layout) in self.layout.iter().enumerate() {
			for (subgroup_index, subgroup) in type_layout.subgroups.iter().enumerate() {
				if subgroup.shards.is_empty() {
					return Err(Error::Fatal(format!(
						"subgroup {type_index}:{subgroup_index} has no shards"
					)));
				}
				if subgroup.shards.iter().any(|shard| shard.replicas.is_empty()) {
					return Err(Error::Fatal(format!(
						"subgroup {type_index}:{subgroup_index} has an empty shard"
					)));
				}
			}
		}
		if self.num_stateful_workers_for_multicast_ocdp == 0
			|| self.num_stateful_workers_for_p2p_ocdp == 0
			|| self.num_stateless_workers_for_multicast_ocdp == 0
			|| self.num_stateless_workers_for_p2p_ocdp == 0
		{
			return Err(Error::Fatal("worker pool sizes must be non-zero".into()));
		}
		Ok(())
	}

	/// The numeric tags enabled by `timestamp_tag_enabler`. Malformed
	/// entries are ignored.
	pub fn enabled_timestamp_tags(&self) -> BTreeSet<u64> {
		self.timestamp_tag_enabler
			.split(',')
			.filter_map(|tag| tag.trim().parse().ok())
			.collect()
	}
}
