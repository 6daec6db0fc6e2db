// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use weir_core::{NodeId, Object, ObjectKey, ServiceConfig, ShardRef, StoreObject, SubgroupId};
use weir_flow::{Action, ExecutionEngine, PrefixEntry, PrefixRegistry, ShardDispatcher};
use weir_store::CriticalDataPathObserver;

/// The critical-data-path observer wired into every data store
/// replica: on each accepted mutation or trigger put it walks the
/// prefix registry for the key's pathname and posts one action per
/// matching UDL to the execution engine.
///
/// One dispatcher exists per replica, carrying the member node it acts
/// for: a UDL registered with the ONE shard dispatcher runs only on
/// the member elected by key hash, while ALL runs on every replica.
pub struct DataPathDispatcher {
	registry: Arc<PrefixRegistry<PrefixEntry>>,
	engine: Arc<ExecutionEngine>,
	/// The member node this replica acts for.
	node_id: NodeId,
	/// Member lists per shard, from the configured layout.
	members: HashMap<ShardRef, Vec<NodeId>>,
}

impl DataPathDispatcher {
	pub fn new(
		registry: Arc<PrefixRegistry<PrefixEntry>>,
		engine: Arc<ExecutionEngine>,
		node_id: NodeId,
		config: &ServiceConfig,
	) -> Self {
		let mut members = HashMap::new();
		for (type_index, type_layout) in config.layout.iter().enumerate() {
			for (subgroup_index, subgroup) in type_layout.subgroups.iter().enumerate() {
				for (shard_index, shard) in subgroup.shards.iter().enumerate() {
					members.insert(
						ShardRef::new(
							SubgroupId::new(type_index as u32, subgroup_index as u32),
							shard_index as u32,
						),
						shard.replicas.clone(),
					);
				}
			}
		}
		Self {
			registry,
			engine,
			node_id,
			members,
		}
	}

	/// The member of `shard` elected to run ONE-dispatched UDLs for
	/// `key`.
	fn elected_member(&self, shard: ShardRef, key: &String) -> Option<NodeId> {
		let members = self.members.get(&shard)?;
		Some(members[(key.route_hash() % members.len() as u64) as usize])
	}
}

impl CriticalDataPathObserver<Object<String>> for DataPathDispatcher {
	fn observe(
		&self,
		shard: ShardRef,
		sender: NodeId,
		key: &String,
		value: &Arc<Object<String>>,
		is_trigger: bool,
	) {
		// The value handle is cloned per matching UDL, never the
		// object body.
		self.registry.collect_values_for_prefixes(key, |prefix, entry| {
			for info in entry.udls() {
				if !info.hook.fires_on(is_trigger) {
					continue;
				}
				// The shard dispatcher only applies to the ordered
				// path; trigger puts already target one member.
				if !is_trigger
					&& info.shard_dispatcher == ShardDispatcher::One
					&& self.elected_member(shard, key) != Some(self.node_id)
				{
					continue;
				}
				let action = Action {
					sender,
					key: key.clone(),
					prefix_length: prefix.len(),
					version: value.version(),
					udl: Arc::clone(&info.udl),
					value: Arc::clone(value),
					outputs: Arc::clone(&info.outputs),
				};
				if let Err(err) = self.engine.post(action, info.statefulness, is_trigger) {
					warn!(shard = %shard, %key, udl = %info.udl_id, "dropping action: {err}");
					return;
				}
			}
		});
	}
}
