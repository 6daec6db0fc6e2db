// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use weir_core::{Error, Result};

use crate::action::UdlInvocation;
use crate::graph::{DestinationKind, DfgUdl, ShardDispatcher, Statefulness, UdlHook};

/// User-defined logic: the handler fired off the critical path when a
/// delivery matches a registered prefix. Implementations capture
/// whatever they need (typically a service client handle for emitting
/// to their outputs) at construction.
pub trait UserDefinedLogic: Send + Sync {
	fn handle(&self, invocation: UdlInvocation<'_>);
}

type UdlFactory = Box<dyn Fn(&serde_json::Value) -> Arc<dyn UserDefinedLogic> + Send + Sync>;

/// UDL implementations registered at startup, keyed by UUID.
///
/// A DFG vertex names UDLs by id; instantiation hands the vertex's
/// per-UDL JSON config to the factory, so one UDL id can be registered
/// under several prefixes with different behavior.
pub struct UdlRegistry {
	factories: RwLock<HashMap<String, UdlFactory>>,
}

impl UdlRegistry {
	pub fn new() -> Self {
		Self {
			factories: RwLock::new(HashMap::new()),
		}
	}

	/// Registers a factory for `udl_id`. Re-registration replaces the
	/// previous factory.
	pub fn register(
		&self,
		udl_id: impl Into<String>,
		factory: impl Fn(&serde_json::Value) -> Arc<dyn UserDefinedLogic> + Send + Sync + 'static,
	) {
		let udl_id = udl_id.into();
		debug!(udl = %udl_id, "registered user-defined logic");
		self.factories.write().insert(udl_id, Box::new(factory));
	}

	pub fn instantiate(&self, udl_id: &str, config: &serde_json::Value) -> Result<Arc<dyn UserDefinedLogic>> {
		let factories = self.factories.read();
		let factory = factories
			.get(udl_id)
			.ok_or_else(|| Error::Fatal(format!("unknown user-defined logic {udl_id}")))?;
		Ok(factory(config))
	}

	pub fn is_registered(&self, udl_id: &str) -> bool {
		self.factories.read().contains_key(udl_id)
	}
}

impl Default for UdlRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// One instantiated UDL registration under a prefix.
pub struct OcdpoInfo {
	pub udl_id: String,
	pub shard_dispatcher: ShardDispatcher,
	pub statefulness: Statefulness,
	pub hook: UdlHook,
	pub udl: Arc<dyn UserDefinedLogic>,
	pub outputs: Arc<BTreeMap<String, DestinationKind>>,
}

impl OcdpoInfo {
	pub fn instantiate(registry: &UdlRegistry, spec: &DfgUdl) -> Result<Self> {
		Ok(Self {
			udl_id: spec.udl_id.clone(),
			shard_dispatcher: spec.shard_dispatcher,
			statefulness: spec.statefulness,
			hook: spec.hook,
			udl: registry.instantiate(&spec.udl_id, &spec.config)?,
			outputs: Arc::new(spec.destinations.clone()),
		})
	}
}

/// The value stored at a registered prefix: for each DFG id, the UDLs
/// it hung on this vertex. Entries are immutable once published; the
/// prefix registry swaps whole values copy-on-write.
pub struct PrefixEntry {
	pub by_dfg: HashMap<String, Vec<Arc<OcdpoInfo>>>,
}

impl PrefixEntry {
	pub fn new() -> Self {
		Self {
			by_dfg: HashMap::new(),
		}
	}

	/// A copy of this entry with `info` appended under `dfg_id`.
	pub fn with_added(&self, dfg_id: &str, info: OcdpoInfo) -> Self {
		let mut by_dfg = self.by_dfg.clone();
		by_dfg.entry(dfg_id.to_string()).or_default().push(Arc::new(info));
		Self {
			by_dfg,
		}
	}

	/// A copy of this entry without `dfg_id`'s registrations.
	pub fn without_dfg(&self, dfg_id: &str) -> Self {
		let mut by_dfg = self.by_dfg.clone();
		by_dfg.remove(dfg_id);
		Self {
			by_dfg,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.by_dfg.is_empty()
	}

	/// All registered UDLs across DFGs.
	pub fn udls(&self) -> impl Iterator<Item = &Arc<OcdpoInfo>> {
		self.by_dfg.values().flatten()
	}
}

impl Default for PrefixEntry {
	fn default() -> Self {
		Self::new()
	}
}
