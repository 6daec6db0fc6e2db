// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::BTreeMap;
use std::sync::Arc;

use weir_core::{NodeId, Object, Version};

use crate::graph::DestinationKind;
use crate::udl::UserDefinedLogic;

/// Everything a UDL sees for one matched delivery.
pub struct UdlInvocation<'a> {
	pub sender: NodeId,
	/// The full key whose pathname matched the registered prefix.
	pub key: &'a str,
	/// `key[..prefix_length]` is the matched prefix.
	pub prefix_length: usize,
	pub version: Version,
	pub value: &'a Arc<Object<String>>,
	/// The vertex's declared downstream edges. The engine does not
	/// interpret them; emitting to them is the UDL's business.
	pub outputs: &'a BTreeMap<String, DestinationKind>,
	pub worker_id: usize,
}

/// One unit of off-critical-path work: a matched UDL plus the shared
/// value handle. Actions are move-only across the queue boundary; the
/// `value` handle is the sole reference to the object body kept alive
/// after the critical path returns.
pub struct Action {
	pub sender: NodeId,
	pub key: String,
	pub prefix_length: usize,
	pub version: Version,
	pub udl: Arc<dyn UserDefinedLogic>,
	pub value: Arc<Object<String>>,
	pub outputs: Arc<BTreeMap<String, DestinationKind>>,
}

impl Action {
	/// Runs the UDL on the worker that dequeued this action.
	pub fn fire(self, worker_id: usize) {
		let invocation = UdlInvocation {
			sender: self.sender,
			key: &self.key,
			prefix_length: self.prefix_length,
			version: self.version,
			value: &self.value,
			outputs: &self.outputs,
			worker_id,
		};
		self.udl.handle(invocation);
	}
}

impl std::fmt::Debug for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Action")
			.field("sender", &self.sender)
			.field("key", &self.key)
			.field("prefix_length", &self.prefix_length)
			.field("version", &self.version)
			.finish_non_exhaustive()
	}
}
