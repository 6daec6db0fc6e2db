// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;

use tracing::{debug, info};

use weir_core::{NodeId, Object, Result, ServiceConfig, ShardRef, SubgroupKind};
use weir_flow::{
	DataFlowGraph, EngineConfig, ExecutionEngine, OcdpoInfo, PrefixEntry, PrefixRegistry,
	UdlRegistry,
};
use weir_runtime::{LocalRuntime, RuntimeOptions};
use weir_store::CriticalDataPathObserver;

use crate::client::ServiceClient;
use crate::dispatch::DataPathDispatcher;

/// One runnable node: the runtime with its shards, the execution
/// engine, the prefix registry fed by the configured data-flow graphs,
/// and the client facade handed to UDLs.
pub struct ServiceHost {
	registry: Arc<PrefixRegistry<PrefixEntry>>,
	engine: Arc<ExecutionEngine>,
	udls: UdlRegistry,
	runtime: Arc<LocalRuntime>,
	client: Arc<ServiceClient>,
}

impl ServiceHost {
	/// Builds the node: engine and registry first, then the runtime
	/// with one dispatcher per replica, then the client; `register_udls`
	/// runs with the live client before the graphs install, so UDL
	/// factories can capture it for their emissions.
	pub fn build(
		config: ServiceConfig,
		dfgs: Vec<DataFlowGraph>,
		options: RuntimeOptions,
		register_udls: impl FnOnce(&Arc<ServiceClient>, &UdlRegistry) -> Result<()>,
	) -> Result<Self> {
		config.validate()?;

		let registry = Arc::new(PrefixRegistry::new());
		let engine = Arc::new(ExecutionEngine::spawn(EngineConfig::from(&config)));

		let runtime = {
			let registry = Arc::clone(&registry);
			let engine = Arc::clone(&engine);
			let dispatcher_config = config.clone();
			let factory = move |_kind: SubgroupKind, _shard: ShardRef, member: NodeId| {
				Arc::new(DataPathDispatcher::new(
					Arc::clone(&registry),
					Arc::clone(&engine),
					member,
					&dispatcher_config,
				)) as Arc<dyn CriticalDataPathObserver<Object<String>>>
			};
			Arc::new(LocalRuntime::build(&config, &factory, options)?)
		};

		// The client acts as a node outside every shard.
		let client_node = config
			.layout
			.iter()
			.flat_map(|type_layout| &type_layout.subgroups)
			.flat_map(|subgroup| &subgroup.shards)
			.flat_map(|shard| &shard.replicas)
			.max()
			.map(|largest| largest + 1)
			.unwrap_or(0);
		let client = Arc::new(ServiceClient::new(Arc::clone(&runtime), client_node));

		let udls = UdlRegistry::new();
		register_udls(&client, &udls)?;

		let host = Self {
			registry,
			engine,
			udls,
			runtime,
			client,
		};
		for graph in &dfgs {
			host.install_data_flow_graph(graph)?;
		}
		info!(graphs = dfgs.len(), "service host up");
		Ok(host)
	}

	/// Registers every vertex of `graph` in the prefix registry,
	/// instantiating its UDLs.
	pub fn install_data_flow_graph(&self, graph: &DataFlowGraph) -> Result<()> {
		for vertex in &graph.vertices {
			for spec in &vertex.udls {
				let info = OcdpoInfo::instantiate(&self.udls, spec)?;
				self.registry.atomically_modify(
					&vertex.pathname,
					|current| {
						Some(Arc::new(match current {
							Some(entry) => entry.with_added(&graph.id, info),
							None => PrefixEntry::new().with_added(&graph.id, info),
						}))
					},
					true,
				);
			}
			debug!(dfg = %graph.id, prefix = %vertex.pathname, udls = vertex.udls.len(), "vertex installed");
		}
		Ok(())
	}

	/// Drops every registration `graph` installed; prefixes whose
	/// entries become empty are cleared.
	pub fn remove_data_flow_graph(&self, graph: &DataFlowGraph) {
		for vertex in &graph.vertices {
			self.registry.atomically_modify(
				&vertex.pathname,
				|current| {
					current.and_then(|entry| {
						let next = entry.without_dfg(&graph.id);
						if next.is_empty() {
							None
						} else {
							Some(Arc::new(next))
						}
					})
				},
				false,
			);
		}
	}

	pub fn client(&self) -> &Arc<ServiceClient> {
		&self.client
	}

	/// A facade acting as `node_id`, sharing this host's runtime.
	pub fn client_as(&self, node_id: NodeId) -> Arc<ServiceClient> {
		Arc::new(ServiceClient::new(Arc::clone(&self.runtime), node_id))
	}

	pub fn runtime(&self) -> &Arc<LocalRuntime> {
		&self.runtime
	}

	pub fn udl_registry(&self) -> &UdlRegistry {
		&self.udls
	}

	pub fn engine(&self) -> &Arc<ExecutionEngine> {
		&self.engine
	}

	/// Graceful teardown: stop ordered delivery first so no new
	/// actions are produced, then drain and join the engine.
	pub fn shut_down(&self) {
		self.runtime.shut_down();
		self.engine.shut_down();
		info!("service host down");
	}
}

impl Drop for ServiceHost {
	fn drop(&mut self) {
		self.shut_down();
	}
}
