// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! The data-flow graph model. A `dfgs.json` file is a list of graphs:
//!
//! ```json
//! [
//!     {
//!         "id": "26639e22-9b3c-11eb-a237-0242ac110002",
//!         "desc": "example DFG",
//!         "graph": [
//!             {
//!                 "pathname": "/pool0/",
//!                 "user_defined_logic_list": ["4e4ecc86-..."],
//!                 "user_defined_logic_stateful_list": ["stateful"],
//!                 "user_defined_logic_hook_list": ["both"],
//!                 "shard_dispatcher_list": ["one"],
//!                 "user_defined_logic_config_list": [{}],
//!                 "destinations": [{"/pool1/": "put"}]
//!             }
//!         ]
//!     }
//! ]
//! ```
//!
//! The per-UDL lists are optional and positional: entry `i` configures
//! the `i`-th UDL of `user_defined_logic_list`. Missing lists fall back
//! to the defaults (dispatcher `one`, environment `pthread`,
//! statefulness `stateful`, hook `both`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use weir_core::{Error, Result};

/// How a matched ordered put is dispatched across shard members: one
/// member elected by key hash, or every replica.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardDispatcher {
	#[default]
	One,
	All,
}

/// Where a UDL executes. Only in-process threads are supported by this
/// core; the remaining modes parse for compatibility and are rejected
/// at load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionEnvironment {
	#[default]
	#[serde(rename = "pthread")]
	Thread,
	#[serde(rename = "process")]
	Process,
	#[serde(rename = "mproc")]
	MProcess,
	#[serde(rename = "docker")]
	Container,
	#[serde(rename = "mdocker")]
	MContainer,
}

/// How invocations of one UDL are scheduled across workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statefulness {
	/// Pinned to one worker by key hash: per-key invocation order
	/// follows delivery order.
	#[default]
	Stateful,
	/// Any worker of the pool.
	Stateless,
	/// One dedicated worker for the whole queue.
	#[serde(rename = "singlethreaded")]
	SingleThreaded,
}

/// Which delivery paths invoke a UDL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UdlHook {
	#[serde(rename = "ordered")]
	OrderedPut,
	#[serde(rename = "trigger")]
	TriggerPut,
	#[default]
	Both,
}

impl UdlHook {
	/// Whether a delivery on the given path (trigger or ordered)
	/// invokes the UDL.
	pub fn fires_on(&self, is_trigger: bool) -> bool {
		match self {
			UdlHook::Both => true,
			UdlHook::TriggerPut => is_trigger,
			UdlHook::OrderedPut => !is_trigger,
		}
	}
}

/// The edge tag of a destination: emit with `put` (ordered, stored) or
/// `trigger_put` (p2p, not stored).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
	Put,
	TriggerPut,
}

/// One UDL registration of a vertex.
#[derive(Clone, Debug)]
pub struct DfgUdl {
	pub udl_id: String,
	pub config: serde_json::Value,
	pub shard_dispatcher: ShardDispatcher,
	pub environment: ExecutionEnvironment,
	pub statefulness: Statefulness,
	pub hook: UdlHook,
	/// Downstream pathname to edge tag.
	pub destinations: BTreeMap<String, DestinationKind>,
}

/// One vertex: a registered prefix and the UDLs it fires.
#[derive(Clone, Debug)]
pub struct DfgVertex {
	/// Absolute pathname, normalized to end with '/'.
	pub pathname: String,
	pub udls: Vec<DfgUdl>,
}

/// One data-flow graph from `dfgs.json`.
#[derive(Clone, Debug)]
pub struct DataFlowGraph {
	pub id: String,
	pub description: String,
	pub vertices: Vec<DfgVertex>,
}

#[derive(Deserialize)]
struct RawEnvironment {
	mode: ExecutionEnvironment,
	#[serde(default, rename = "spec")]
	_spec: serde_json::Value,
}

#[derive(Deserialize)]
struct RawVertex {
	pathname: String,
	user_defined_logic_list: Vec<String>,
	#[serde(default)]
	shard_dispatcher_list: Vec<ShardDispatcher>,
	#[serde(default)]
	execution_environment: Vec<RawEnvironment>,
	#[serde(default)]
	user_defined_logic_stateful_list: Vec<Statefulness>,
	#[serde(default)]
	user_defined_logic_hook_list: Vec<UdlHook>,
	#[serde(default)]
	user_defined_logic_config_list: Vec<serde_json::Value>,
	#[serde(default)]
	destinations: Vec<BTreeMap<String, DestinationKind>>,
}

#[derive(Deserialize)]
struct RawGraph {
	id: String,
	#[serde(default)]
	desc: String,
	graph: Vec<RawVertex>,
}

fn positional<T: Clone + Default>(list: &[T], at: usize, len: usize) -> Result<T> {
	if list.is_empty() {
		return Ok(T::default());
	}
	if list.len() != len {
		return Err(Error::Fatal(format!(
			"per-UDL list has {} entries for {len} UDLs",
			list.len()
		)));
	}
	Ok(list[at].clone())
}

impl DataFlowGraph {
	/// Parses every graph in a `dfgs.json` document.
	pub fn parse_all(json: &str) -> Result<Vec<DataFlowGraph>> {
		let raw: Vec<RawGraph> =
			serde_json::from_str(json).map_err(|err| Error::Fatal(format!("malformed dfgs.json: {err}")))?;
		raw.into_iter().map(DataFlowGraph::from_raw).collect()
	}

	/// Loads every graph from a `dfgs.json` file.
	pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<DataFlowGraph>> {
		let json = std::fs::read_to_string(path.as_ref())
			.map_err(|err| Error::Fatal(format!("cannot read {}: {err}", path.as_ref().display())))?;
		let graphs = Self::parse_all(&json)?;
		debug!(file = %path.as_ref().display(), graphs = graphs.len(), "loaded data-flow graphs");
		Ok(graphs)
	}

	fn from_raw(raw: RawGraph) -> Result<DataFlowGraph> {
		let mut vertices = Vec::with_capacity(raw.graph.len());
		for vertex in raw.graph {
			let mut pathname = vertex.pathname;
			if !pathname.starts_with('/') {
				return Err(Error::Fatal(format!(
					"DFG {}: pathname {pathname} is not absolute",
					raw.id
				)));
			}
			if !pathname.ends_with('/') {
				pathname.push('/');
			}

			let count = vertex.user_defined_logic_list.len();
			if count == 0 {
				return Err(Error::Fatal(format!(
					"DFG {}: vertex {pathname} has no UDLs",
					raw.id
				)));
			}
			let mut udls = Vec::with_capacity(count);
			for (at, udl_id) in vertex.user_defined_logic_list.iter().enumerate() {
				let environment = if vertex.execution_environment.is_empty() {
					ExecutionEnvironment::default()
				} else if vertex.execution_environment.len() != count {
					return Err(Error::Fatal(format!(
						"per-UDL list has {} entries for {count} UDLs",
						vertex.execution_environment.len()
					)));
				} else {
					vertex.execution_environment[at].mode
				};
				if environment != ExecutionEnvironment::Thread {
					return Err(Error::Fatal(format!(
						"DFG {}: execution environment {environment:?} is not supported",
						raw.id
					)));
				}

				let destinations = if vertex.destinations.is_empty() {
					BTreeMap::new()
				} else {
					positional(&vertex.destinations, at, count)?
				};
				udls.push(DfgUdl {
					udl_id: udl_id.clone(),
					config: positional(&vertex.user_defined_logic_config_list, at, count)?,
					shard_dispatcher: positional(&vertex.shard_dispatcher_list, at, count)?,
					environment,
					statefulness: positional(
						&vertex.user_defined_logic_stateful_list,
						at,
						count,
					)?,
					hook: positional(&vertex.user_defined_logic_hook_list, at, count)?,
					destinations: destinations
						.into_iter()
						.map(|(mut path, kind)| {
							if !path.ends_with('/') {
								path.push('/');
							}
							(path, kind)
						})
						.collect(),
				});
			}
			vertices.push(DfgVertex {
				pathname,
				udls,
			});
		}
		Ok(DataFlowGraph {
			id: raw.id,
			description: raw.desc,
			vertices,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const EXAMPLE: &str = r#"[
		{
			"id": "26639e22-9b3c-11eb-a237-0242ac110002",
			"desc": "uppercase pipeline",
			"graph": [
				{
					"pathname": "/pool/a",
					"user_defined_logic_list": ["4e4ecc86-9b3c-11eb-b70c-0242ac110002"],
					"user_defined_logic_stateful_list": ["stateful"],
					"user_defined_logic_hook_list": ["ordered"],
					"shard_dispatcher_list": ["one"],
					"user_defined_logic_config_list": [{"upper": true}],
					"destinations": [{"/pool/b/": "put"}]
				},
				{
					"pathname": "/pool/b/",
					"user_defined_logic_list": ["4f0373a2-9b3c-11eb-a651-0242ac110002"]
				}
			]
		}
	]"#;

	#[test]
	fn test_parse_example_graph() {
		let graphs = DataFlowGraph::parse_all(EXAMPLE).unwrap();
		assert_eq!(graphs.len(), 1);
		let graph = &graphs[0];
		assert_eq!(graph.description, "uppercase pipeline");
		assert_eq!(graph.vertices.len(), 2);

		// Pathnames normalize to a trailing separator.
		let first = &graph.vertices[0];
		assert_eq!(first.pathname, "/pool/a/");
		let udl = &first.udls[0];
		assert_eq!(udl.hook, UdlHook::OrderedPut);
		assert_eq!(udl.statefulness, Statefulness::Stateful);
		assert_eq!(udl.shard_dispatcher, ShardDispatcher::One);
		assert_eq!(udl.config["upper"], serde_json::json!(true));
		assert_eq!(udl.destinations.get("/pool/b/"), Some(&DestinationKind::Put));

		// Omitted lists take the documented defaults.
		let second = &graph.vertices[1].udls[0];
		assert_eq!(second.hook, UdlHook::Both);
		assert_eq!(second.statefulness, Statefulness::Stateful);
		assert_eq!(second.shard_dispatcher, ShardDispatcher::One);
		assert!(second.destinations.is_empty());
	}

	#[test]
	fn test_mismatched_list_lengths_are_rejected() {
		let bad = r#"[{
			"id": "x",
			"graph": [{
				"pathname": "/p/",
				"user_defined_logic_list": ["a", "b"],
				"user_defined_logic_hook_list": ["both"]
			}]
		}]"#;
		assert!(DataFlowGraph::parse_all(bad).is_err());
	}

	#[test]
	fn test_non_thread_environment_is_rejected() {
		let bad = r#"[{
			"id": "x",
			"graph": [{
				"pathname": "/p/",
				"user_defined_logic_list": ["a"],
				"execution_environment": [{"mode": "docker", "spec": {}}]
			}]
		}]"#;
		assert!(DataFlowGraph::parse_all(bad).is_err());
	}

	#[test]
	fn test_relative_pathname_is_rejected() {
		let bad = r#"[{
			"id": "x",
			"graph": [{
				"pathname": "pool/",
				"user_defined_logic_list": ["a"]
			}]
		}]"#;
		assert!(DataFlowGraph::parse_all(bad).is_err());
	}

	#[test]
	fn test_hook_firing() {
		assert!(UdlHook::Both.fires_on(true));
		assert!(UdlHook::Both.fires_on(false));
		assert!(UdlHook::TriggerPut.fires_on(true));
		assert!(!UdlHook::TriggerPut.fires_on(false));
		assert!(UdlHook::OrderedPut.fires_on(false));
		assert!(!UdlHook::OrderedPut.fires_on(true));
	}
}
