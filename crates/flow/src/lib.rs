// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! The off-critical data path of Weir: the user-supplied data-flow
//! graph, the prefix registry the critical path consults on every
//! delivery, the user-defined-logic plugin surface, and the worker-pool
//! engine that runs matched handlers.

pub use action::{Action, UdlInvocation};
pub use engine::{EngineConfig, ExecutionEngine, ACTION_BUFFER_SIZE};
pub use graph::{
	DataFlowGraph, DestinationKind, DfgUdl, DfgVertex, ExecutionEnvironment, ShardDispatcher,
	Statefulness, UdlHook,
};
pub use registry::PrefixRegistry;
pub use udl::{OcdpoInfo, PrefixEntry, UdlRegistry, UserDefinedLogic};

mod action;
mod engine;
mod graph;
mod registry;
mod udl;
