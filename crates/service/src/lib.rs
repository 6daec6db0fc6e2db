// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! The service layer of Weir: the replicated object-pool directory
//! with its client-side cache, the critical-data-path dispatcher that
//! feeds the execution engine, the client facade, and the host that
//! wires a runnable node together.

pub use client::{Notification, ServiceClient, ShardMemberSelectionPolicy};
pub use dispatch::DataPathDispatcher;
pub use host::ServiceHost;
pub use metadata::{PoolCache, PoolLocation, METADATA_SUBGROUP};

mod client;
mod dispatch;
mod host;
mod metadata;
