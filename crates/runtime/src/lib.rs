// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! The group-communication runtime boundary and its in-process
//! implementation.
//!
//! The distributed deployment consumes an external runtime for
//! totally-ordered broadcast, version/HLC minting, membership, and
//! persistence callbacks. [`LocalRuntime`] provides those semantics in
//! one process, with one ordered-delivery thread per shard over bounded
//! channels, and backs the server binary and the end-to-end tests.

pub use clock::HybridClock;
pub use group::{LocalRuntime, RuntimeOptions};
pub use shard::Shard;

mod clock;
mod group;
mod shard;
