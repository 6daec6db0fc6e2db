// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! The store variants. All four share the [`ShardStore`] contract but
//! differ in durability, visibility, and signing semantics:
//!
//! * [`VolatileStore`]: in-memory only, no history.
//! * [`PersistentStore`]: delta-logged, versioned and temporal reads.
//! * [`SignatureStore`]: persistent hashes with a chained signature
//!   per log entry and a data-to-hash version translation.
//! * [`TriggerStore`]: stores nothing; only the trigger path fires.

pub use persistent::PersistentStore;
pub use signature::SignatureStore;
pub use trigger::TriggerStore;
pub use volatile::VolatileStore;

use weir_core::{Error, NodeId, Result, StoreObject, Version, VersionStamp};

mod persistent;
mod signature;
mod trigger;
mod volatile;

/// The per-replica store contract.
///
/// Ordered operations run on the shard's single ordered-delivery thread
/// with the `(version, timestamp)` stamp minted by the runtime for the
/// delivery; they must be deterministic. A rejected mutation returns
/// [`VersionStamp::INVALID`] and leaves the shard state untouched.
///
/// The unprefixed read operations are point-to-point: they reflect the
/// local replica's delivered state only, and are safe from any thread.
/// The `multi_` client forms are served by routing the matching
/// `ordered_` operation through ordered delivery.
pub trait ShardStore<O: StoreObject>: Send + Sync {
	fn ordered_put(&self, value: O, stamp: VersionStamp, sender: NodeId) -> VersionStamp;

	fn ordered_put_and_forget(&self, value: O, stamp: VersionStamp, sender: NodeId) {
		let _ = self.ordered_put(value, stamp, sender);
	}

	fn ordered_remove(&self, key: O::Key, stamp: VersionStamp, sender: NodeId) -> VersionStamp;

	fn ordered_get(&self, key: &O::Key) -> O;

	fn ordered_list_keys(&self, prefix: &str) -> Vec<O::Key>;

	fn ordered_get_size(&self, key: &O::Key) -> u64;

	/// Forwards the value to the critical-data-path observer without
	/// touching shard state.
	fn trigger_put(&self, value: O, sender: NodeId);

	/// Point-to-point read. `version` of `None` means the current
	/// state; a specific version is served from the log where one
	/// exists. `stable` restricts the read to globally durable state.
	/// With `exact`, a version at which the key was not mutated is a
	/// not-found error instead of an invalid object.
	fn get(&self, key: &O::Key, version: Option<Version>, stable: bool, exact: bool) -> Result<O>;

	fn get_by_time(&self, key: &O::Key, ts_us: u64, stable: bool) -> Result<O>;

	fn list_keys(&self, prefix: &str, version: Option<Version>, stable: bool) -> Result<Vec<O::Key>>;

	fn list_keys_by_time(&self, prefix: &str, ts_us: u64, stable: bool) -> Result<Vec<O::Key>>;

	fn get_size(&self, key: &O::Key, version: Option<Version>, stable: bool, exact: bool) -> Result<u64>;

	fn get_size_by_time(&self, key: &O::Key, ts_us: u64, stable: bool) -> Result<u64>;

	/// The latest locally delivered version.
	fn latest_version(&self) -> Option<Version>;

	fn latest_persisted_version(&self) -> Option<Version> {
		None
	}

	/// Persistence-pump hook; a no-op for variants without a log.
	fn advance_persistence_frontier(&self, _version: Version, _is_global: bool) {}

	/// Signature retrieval, only meaningful on the signature variant.
	fn get_signature(&self, key: &O::Key, _version: Option<Version>) -> Result<(Vec<u8>, Version)> {
		Err(Error::Policy(format!("this store variant keeps no signatures (key {key})")))
	}

	fn get_signature_by_version(&self, version: Version) -> Result<(Vec<u8>, Version)> {
		Err(Error::Policy(format!("this store variant keeps no signatures (version {version})")))
	}
}
