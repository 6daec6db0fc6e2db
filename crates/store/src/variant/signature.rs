// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;
use tracing::debug;

use weir_core::encoding::Value;
use weir_core::{Error, NodeId, Result, ShardRef, StoreObject, Version, VersionStamp};

use crate::adapter::VersionedLog;
use crate::log::{DeltaLog, SignatureRecord};
use crate::observer::CriticalDataPathObserver;
use crate::signer::ShardSigner;
use crate::variant::ShardStore;

/// The signature variant: a persistent store of hash objects whose log
/// entries are chained signatures, paired with a separate persistent
/// data store.
///
/// An incoming hash object's version field carries the *data* object's
/// version; the ordered put records the data→hash translation in an
/// append-only mapping and restamps the object with the minted hash
/// version. Versioned reads and signature lookups translate through
/// that mapping with an upper-bound search.
pub struct SignatureStore<O: StoreObject + Value> {
	shard: ShardRef,
	log: VersionedLog<O>,
	signer: Arc<ShardSigner>,
	/// `(data version, hash version)` pairs ordered by data version.
	/// Append-only; readers clone the `Arc` and search without a lock
	/// held.
	version_map: RwLock<Arc<Vec<(Version, Version)>>>,
	observer: Arc<dyn CriticalDataPathObserver<O>>,
}

impl<O: StoreObject + Value> SignatureStore<O> {
	pub fn new(
		shard: ShardRef,
		log: Box<dyn DeltaLog>,
		signer: Arc<ShardSigner>,
		observer: Arc<dyn CriticalDataPathObserver<O>>,
	) -> Self {
		Self {
			shard,
			log: VersionedLog::new(log),
			signer,
			version_map: RwLock::new(Arc::new(Vec::new())),
			observer,
		}
	}

	pub fn shard(&self) -> ShardRef {
		self.shard
	}

	pub fn verifying_key(&self) -> VerifyingKey {
		self.signer.verifying_key()
	}

	/// The hash version recorded for the greatest data version at or
	/// below `data_version`.
	pub fn hash_version_for(&self, data_version: Version) -> Option<Version> {
		let map = Arc::clone(&self.version_map.read());
		let at = map.partition_point(|(data, _)| *data <= data_version);
		at.checked_sub(1).map(|at| map[at].1)
	}

	fn record_mapping(&self, data_version: Version, hash_version: Version) {
		let mut guard = self.version_map.write();
		let mut next = guard.as_ref().clone();
		let at = next.partition_point(|(data, _)| *data <= data_version);
		next.insert(at, (data_version, hash_version));
		*guard = Arc::new(next);
	}

	/// The chain tail: version and signature bytes of the last signed
	/// entry, or an empty chain for a fresh log.
	fn chain_tail(&self) -> (Version, Vec<u8>) {
		match self.log.latest_version() {
			Some(latest) => match self.log.signature(latest) {
				Some(record) => (latest, record.signature),
				None => (Version::INVALID, Vec::new()),
			},
			None => (Version::INVALID, Vec::new()),
		}
	}

	fn observe(&self, sender: NodeId, key: &O::Key, is_trigger: bool) {
		if let Some(stored) = self.log.core().ordered_get(key) {
			self.observer.observe(self.shard, sender, key, &stored, is_trigger);
		}
	}

	/// `Ok(None)` means the stable read cannot be served; `Ok(Some(v))`
	/// is the version to read at, `Ok(Some(None))` the live map (only
	/// for unstable reads).
	fn resolve(&self, version: Option<Version>, stable: bool) -> Result<Option<Option<Version>>> {
		if !stable {
			return Ok(Some(version));
		}
		match self.log.resolve_stable(version) {
			Ok(Some(resolved)) => Ok(Some(Some(resolved))),
			Ok(None) => Ok(None),
			Err(Error::FutureVersion {
				..
			}) => Ok(None),
			Err(err) => Err(err),
		}
	}
}

impl<O: StoreObject + Value> ShardStore<O> for SignatureStore<O> {
	fn ordered_put(&self, mut value: O, stamp: VersionStamp, sender: NodeId) -> VersionStamp {
		// The incoming version field references the paired data object.
		let data_version = value.version();
		value.set_version(stamp.version);
		value.set_timestamp(stamp.timestamp_us);
		let key = value.key_ref().clone();
		let tail = self.log.latest_version().unwrap_or(Version::INVALID);

		match self.log.core().ordered_put(value, tail) {
			Ok(_) => {
				let (previous_signed_version, previous_signature) = self.chain_tail();
				self.log
					.commit_pending(stamp.version, stamp.timestamp_us, |delta| {
						Some(SignatureRecord {
							signature: self.signer.sign(delta, &previous_signature),
							previous_signed_version,
						})
					})
					.unwrap_or_else(|err| panic!("shard {} log append failed: {err}", self.shard));
				if data_version.is_valid() {
					self.record_mapping(data_version, stamp.version);
				}
				self.observe(sender, &key, false);
				stamp
			}
			Err(err) => {
				debug!(shard = %self.shard, key = %key, "ordered put rejected: {err}");
				self.log.discard_pending();
				VersionStamp::INVALID
			}
		}
	}

	fn ordered_remove(&self, key: O::Key, stamp: VersionStamp, sender: NodeId) -> VersionStamp {
		let mut tombstone = O::tombstone(key.clone());
		tombstone.set_version(stamp.version);
		tombstone.set_timestamp(stamp.timestamp_us);
		let tail = self.log.latest_version().unwrap_or(Version::INVALID);

		match self.log.core().ordered_remove(tombstone, tail) {
			Ok(_) => {
				let (previous_signed_version, previous_signature) = self.chain_tail();
				self.log
					.commit_pending(stamp.version, stamp.timestamp_us, |delta| {
						Some(SignatureRecord {
							signature: self.signer.sign(delta, &previous_signature),
							previous_signed_version,
						})
					})
					.unwrap_or_else(|err| panic!("shard {} log append failed: {err}", self.shard));
				self.observe(sender, &key, false);
				stamp
			}
			Err(err) => {
				debug!(shard = %self.shard, key = %key, "ordered remove rejected: {err}");
				self.log.discard_pending();
				VersionStamp::INVALID
			}
		}
	}

	fn ordered_get(&self, key: &O::Key) -> O {
		self.log
			.core()
			.ordered_get(key)
			.map(|stored| stored.as_ref().clone())
			.unwrap_or_else(O::invalid)
	}

	fn ordered_list_keys(&self, prefix: &str) -> Vec<O::Key> {
		self.log.core().live_keys(prefix)
	}

	fn ordered_get_size(&self, key: &O::Key) -> u64 {
		self.log.core().ordered_get_size(key)
	}

	fn trigger_put(&self, value: O, sender: NodeId) {
		let key = value.key_ref().clone();
		let value = Arc::new(value);
		self.observer.observe(self.shard, sender, &key, &value, true);
	}

	fn get(&self, key: &O::Key, version: Option<Version>, stable: bool, exact: bool) -> Result<O> {
		// Translate the caller's data version into this log's hash
		// version before resolving stability.
		let version = match version {
			None => None,
			Some(data_version) => match self.hash_version_for(data_version) {
				None if exact => {
					return Err(Error::NotFound(format!(
						"no hash recorded at data version {data_version}"
					)));
				}
				None => return Ok(O::invalid()),
				Some(hash_version) => Some(hash_version),
			},
		};
		match self.resolve(version, stable)? {
			None => Ok(O::invalid()),
			Some(None) => Ok(self
				.log
				.core()
				.lockless_get(key)
				.map(|stored| stored.as_ref().clone())
				.unwrap_or_else(O::invalid)),
			Some(Some(hash_version)) => {
				Ok(self.log.value_at(key, hash_version, exact)?.unwrap_or_else(O::invalid))
			}
		}
	}

	fn get_by_time(&self, key: &O::Key, ts_us: u64, stable: bool) -> Result<O> {
		match self.log.version_at_time(ts_us) {
			None => Ok(O::invalid()),
			Some(hash_version) => match self.resolve(Some(hash_version), stable)? {
				None => Ok(O::invalid()),
				Some(resolved) => Ok(self
					.log
					.value_at(key, resolved.unwrap_or(hash_version), false)?
					.unwrap_or_else(O::invalid)),
			},
		}
	}

	fn list_keys(&self, prefix: &str, version: Option<Version>, stable: bool) -> Result<Vec<O::Key>> {
		let version = match version {
			None => None,
			Some(data_version) => match self.hash_version_for(data_version) {
				None => return Ok(Vec::new()),
				Some(hash_version) => Some(hash_version),
			},
		};
		match self.resolve(version, stable)? {
			None => Ok(Vec::new()),
			Some(None) => Ok(self.log.core().live_keys(prefix)),
			Some(Some(hash_version)) => {
				Ok(self.log.get_snapshot(hash_version)?.list_keys(prefix, true))
			}
		}
	}

	fn list_keys_by_time(&self, prefix: &str, ts_us: u64, stable: bool) -> Result<Vec<O::Key>> {
		match self.log.version_at_time(ts_us) {
			None => Ok(Vec::new()),
			Some(hash_version) => match self.resolve(Some(hash_version), stable)? {
				None => Ok(Vec::new()),
				Some(resolved) => Ok(self
					.log
					.get_snapshot(resolved.unwrap_or(hash_version))?
					.list_keys(prefix, true)),
			},
		}
	}

	fn get_size(&self, key: &O::Key, version: Option<Version>, stable: bool, exact: bool) -> Result<u64> {
		Ok(self.get(key, version, stable, exact)?.bytes_size() as u64)
	}

	fn get_size_by_time(&self, key: &O::Key, ts_us: u64, stable: bool) -> Result<u64> {
		Ok(self.get_by_time(key, ts_us, stable)?.bytes_size() as u64)
	}

	fn latest_version(&self) -> Option<Version> {
		self.log.latest_version()
	}

	fn latest_persisted_version(&self) -> Option<Version> {
		self.log.latest_persisted_version()
	}

	fn advance_persistence_frontier(&self, version: Version, is_global: bool) {
		self.log.log().advance_persistence_frontier(version, is_global);
	}

	/// The signature chained at the hash version recorded for `key`.
	/// With a data version, an inexact match walks the log backward
	/// until it finds a delta for the key, O(log length) when the key
	/// is cold.
	fn get_signature(&self, key: &O::Key, version: Option<Version>) -> Result<(Vec<u8>, Version)> {
		let hash_version = match version {
			None => {
				let current = self
					.log
					.core()
					.lockless_get(key)
					.ok_or_else(|| Error::NotFound(format!("no hash stored for key {key}")))?;
				current.version()
			}
			Some(data_version) => self.hash_version_for(data_version).ok_or_else(|| {
				Error::NotFound(format!("no hash recorded at data version {data_version}"))
			})?,
		};

		if let Some(record) = self.log.signature(hash_version) {
			if let Some(value) = self.log.get_delta(hash_version, true)? {
				if value.key_ref() == key {
					return Ok((record.signature, record.previous_signed_version));
				}
			}
		}
		// The entry at the translated version belongs to another key;
		// scan backward for this key's most recent signed delta.
		self.log
			.get_delta_signature(hash_version, |value| value.key_ref() == key)
			.map(|(_, record)| (record.signature, record.previous_signed_version))
			.ok_or_else(|| Error::NotFound(format!("no signed delta for key {key}")))
	}

	fn get_signature_by_version(&self, version: Version) -> Result<(Vec<u8>, Version)> {
		self.log
			.signature(version)
			.map(|record| (record.signature, record.previous_signed_version))
			.ok_or_else(|| Error::NotFound(format!("no signature at version {version}")))
	}
}
