// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use tracing::trace;

use weir_core::encoding::Value;
use weir_core::{Error, ObjectKey, Result, StoreObject, Version};

/// A single shard's mutable key/value state plus the pending-delta
/// buffer the log adapter serializes from.
///
/// Mutations are only ever issued by the shard's ordered-delivery
/// thread; readers may be any thread. The map is an epoch-reclaimed
/// skip list, so a concurrent reader either sees the previous value of
/// a key or the new one, never a torn mix, since the entry's `Arc` is
/// swapped whole.
///
/// Tombstones are stored as null-bodied objects and are never erased,
/// keeping version history and `previous_version_by_key` defined across
/// deletions.
pub struct DeltaStoreCore<O: StoreObject> {
	kv_map: SkipMap<O::Key, Arc<O>>,
	/// Pending serialized mutation, filled by `ordered_put` /
	/// `ordered_remove` and taken by the log adapter. Empty between
	/// ordered operations.
	delta: Mutex<Vec<u8>>,
	encode_deltas: bool,
}

impl<O: StoreObject + Value> DeltaStoreCore<O> {
	/// A core that encodes every accepted mutation into the pending
	/// delta buffer, for variants backed by a log.
	pub fn new() -> Self {
		Self {
			kv_map: SkipMap::new(),
			delta: Mutex::new(Vec::new()),
			encode_deltas: true,
		}
	}

	/// A core for the volatile variant: mutations are applied to the
	/// map but no delta is produced.
	pub fn without_delta() -> Self {
		Self {
			kv_map: SkipMap::new(),
			delta: Mutex::new(Vec::new()),
			encode_deltas: false,
		}
	}

	/// Applies an ordered put.
	///
	/// Admission order: the value's validator runs against the current
	/// map, then its previous-version check runs against
	/// `(current_log_tail, previous version of this key)`, then the
	/// actual previous versions are recorded on the value, the delta is
	/// encoded, and the map is updated.
	///
	/// Returns the previous version of this key, or
	/// [`Version::INVALID`] for the genesis mutation.
	pub fn ordered_put(&self, mut value: O, current_log_tail: Version) -> Result<Version> {
		if !value.validate(&|key| self.kv_map.get(key).map(|entry| entry.value().as_ref().clone())) {
			return Err(Error::InvalidValue(format!(
				"validation failed with value of key {}",
				value.key_ref()
			)));
		}

		let previous_version_by_key = self
			.kv_map
			.get(value.key_ref())
			.map(|entry| entry.value().version())
			.unwrap_or(Version::INVALID);

		// The verify must see the value's own claim before it is
		// overwritten with the actual previous versions.
		if !value.verify_previous_version(current_log_tail, previous_version_by_key) {
			return Err(Error::InvalidVersion {
				log_tail: current_log_tail,
				prev_by_key: previous_version_by_key,
			});
		}
		value.set_previous_versions(current_log_tail, previous_version_by_key);

		if self.encode_deltas {
			let mut delta = self.delta.lock();
			debug_assert!(delta.is_empty(), "pending delta not consumed");
			value.encode_into(&mut *delta)?;
		}
		self.apply_ordered_put(value);
		Ok(previous_version_by_key)
	}

	/// Applies an ordered remove. The value must be a null-bodied
	/// tombstone; removing an absent or already-tombstoned key is an
	/// invalid-value error.
	pub fn ordered_remove(&self, mut tombstone: O, current_log_tail: Version) -> Result<Version> {
		debug_assert!(tombstone.is_null());
		let key = tombstone.key_ref().clone();
		let current = match self.kv_map.get(&key) {
			None => {
				return Err(Error::InvalidValue(format!("cannot find key {key}")));
			}
			Some(entry) => entry.value().clone(),
		};
		if current.is_null() {
			return Err(Error::InvalidValue(format!("key {key} has been removed already")));
		}

		let previous_version_by_key = current.version();
		tombstone.set_previous_versions(current_log_tail, previous_version_by_key);

		if self.encode_deltas {
			let mut delta = self.delta.lock();
			debug_assert!(delta.is_empty(), "pending delta not consumed");
			tombstone.encode_into(&mut *delta)?;
		}
		self.apply_ordered_put(tombstone);
		Ok(previous_version_by_key)
	}

	/// Replaces the key's entry with the fully-stamped value. Also the
	/// replay entry point when reconstructing state from deltas.
	pub fn apply_ordered_put(&self, value: O) {
		trace!(key = %value.key_ref(), version = %value.version(), "apply ordered put");
		self.kv_map.insert(value.key_ref().clone(), Arc::new(value));
	}

	/// Decodes a serialized delta and applies it.
	pub fn apply_delta(&self, delta: &[u8]) -> Result<()> {
		self.apply_ordered_put(O::decode(delta)?);
		Ok(())
	}

	/// The current value under `key`, tombstones included.
	pub fn ordered_get(&self, key: &O::Key) -> Option<Arc<O>> {
		self.kv_map.get(key).map(|entry| entry.value().clone())
	}

	/// Identical to [`Self::ordered_get`] but named for its callers:
	/// safe from any thread concurrent with the ordered writer.
	pub fn lockless_get(&self, key: &O::Key) -> Option<Arc<O>> {
		self.ordered_get(key)
	}

	/// Keys whose pathname starts with `prefix`, tombstones included.
	pub fn ordered_list_keys(&self, prefix: &str) -> Vec<O::Key> {
		self.collect_keys(prefix, false)
	}

	/// See [`Self::ordered_list_keys`]; safe from any thread.
	pub fn lockless_list_keys(&self, prefix: &str) -> Vec<O::Key> {
		self.collect_keys(prefix, false)
	}

	/// Keys whose pathname starts with `prefix`, skipping entries whose
	/// latest mutation is a tombstone.
	pub fn live_keys(&self, prefix: &str) -> Vec<O::Key> {
		self.collect_keys(prefix, true)
	}

	fn collect_keys(&self, prefix: &str, skip_tombstones: bool) -> Vec<O::Key> {
		self.kv_map
			.iter()
			.filter(|entry| entry.key().pathname().starts_with(prefix))
			.filter(|entry| !skip_tombstones || !entry.value().is_null())
			.map(|entry| entry.key().clone())
			.collect()
	}

	/// Serialized size in bytes of the value under `key`, or 0 when
	/// absent.
	pub fn ordered_get_size(&self, key: &O::Key) -> u64 {
		self.kv_map.get(key).map(|entry| entry.value().encoded_size() as u64).unwrap_or(0)
	}

	/// See [`Self::ordered_get_size`]; safe from any thread.
	pub fn lockless_get_size(&self, key: &O::Key) -> u64 {
		self.ordered_get_size(key)
	}

	/// Takes the pending delta, leaving the buffer empty for the next
	/// ordered operation.
	pub fn take_delta(&self) -> Vec<u8> {
		std::mem::take(&mut *self.delta.lock())
	}

	pub fn has_pending_delta(&self) -> bool {
		!self.delta.lock().is_empty()
	}

	pub fn len(&self) -> usize {
		self.kv_map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.kv_map.is_empty()
	}
}

impl<O: StoreObject + Value> Default for DeltaStoreCore<O> {
	fn default() -> Self {
		Self::new()
	}
}
