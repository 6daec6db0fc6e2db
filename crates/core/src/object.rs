// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hash;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::encoding;
use crate::Version;

/// The invalid u64 key sentinel.
const INVALID_U64_KEY: u64 = u64::MAX;

/// A shard key. Keys are either hierarchical '/'-separated strings or
/// opaque 64-bit integers.
pub trait ObjectKey:
	Clone + Ord + Hash + Debug + Display + Send + Sync + Serialize + DeserializeOwned + 'static
{
	/// The reserved invalid key sentinel for this key type.
	fn invalid() -> Self;

	fn is_valid(&self) -> bool;

	/// Everything up to and including the last separator, or the empty
	/// string for keys with no pathname. Prefix registrations and
	/// `list_keys` match against this.
	fn pathname(&self) -> &str;

	/// Stable routing hash used for key→shard and key→worker
	/// placement. Every replica must compute the same value for the
	/// same key, so this is pinned to xxh3 and is part of the UDL
	/// contract.
	fn route_hash(&self) -> u64;
}

impl ObjectKey for String {
	fn invalid() -> Self {
		String::new()
	}

	fn is_valid(&self) -> bool {
		!self.is_empty()
	}

	fn pathname(&self) -> &str {
		match self.rfind('/') {
			Some(at) => &self[..=at],
			None => "",
		}
	}

	fn route_hash(&self) -> u64 {
		xxh3_64(self.as_bytes())
	}
}

impl ObjectKey for u64 {
	fn invalid() -> Self {
		INVALID_U64_KEY
	}

	fn is_valid(&self) -> bool {
		*self != INVALID_U64_KEY
	}

	fn pathname(&self) -> &str {
		""
	}

	fn route_hash(&self) -> u64 {
		xxh3_64(&self.to_le_bytes())
	}
}

/// An owned binary payload. An empty blob is the null body used to
/// represent tombstones.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl Blob {
	pub fn new(bytes: Vec<u8>) -> Self {
		Blob(bytes)
	}

	pub fn empty() -> Self {
		Blob(Vec::new())
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl Deref for Blob {
	type Target = [u8];

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl From<Vec<u8>> for Blob {
	fn from(bytes: Vec<u8>) -> Self {
		Blob(bytes)
	}
}

impl From<&[u8]> for Blob {
	fn from(bytes: &[u8]) -> Self {
		Blob(bytes.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(s: &str) -> Self {
		Blob(s.as_bytes().to_vec())
	}
}

impl Debug for Blob {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "[size:{}, data:", self.len())?;
		for byte in self.0.iter().take(8) {
			write!(f, " {:02x}", byte)?;
		}
		if self.len() > 8 {
			write!(f, "...")?;
		}
		write!(f, "]")
	}
}

/// The capability surface every stored value type provides.
///
/// The optional capabilities of the data model (keeping versions and
/// timestamps, carrying previous versions, verifying a proposed previous
/// version, custom admission, message ids) are defaulted methods here:
/// a value type opts in by overriding them, and the defaults make the
/// capability a no-op for types that do not care.
pub trait StoreObject:
	Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
	type Key: ObjectKey;

	/// The reserved invalid object returned where a sentinel is needed.
	fn invalid() -> Self;

	/// The tombstone written by an ordered remove of `key`.
	fn tombstone(key: Self::Key) -> Self;

	fn key_ref(&self) -> &Self::Key;

	/// A null object has a valid key but no payload; it is the
	/// tombstone form.
	fn is_null(&self) -> bool;

	/// A valid object has a valid key.
	fn is_valid(&self) -> bool;

	/// Fills `self` from `other`, reusing existing allocations where
	/// possible so a pre-allocated thread-local can be refilled.
	fn copy_from(&mut self, other: &Self) {
		self.clone_from(other);
	}

	fn version(&self) -> Version;

	fn set_version(&mut self, _version: Version) {}

	fn timestamp_us(&self) -> u64 {
		0
	}

	fn set_timestamp(&mut self, _timestamp_us: u64) {}

	/// `(previous_version, previous_version_by_key)` carried by the
	/// object.
	fn previous_versions(&self) -> (Version, Version) {
		(Version::INVALID, Version::INVALID)
	}

	fn set_previous_versions(&mut self, _prev: Version, _prev_by_key: Version) {}

	/// Validates a proposed `(log tail, previous version by key)` pair
	/// on ordered put, before the object's own previous-version fields
	/// are overwritten with the actual values. The default accepts
	/// everything.
	fn verify_previous_version(&self, _log_tail: Version, _prev_by_key: Version) -> bool {
		true
	}

	/// Custom admission check against the current shard state. `get`
	/// looks up the current object stored under a key.
	fn validate(&self, _get: &dyn Fn(&Self::Key) -> Option<Self>) -> bool {
		true
	}

	/// Opaque id threaded through for external correlation.
	fn message_id(&self) -> Option<u64> {
		None
	}

	/// Size in bytes of the serialized object.
	fn bytes_size(&self) -> usize
	where
		Self: encoding::Value,
	{
		self.encoded_size()
	}
}

/// The standard versioned key/value object.
///
/// Field order is the serialized delta layout: version counters first,
/// then the optional message id, then key and payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Object<K> {
	pub version: Version,
	pub timestamp_us: u64,
	pub previous_version: Version,
	pub previous_version_by_key: Version,
	pub message_id: Option<u64>,
	pub key: K,
	pub blob: Blob,
}

impl<K: ObjectKey> Object<K> {
	pub fn new(key: K, blob: impl Into<Blob>) -> Self {
		Self {
			version: Version::INVALID,
			timestamp_us: 0,
			previous_version: Version::INVALID,
			previous_version_by_key: Version::INVALID,
			message_id: None,
			key,
			blob: blob.into(),
		}
	}

	/// The tombstone for `key`: a null-bodied object.
	pub fn null(key: K) -> Self {
		Self::new(key, Blob::empty())
	}
}

impl<K: ObjectKey> encoding::Value for Object<K> {}

impl<K: ObjectKey> StoreObject for Object<K> {
	type Key = K;

	fn invalid() -> Self {
		Self::new(K::invalid(), Blob::empty())
	}

	fn tombstone(key: K) -> Self {
		Self::null(key)
	}

	fn key_ref(&self) -> &K {
		&self.key
	}

	fn is_null(&self) -> bool {
		self.blob.is_empty()
	}

	fn is_valid(&self) -> bool {
		self.key.is_valid()
	}

	fn version(&self) -> Version {
		self.version
	}

	fn set_version(&mut self, version: Version) {
		self.version = version;
	}

	fn timestamp_us(&self) -> u64 {
		self.timestamp_us
	}

	fn set_timestamp(&mut self, timestamp_us: u64) {
		self.timestamp_us = timestamp_us;
	}

	fn previous_versions(&self) -> (Version, Version) {
		(self.previous_version, self.previous_version_by_key)
	}

	fn set_previous_versions(&mut self, prev: Version, prev_by_key: Version) {
		self.previous_version = prev;
		self.previous_version_by_key = prev_by_key;
	}

	fn verify_previous_version(&self, log_tail: Version, prev_by_key: Version) -> bool {
		// A client that read at version X sets previous_version = X;
		// the write is admitted only if no later update slipped in.
		// Unset fields opt out of the check, and an invalid actual
		// (genesis) admits any claim.
		(!self.previous_version.is_valid()
			|| !log_tail.is_valid()
			|| self.previous_version >= log_tail)
			&& (!self.previous_version_by_key.is_valid()
				|| !prev_by_key.is_valid()
				|| self.previous_version_by_key >= prev_by_key)
	}

	fn message_id(&self) -> Option<u64> {
		self.message_id
	}
}
