// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! The stores are generic over the key type; these tests pin the
//! u64-keyed behavior, chiefly that integer keys have no pathname and
//! therefore never participate in prefix matching.

use std::sync::Arc;

use weir_core::{Blob, Object, ObjectKey, ShardRef, StoreObject, SubgroupId, Version, VersionStamp};
use weir_store::{MemoryLog, NoopObserver, PersistentStore, ShardStore, VolatileStore};

fn shard() -> ShardRef {
	ShardRef::new(SubgroupId::new(4, 0), 0)
}

fn stamp(version: u64) -> VersionStamp {
	VersionStamp::new(Version(version), 4_000_000 + version * 1_000)
}

#[test]
fn test_u64_persistent_roundtrip() {
	let store: PersistentStore<Object<u64>> =
		PersistentStore::new(shard(), Box::new(MemoryLog::new()), Arc::new(NoopObserver));

	let first = store.ordered_put(Object::new(17, "v1"), stamp(0), 1);
	assert!(first.is_valid());
	store.ordered_put(Object::new(17, "v2"), stamp(1), 1);

	assert_eq!(store.get(&17, None, false, false).unwrap().blob, Blob::from("v2"));
	assert_eq!(
		store.get(&17, Some(first.version), false, true).unwrap().blob,
		Blob::from("v1")
	);
	assert!(!StoreObject::is_valid(&store.get(&99, None, false, false).unwrap()));
}

#[test]
fn test_u64_keys_never_prefix_match() {
	let store: VolatileStore<Object<u64>> = VolatileStore::new(shard(), Arc::new(NoopObserver));
	store.ordered_put(Object::new(1, "a"), stamp(0), 1);
	store.ordered_put(Object::new(2, "b"), stamp(1), 1);

	// Integer keys have the empty pathname: only the empty prefix
	// lists them.
	let mut keys = store.list_keys("", None, false).unwrap();
	keys.sort();
	assert_eq!(keys, vec![1, 2]);
	assert!(store.list_keys("/", None, false).unwrap().is_empty());
}

#[test]
fn test_u64_invalid_key_sentinel() {
	assert!(!u64::invalid().is_valid());
	let invalid = Object::<u64>::invalid();
	assert!(!StoreObject::is_valid(&invalid));
	assert!(invalid.is_null());
}

#[test]
fn test_u64_remove_keeps_tombstone() {
	let store: PersistentStore<Object<u64>> =
		PersistentStore::new(shard(), Box::new(MemoryLog::new()), Arc::new(NoopObserver));

	store.ordered_put(Object::new(7, "payload"), stamp(0), 1);
	let removed = store.ordered_remove(7, stamp(1), 1);
	assert!(removed.is_valid());
	assert!(store.get(&7, None, false, false).unwrap().is_null());

	let rejected = store.ordered_remove(7, stamp(2), 1);
	assert!(!rejected.is_valid());
}
