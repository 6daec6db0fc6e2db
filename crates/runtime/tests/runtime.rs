// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;

use weir_core::{
	Blob, Object, ObjectPoolMetadata, ServiceConfig, ShardLayout, ShardingPolicy, StoreObject,
	SubgroupId, SubgroupKind, SubgroupLayout, SubgroupTypeLayout,
};
use weir_runtime::{LocalRuntime, RuntimeOptions};
use weir_store::{CriticalDataPathObserver, NoopObserver, ShardStore};

fn test_config() -> ServiceConfig {
	let shard = |replicas: Vec<u32>| ShardLayout {
		replicas,
	};
	ServiceConfig {
		layout: vec![
			SubgroupTypeLayout {
				kind: SubgroupKind::Metadata,
				subgroups: vec![SubgroupLayout {
					shards: vec![shard(vec![0])],
				}],
			},
			SubgroupTypeLayout {
				kind: SubgroupKind::Persistent,
				subgroups: vec![SubgroupLayout {
					shards: vec![shard(vec![0, 1, 2]), shard(vec![0, 1])],
				}],
			},
			SubgroupTypeLayout {
				kind: SubgroupKind::Volatile,
				subgroups: vec![SubgroupLayout {
					shards: vec![shard(vec![0])],
				}],
			},
		],
		..ServiceConfig::default()
	}
}

fn noop_observers(
	_kind: SubgroupKind,
	_shard: weir_core::ShardRef,
	_member: weir_core::NodeId,
) -> Arc<dyn CriticalDataPathObserver<Object<String>>> {
	Arc::new(NoopObserver)
}

fn build_runtime() -> LocalRuntime {
	LocalRuntime::build(&test_config(), &noop_observers, RuntimeOptions::default()).unwrap()
}

#[test]
fn test_versions_and_timestamps_increase_in_delivery_order() {
	let runtime = build_runtime();
	let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();

	let mut last: Option<weir_core::VersionStamp> = None;
	for round in 0..100 {
		let object = Object::new(format!("/pool/a/k{}", round % 7), "payload");
		let stamp = shard.put(object, 9).unwrap();
		assert!(stamp.is_valid());
		if let Some(previous) = last {
			assert!(stamp.version > previous.version);
			assert!(stamp.timestamp_us >= previous.timestamp_us);
		}
		last = Some(stamp);
	}
}

#[test]
fn test_multi_get_observes_prior_puts() {
	let runtime = build_runtime();
	let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();

	for round in 0..50 {
		let key = "/pool/a/x".to_string();
		shard.put(Object::new(key.clone(), format!("v{round}").as_str()), 9).unwrap();
		let read = shard.multi_get(key).unwrap();
		assert_eq!(read.blob, Blob::from(format!("v{round}").as_str()));
	}
}

#[test]
fn test_all_replicas_apply_the_same_state() {
	let runtime = build_runtime();
	let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();
	let key = "/pool/a/x".to_string();

	let stamp = shard.put(Object::new(key.clone(), "replicated"), 9).unwrap();

	for member in shard.members().to_vec() {
		let store = shard.store_on(member).unwrap();
		let read = store.get(&key, None, false, false).unwrap();
		assert_eq!(read.blob, Blob::from("replicated"));
		assert_eq!(read.version, stamp.version);
	}
}

#[test]
fn test_stable_read_after_commit() {
	let runtime = build_runtime();
	let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();
	let key = "/pool/a/x".to_string();

	let stamp = shard.put(Object::new(key.clone(), "durable"), 9).unwrap();

	// The delivery thread advances the global frontier before
	// replying, so a stable read at the returned version succeeds
	// without waiting.
	let store = shard.store_on(shard.members()[0]).unwrap();
	let read = store.get(&key, Some(stamp.version), true, true).unwrap();
	assert_eq!(read.blob, Blob::from("durable"));
}

#[test]
fn test_rejected_put_returns_invalid_stamp() {
	let runtime = build_runtime();
	let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();
	let key = "/pool/a/x".to_string();

	shard.put(Object::new(key.clone(), "v1"), 9).unwrap();
	shard.put(Object::new(key.clone(), "v2"), 9).unwrap();

	let mut stale = Object::new(key.clone(), "stale");
	stale.previous_version_by_key = weir_core::Version(0);
	let stamp = shard.put(stale, 9).unwrap();
	assert!(!stamp.is_valid());

	// The rejection consumed a version but did not corrupt the shard.
	let read = shard.multi_get(key).unwrap();
	assert_eq!(read.blob, Blob::from("v2"));
}

#[test]
fn test_remove_round_trip() {
	let runtime = build_runtime();
	let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();
	let key = "/pool/a/x".to_string();

	shard.put(Object::new(key.clone(), "here"), 9).unwrap();
	let removed = shard.remove(key.clone(), 9).unwrap();
	assert!(removed.is_valid());
	assert!(shard.multi_get(key.clone()).unwrap().is_null());

	let rejected = shard.remove(key, 9).unwrap();
	assert!(!rejected.is_valid());
}

#[test]
fn test_persistence_actions_fire_after_commit() {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::{Duration, Instant};

	let runtime = build_runtime();
	let subgroup = SubgroupId::new(1, 0);
	let fired = Arc::new(AtomicUsize::new(0));

	let counter = Arc::clone(&fired);
	runtime.persistence().register_persistence_action(
		weir_core::ShardRef::new(subgroup, 0),
		weir_core::Version(0),
		true,
		move || {
			counter.fetch_add(1, Ordering::SeqCst);
		},
	);

	let shard = runtime.data_shard(subgroup, 0).unwrap();
	shard.put(Object::new("/pool/a/x".to_string(), "payload"), 9).unwrap();

	let deadline = Instant::now() + Duration::from_secs(2);
	while fired.load(Ordering::SeqCst) == 0 {
		assert!(Instant::now() < deadline, "persistence action never fired");
		std::thread::yield_now();
	}
}

#[test]
fn test_metadata_shard_stores_pool_records() {
	let runtime = build_runtime();
	let shard = runtime.metadata_shard(0).unwrap();

	let record = ObjectPoolMetadata::new("/pool/a", 1, 0, ShardingPolicy::Hash);
	let stamp = shard.put(record, 7).unwrap();
	assert!(stamp.is_valid());

	let found = shard.multi_get("/pool/a".to_string()).unwrap();
	assert_eq!(found.subgroup_type_index, 1);
	assert_eq!(found.version, stamp.version);
}

#[test]
fn test_membership_and_routing_errors() {
	let runtime = build_runtime();

	assert_eq!(runtime.shard_members(SubgroupId::new(1, 0), 0).unwrap(), vec![0, 1, 2]);
	assert_eq!(runtime.kind_of(2).unwrap(), SubgroupKind::Volatile);
	assert!(runtime.kind_of(9).is_err());
	assert!(runtime.data_shard(SubgroupId::new(1, 0), 5).is_err());
	assert!(runtime.data_shard(SubgroupId::new(1, 3), 0).is_err());

	let shard = runtime.data_shard(SubgroupId::new(1, 0), 1).unwrap();
	assert!(shard.store_on(2).is_err());
}

#[test]
fn test_file_backed_runtime_recovers() {
	let dir = weir_testing::tempdir();
	let options = || RuntimeOptions {
		storage_dir: Some(dir.path().to_path_buf()),
		signer_seed: None,
	};

	let stamp = {
		let runtime =
			LocalRuntime::build(&test_config(), &noop_observers, options()).unwrap();
		let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();
		shard.put(Object::new("/pool/a/x".to_string(), "persisted"), 9).unwrap()
	};

	let runtime = LocalRuntime::build(&test_config(), &noop_observers, options()).unwrap();
	let shard = runtime.data_shard(SubgroupId::new(1, 0), 0).unwrap();
	let read = shard.multi_get("/pool/a/x".to_string()).unwrap();
	assert_eq!(read.blob, Blob::from("persisted"));
	assert_eq!(read.version, stamp.version);
}
