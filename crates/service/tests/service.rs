// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use weir_core::{
	Blob, Error, Object, ServiceConfig, ShardLayout, ShardingPolicy, StoreObject, SubgroupKind,
	SubgroupLayout, SubgroupTypeLayout,
};
use weir_flow::{DataFlowGraph, UserDefinedLogic};
use weir_runtime::RuntimeOptions;
use weir_service::{Notification, ServiceHost, ShardMemberSelectionPolicy};

const UPPERCASE_UDL: &str = "4e4ecc86-9b3c-11eb-b70c-0242ac110002";
const COUNTING_UDL: &str = "4f0373a2-9b3c-11eb-a651-0242ac110002";

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
					shards: vec![shard(vec![0, 1]), shard(vec![0, 1])],
				}],
			},
			SubgroupTypeLayout {
				kind: SubgroupKind::Trigger,
				subgroups: vec![SubgroupLayout {
					shards: vec![shard(vec![0])],
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

/// Uppercases the payload and forwards it to every declared output.
struct UppercaseUdl {
	client: Arc<weir_service::ServiceClient>,
}

impl UserDefinedLogic for UppercaseUdl {
	fn handle(&self, invocation: weir_flow::UdlInvocation<'_>) {
		let suffix = &invocation.key[invocation.prefix_length..];
		let upper = String::from_utf8_lossy(&invocation.value.blob).to_uppercase();
		for (output, kind) in invocation.outputs.iter() {
			let object = Object::new(format!("{output}{suffix}"), upper.as_str());
			let result = match kind {
				weir_flow::DestinationKind::Put => self.client.put(object).map(|_| ()),
				weir_flow::DestinationKind::TriggerPut => self.client.trigger_put(object),
			};
			result.expect("derived emission failed");
		}
	}
}

struct CountingUdl {
	invocations: Arc<AtomicUsize>,
}

impl UserDefinedLogic for CountingUdl {
	fn handle(&self, _invocation: weir_flow::UdlInvocation<'_>) {
		self.invocations.fetch_add(1, Ordering::SeqCst);
	}
}

fn build_host(dfgs_json: &str, invocations: Arc<AtomicUsize>) -> ServiceHost {
	let dfgs = if dfgs_json.is_empty() {
		Vec::new()
	} else {
		DataFlowGraph::parse_all(dfgs_json).unwrap()
	};
	ServiceHost::build(test_config(), dfgs, RuntimeOptions::default(), |client, udls| {
		let emit_client = Arc::clone(client);
		udls.register(UPPERCASE_UDL, move |_config| {
			Arc::new(UppercaseUdl {
				client: Arc::clone(&emit_client),
			}) as Arc<dyn UserDefinedLogic>
		});
		udls.register(COUNTING_UDL, move |_config| {
			Arc::new(CountingUdl {
				invocations: Arc::clone(&invocations),
			}) as Arc<dyn UserDefinedLogic>
		});
		Ok(())
	})
	.unwrap()
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) {
	let until = Instant::now() + deadline;
	while !check() {
		if Instant::now() > until {
			panic!("condition not reached in {deadline:?}");
		}
		std::thread::sleep(Duration::from_millis(5));
	}
}

#[test]
fn test_create_pool_put_and_get() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();

	let created = client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();
	assert!(created.is_valid());

	let stamp = client.put(Object::new("/pool/a/x".to_string(), "hello")).unwrap();
	assert!(stamp.is_valid());

	let read = client.get("/pool/a/x", None, false, false).unwrap();
	assert_eq!(read.blob, Blob::from("hello"));
	assert_eq!(read.version, stamp.version);
}

#[test]
fn test_versioned_get_serves_old_value() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();

	let v1 = client.put(Object::new("/pool/a/x".to_string(), "v1")).unwrap();
	client.put(Object::new("/pool/a/x".to_string(), "v2")).unwrap();

	let old = client.get("/pool/a/x", Some(v1.version), false, true).unwrap();
	assert_eq!(old.blob, Blob::from("v1"));
}

#[test]
fn test_remove_tombstones_key() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();

	client.put(Object::new("/pool/a/x".to_string(), "data")).unwrap();
	client.put(Object::new("/pool/a/keep".to_string(), "data")).unwrap();
	client.remove("/pool/a/x").unwrap();

	let read = client.get("/pool/a/x", None, false, false).unwrap();
	assert!(read.is_null());

	let keys = client.multi_list_keys("/pool/a/").unwrap();
	assert_eq!(keys, vec!["/pool/a/keep".to_string()]);

	// The point-to-point listing agrees once the writes delivered.
	let unordered = client.list_keys("/pool/a/", None, false).unwrap();
	assert_eq!(unordered, keys);

	// Removing again is an invalid-value error.
	let err = client.remove("/pool/a/x").unwrap_err();
	assert!(matches!(err, Error::InvalidValue(_)));
}

#[test]
fn test_dfg_uppercase_pipeline() {
	let dfgs = format!(
		r#"[{{
			"id": "26639e22-9b3c-11eb-a237-0242ac110002",
			"desc": "uppercase pipeline",
			"graph": [{{
				"pathname": "/pool/a/",
				"user_defined_logic_list": ["{UPPERCASE_UDL}"],
				"user_defined_logic_stateful_list": ["stateful"],
				"user_defined_logic_hook_list": ["ordered"],
				"shard_dispatcher_list": ["one"],
				"user_defined_logic_config_list": [{{}}],
				"destinations": [{{"/pool/b/": "put"}}]
			}}]
		}}]"#
	);
	let host = build_host(&dfgs, Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();
	client.create_object_pool("/pool/b", 1, 0, ShardingPolicy::Hash).unwrap();

	client.put(Object::new("/pool/a/x".to_string(), "hi")).unwrap();

	wait_until(Duration::from_secs(5), || {
		client
			.multi_get("/pool/b/x")
			.map(|derived| StoreObject::is_valid(&derived) && derived.blob == Blob::from("HI"))
			.unwrap_or(false)
	});
}

#[test]
fn test_stateful_one_dispatch_fires_exactly_once_per_put() {
	let invocations = Arc::new(AtomicUsize::new(0));
	let dfgs = format!(
		r#"[{{
			"id": "11111111-9b3c-11eb-a237-0242ac110002",
			"graph": [{{
				"pathname": "/pool/a/",
				"user_defined_logic_list": ["{COUNTING_UDL}"],
				"user_defined_logic_stateful_list": ["stateful"],
				"user_defined_logic_hook_list": ["ordered"],
				"shard_dispatcher_list": ["one"]
			}}]
		}}]"#
	);
	let host = build_host(&dfgs, Arc::clone(&invocations));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();

	for round in 0..20 {
		client.put(Object::new(format!("/pool/a/k{round}"), "payload")).unwrap();
	}
	wait_until(Duration::from_secs(5), || invocations.load(Ordering::SeqCst) == 20);
	// ONE dispatch: exactly one invocation per delivery, even with two
	// replicas per shard.
	std::thread::sleep(Duration::from_millis(100));
	assert_eq!(invocations.load(Ordering::SeqCst), 20);
}

#[test]
fn test_all_dispatch_fires_on_every_replica() {
	let invocations = Arc::new(AtomicUsize::new(0));
	let dfgs = format!(
		r#"[{{
			"id": "22222222-9b3c-11eb-a237-0242ac110002",
			"graph": [{{
				"pathname": "/pool/a/",
				"user_defined_logic_list": ["{COUNTING_UDL}"],
				"user_defined_logic_stateful_list": ["stateless"],
				"user_defined_logic_hook_list": ["ordered"],
				"shard_dispatcher_list": ["all"]
			}}]
		}}]"#
	);
	let host = build_host(&dfgs, Arc::clone(&invocations));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();

	for round in 0..10 {
		client.put(Object::new(format!("/pool/a/k{round}"), "payload")).unwrap();
	}
	// Two replicas per shard: every delivery fires on both.
	wait_until(Duration::from_secs(5), || invocations.load(Ordering::SeqCst) == 20);
}

#[test]
fn test_trigger_put_invokes_udl_without_storing() {
	let invocations = Arc::new(AtomicUsize::new(0));
	let dfgs = format!(
		r#"[{{
			"id": "33333333-9b3c-11eb-a237-0242ac110002",
			"graph": [{{
				"pathname": "/pool/t/",
				"user_defined_logic_list": ["{COUNTING_UDL}"],
				"user_defined_logic_hook_list": ["trigger"]
			}}]
		}}]"#
	);
	let host = build_host(&dfgs, Arc::clone(&invocations));
	let client = host.client();
	client.create_object_pool("/pool/t", 2, 0, ShardingPolicy::Hash).unwrap();

	client.trigger_put(Object::new("/pool/t/x".to_string(), "ephemeral")).unwrap();
	wait_until(Duration::from_secs(5), || invocations.load(Ordering::SeqCst) == 1);

	// The trigger store kept nothing.
	let read = client.get("/pool/t/x", None, false, false).unwrap();
	assert!(!StoreObject::is_valid(&read));

	// An ordered put on the trigger pool is rejected.
	assert!(client.put(Object::new("/pool/t/x".to_string(), "data")).is_err());
}

#[test]
fn test_stable_reads_through_the_client() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();

	let stamp = client.put(Object::new("/pool/a/x".to_string(), "durable")).unwrap();

	// The local runtime advances the global frontier before the put
	// returns, so both forms of stable read serve immediately.
	let current = client.get("/pool/a/x", None, true, false).unwrap();
	assert_eq!(current.blob, Blob::from("durable"));
	let versioned = client.get("/pool/a/x", Some(stamp.version), true, true).unwrap();
	assert_eq!(versioned.blob, Blob::from("durable"));

	// A version nobody delivered yet reads as invalid.
	let future = client
		.get("/pool/a/x", Some(weir_core::Version(stamp.version.0 + 50)), true, false)
		.unwrap();
	assert!(!StoreObject::is_valid(&future));

	// Sizes follow the same paths.
	assert!(client.get_size("/pool/a/x", None, false, false).unwrap() > 0);
	assert_eq!(client.multi_get_size("/pool/a/x").unwrap(), client.get_size("/pool/a/x", None, false, false).unwrap());
}

#[test]
fn test_temporal_reads() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();
	let clock = Arc::clone(client.runtime().clock());

	let t0 = clock.now_us();
	client.put(Object::new("/pool/a/x".to_string(), "v1")).unwrap();
	let t1 = clock.now_us();
	client.put(Object::new("/pool/a/x".to_string(), "v2")).unwrap();

	let before = client.get_by_time("/pool/a/x", t0, true).unwrap();
	assert!(!StoreObject::is_valid(&before));

	let middle = client.get_by_time("/pool/a/x", t1, true).unwrap();
	assert_eq!(middle.blob, Blob::from("v1"));
}

#[test]
fn test_pool_lifecycle() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();

	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();
	assert!(client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).is_err());

	let found = client.find_object_pool("/pool/a").unwrap();
	assert_eq!(found.subgroup_type_index, 1);
	assert!(!found.deleted);

	client.put(Object::new("/pool/a/x".to_string(), "data")).unwrap();
	client.remove_object_pool("/pool/a").unwrap();

	// The tombstoned record is retained, but keys no longer resolve.
	let found = client.find_object_pool("/pool/a").unwrap();
	assert!(found.deleted);
	assert!(client.put(Object::new("/pool/a/y".to_string(), "data")).is_err());
	assert_eq!(client.list_object_pools().unwrap(), vec!["/pool/a".to_string()]);

	// A tombstoned pathname can be reused.
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();
	client.put(Object::new("/pool/a/y".to_string(), "data")).unwrap();
}

#[test]
fn test_pool_misconfiguration_errors() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();

	assert!(client.create_object_pool("relative", 1, 0, ShardingPolicy::Hash).is_err());
	assert!(client.create_object_pool("/trailing/", 1, 0, ShardingPolicy::Hash).is_err());
	assert!(client.create_object_pool("/pool/meta", 0, 0, ShardingPolicy::Hash).is_err());
	assert!(client.create_object_pool("/pool/a", 9, 0, ShardingPolicy::Hash).is_err());
	assert!(client.create_object_pool("/pool/a", 1, 7, ShardingPolicy::Hash).is_err());

	// RANGE parses but cannot resolve keys without a range table.
	client.create_object_pool("/pool/r", 1, 0, ShardingPolicy::Range).unwrap();
	let err = client.put(Object::new("/pool/r/x".to_string(), "data")).unwrap_err();
	assert!(matches!(err, Error::Policy(_)));
}

#[test]
fn test_unpooled_key_is_not_found() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();

	let err = client.put(Object::new("/nowhere/x".to_string(), "data")).unwrap_err();
	assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_member_selection_policies() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();
	client.put(Object::new("/pool/a/x".to_string(), "data")).unwrap();

	let subgroup = weir_core::SubgroupId::new(1, 0);
	for policy in [
		ShardMemberSelectionPolicy::FirstMember,
		ShardMemberSelectionPolicy::LastMember,
		ShardMemberSelectionPolicy::Random,
		ShardMemberSelectionPolicy::FixedRandom,
		ShardMemberSelectionPolicy::RoundRobin,
		ShardMemberSelectionPolicy::KeyHashing,
		ShardMemberSelectionPolicy::UserSpecified(1),
	] {
		for shard_index in 0..2 {
			client.set_member_selection_policy(subgroup, shard_index, policy);
			assert_eq!(
				client.get_member_selection_policy(subgroup, shard_index),
				policy
			);
		}
		// Every policy reaches a replica that serves the key.
		let read = client.get("/pool/a/x", None, false, false).unwrap();
		assert_eq!(read.blob, Blob::from("data"));
	}

	// A member outside the shard cannot be user-specified.
	client.set_member_selection_policy(subgroup, 0, ShardMemberSelectionPolicy::UserSpecified(42));
	client.set_member_selection_policy(subgroup, 1, ShardMemberSelectionPolicy::UserSpecified(42));
	assert!(client.get("/pool/a/x", None, false, false).is_err());
}

#[test]
fn test_notification_fanout() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	let subgroup = weir_core::SubgroupId::new(1, 0);

	let pool_hits = Arc::new(AtomicUsize::new(0));
	let subgroup_hits = Arc::new(AtomicUsize::new(0));
	let catch_all_hits = Arc::new(AtomicUsize::new(0));

	let counter = Arc::clone(&pool_hits);
	client.register_notification_handler("/pool/a", move |_notification| {
		counter.fetch_add(1, Ordering::SeqCst);
	});
	let counter = Arc::clone(&subgroup_hits);
	client.register_subgroup_notification_handler(subgroup, move |_notification| {
		counter.fetch_add(1, Ordering::SeqCst);
	});
	let counter = Arc::clone(&catch_all_hits);
	client.register_notification_handler("", move |_notification| {
		counter.fetch_add(1, Ordering::SeqCst);
	});

	let notify = |pathname: &str, subgroup: weir_core::SubgroupId| {
		client.notify(Notification {
			pool_pathname: pathname.to_string(),
			subgroup,
			value: Arc::new(Object::new(format!("{pathname}/x"), "payload")),
		})
	};

	// Pathname handler wins, then the subgroup handler, then the
	// catch-all.
	assert!(notify("/pool/a", subgroup));
	assert!(notify("/pool/other", subgroup));
	assert!(notify("/pool/other", weir_core::SubgroupId::new(2, 0)));
	assert_eq!(pool_hits.load(Ordering::SeqCst), 1);
	assert_eq!(subgroup_hits.load(Ordering::SeqCst), 1);
	assert_eq!(catch_all_hits.load(Ordering::SeqCst), 1);

	client.unregister_notification_handler("");
	client.unregister_notification_handler("/pool/a");
	client.unregister_subgroup_notification_handler(subgroup);
	assert!(!notify("/pool/a", subgroup));
}

#[test]
fn test_volatile_pool_reads() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = host.client();
	client.create_object_pool("/pool/v", 3, 0, ShardingPolicy::Hash).unwrap();

	let stamp = client.put(Object::new("/pool/v/x".to_string(), "volatile")).unwrap();
	let read = client.get("/pool/v/x", None, false, false).unwrap();
	assert_eq!(read.blob, Blob::from("volatile"));

	// No history on the volatile variant.
	let versioned = client.get("/pool/v/x", Some(stamp.version), false, false).unwrap();
	assert!(!StoreObject::is_valid(&versioned));
}

#[test]
fn test_graceful_shutdown() {
	let host = build_host("", Arc::new(AtomicUsize::new(0)));
	let client = Arc::clone(host.client());
	client.create_object_pool("/pool/a", 1, 0, ShardingPolicy::Hash).unwrap();
	client.put(Object::new("/pool/a/x".to_string(), "data")).unwrap();

	host.shut_down();
	assert!(matches!(
		client.put(Object::new("/pool/a/y".to_string(), "data")),
		Err(Error::Shutdown(_))
	));
}
