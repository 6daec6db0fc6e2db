// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use weir_core::{Object, Version};
use weir_flow::{
	Action, EngineConfig, ExecutionEngine, Statefulness, UdlInvocation, UserDefinedLogic,
};

/// Records every invocation it receives.
struct Recorder {
	seen: Mutex<HashMap<String, Vec<(u64, usize)>>>,
	count: AtomicUsize,
}

impl Recorder {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			seen: Mutex::new(HashMap::new()),
			count: AtomicUsize::new(0),
		})
	}

	fn wait_for(&self, expected: usize) {
		let deadline = Instant::now() + Duration::from_secs(5);
		while self.count.load(Ordering::SeqCst) < expected {
			if Instant::now() > deadline {
				panic!(
					"timed out: {} of {expected} invocations",
					self.count.load(Ordering::SeqCst)
				);
			}
			std::thread::yield_now();
		}
	}
}

impl UserDefinedLogic for Recorder {
	fn handle(&self, invocation: UdlInvocation<'_>) {
		self.seen
			.lock()
			.entry(invocation.key.to_string())
			.or_default()
			.push((invocation.version.0, invocation.worker_id));
		self.count.fetch_add(1, Ordering::SeqCst);
	}
}

fn action(udl: &Arc<Recorder>, key: &str, version: u64) -> Action {
	Action {
		sender: 1,
		key: key.to_string(),
		prefix_length: key.rfind('/').map(|at| at + 1).unwrap_or(0),
		version: Version(version),
		udl: Arc::clone(udl) as Arc<dyn UserDefinedLogic>,
		value: Arc::new(Object::new(key.to_string(), "payload")),
		outputs: Arc::new(BTreeMap::new()),
	}
}

fn small_engine() -> ExecutionEngine {
	ExecutionEngine::spawn(EngineConfig {
		stateful_workers_for_multicast: 4,
		stateful_workers_for_p2p: 2,
		stateless_workers_for_multicast: 3,
		stateless_workers_for_p2p: 2,
		..EngineConfig::default()
	})
}

#[test]
fn test_stateless_pool_runs_everything() {
	let engine = small_engine();
	let recorder = Recorder::new();

	for version in 0..50 {
		engine.post(action(&recorder, "/pool/a/x", version), Statefulness::Stateless, false)
			.unwrap();
	}
	recorder.wait_for(50);
}

#[test]
fn test_stateful_routing_pins_keys_and_preserves_order() {
	let engine = small_engine();
	let recorder = Recorder::new();
	let keys = ["/pool/a/k0", "/pool/a/k1", "/pool/a/k2", "/pool/a/k3", "/pool/a/k4"];

	let mut version = 0u64;
	for round in 0..100 {
		let _ = round;
		for key in &keys {
			engine.post(action(&recorder, key, version), Statefulness::Stateful, false)
				.unwrap();
			version += 1;
		}
	}
	recorder.wait_for(500);

	let seen = recorder.seen.lock();
	for key in &keys {
		let invocations = &seen[*key];
		assert_eq!(invocations.len(), 100);
		// Same worker every time.
		let worker = invocations[0].1;
		assert!(invocations.iter().all(|(_, w)| *w == worker), "key {key} hopped workers");
		// Per-key delivery order.
		assert!(
			invocations.windows(2).all(|pair| pair[0].0 < pair[1].0),
			"key {key} reordered"
		);
	}
}

#[test]
fn test_single_threaded_queue_is_fifo() {
	let engine = small_engine();
	let recorder = Recorder::new();

	for version in 0..200 {
		engine.post(
			action(&recorder, "/pool/a/x", version),
			Statefulness::SingleThreaded,
			false,
		)
		.unwrap();
	}
	recorder.wait_for(200);

	let seen = recorder.seen.lock();
	let invocations = &seen["/pool/a/x"];
	let versions: Vec<u64> = invocations.iter().map(|(version, _)| *version).collect();
	assert_eq!(versions, (0..200).collect::<Vec<u64>>());
}

#[test]
fn test_trigger_and_ordered_paths_are_separate_pools() {
	let engine = small_engine();
	let ordered = Recorder::new();
	let triggered = Recorder::new();

	for version in 0..20 {
		engine.post(action(&ordered, "/pool/a/x", version), Statefulness::Stateless, false)
			.unwrap();
		engine.post(action(&triggered, "/pool/a/x", version), Statefulness::Stateless, true)
			.unwrap();
	}
	ordered.wait_for(20);
	triggered.wait_for(20);
}

#[test]
fn test_post_after_shutdown_fails() {
	let engine = small_engine();
	let recorder = Recorder::new();

	engine.post(action(&recorder, "/pool/a/x", 0), Statefulness::Stateless, false).unwrap();
	engine.shut_down();
	assert!(!engine.is_running());

	// Work posted before shutdown drained before the join.
	assert_eq!(recorder.count.load(Ordering::SeqCst), 1);

	let err =
		engine.post(action(&recorder, "/pool/a/x", 1), Statefulness::Stateless, false).unwrap_err();
	assert!(matches!(err, weir_core::Error::Shutdown(_)));
}

#[test]
fn test_queue_length_is_observable() {
	let engine = small_engine();
	assert_eq!(engine.stateless_queue_length(false), 0);
	assert_eq!(engine.stateless_queue_length(true), 0);
}
