// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use weir_core::{Error, ObjectKey, Result, ServiceConfig};

use crate::action::Action;
use crate::graph::Statefulness;

/// Capacity of each action queue. An enqueue into a full queue blocks
/// the critical path until a worker drains a slot.
pub const ACTION_BUFFER_SIZE: usize = 8192;

/// Worker-pool sizing and CPU placement. The stateful pool sizes are
/// the modulus of the key-hash routing and must match on every replica
/// of a stateful UDL.
#[derive(Clone, Debug)]
pub struct EngineConfig {
	pub stateful_workers_for_multicast: usize,
	pub stateful_workers_for_p2p: usize,
	pub stateless_workers_for_multicast: usize,
	pub stateless_workers_for_p2p: usize,
	pub cpu_cores: Vec<usize>,
	/// Worker thread name (e.g. `"m_stateful-1"`) to the cores it is
	/// pinned to; workers without an entry use `cpu_cores`.
	pub worker_cpu_affinity: HashMap<String, Vec<usize>>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		let stateless = num_cpus::get().min(4);
		Self {
			stateful_workers_for_multicast: 2,
			stateful_workers_for_p2p: 2,
			stateless_workers_for_multicast: stateless,
			stateless_workers_for_p2p: stateless,
			cpu_cores: Vec::new(),
			worker_cpu_affinity: HashMap::new(),
		}
	}
}

impl From<&ServiceConfig> for EngineConfig {
	fn from(config: &ServiceConfig) -> Self {
		Self {
			stateful_workers_for_multicast: config.num_stateful_workers_for_multicast_ocdp,
			stateful_workers_for_p2p: config.num_stateful_workers_for_p2p_ocdp,
			stateless_workers_for_multicast: config.num_stateless_workers_for_multicast_ocdp,
			stateless_workers_for_p2p: config.num_stateless_workers_for_p2p_ocdp,
			cpu_cores: config.cpu_cores.clone(),
			worker_cpu_affinity: config.worker_cpu_affinity.clone(),
		}
	}
}

/// The senders for one delivery path: per-worker stateful queues, one
/// shared stateless queue, one single-threaded queue.
struct QueueSet {
	stateful: Vec<Sender<Action>>,
	stateless: Sender<Action>,
	single_threaded: Sender<Action>,
}

struct EngineQueues {
	multicast: QueueSet,
	p2p: QueueSet,
}

/// The off-critical-path execution engine: six queue groups, one per
/// combination of {ordered, trigger} and {stateful, stateless,
/// single-threaded}, each a bounded channel drained by its worker pool.
///
/// Queue discipline: STATEFUL actions are routed by key hash so the
/// same key is always served by the same worker (per-key FIFO);
/// STATELESS actions go to any worker of the pool; SINGLETHREADED
/// actions share one dedicated worker. No ordering holds across
/// queues.
///
/// Shutdown is cooperative: the running flag flips, every queue is
/// closed, blocked enqueuers fail, and workers drain their queues
/// before joining.
pub struct ExecutionEngine {
	queues: RwLock<Option<EngineQueues>>,
	running: AtomicBool,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionEngine {
	pub fn spawn(config: EngineConfig) -> Self {
		let config = Arc::new(config);
		let mut workers = Vec::new();

		let multicast = QueueSet::build(
			"m",
			config.stateful_workers_for_multicast,
			config.stateless_workers_for_multicast,
			&config,
			&mut workers,
		);
		let p2p = QueueSet::build(
			"p2p",
			config.stateful_workers_for_p2p,
			config.stateless_workers_for_p2p,
			&config,
			&mut workers,
		);
		debug!(workers = workers.len(), "execution engine started");

		Self {
			queues: RwLock::new(Some(EngineQueues {
				multicast,
				p2p,
			})),
			running: AtomicBool::new(true),
			workers: Mutex::new(workers),
		}
	}

	/// Posts an action to the queue selected by `(statefulness,
	/// is_trigger)`. Blocks while the queue is full; fails once the
	/// engine is shut down.
	pub fn post(&self, action: Action, statefulness: Statefulness, is_trigger: bool) -> Result<()> {
		if !self.running.load(Ordering::Acquire) {
			return Err(Error::Shutdown("execution engine is stopped".into()));
		}
		let sender = {
			let guard = self.queues.read();
			let queues = guard
				.as_ref()
				.ok_or_else(|| Error::Shutdown("execution engine queues are closed".into()))?;
			let set = if is_trigger {
				&queues.p2p
			} else {
				&queues.multicast
			};
			match statefulness {
				Statefulness::Stateful => {
					let at = (action.key.route_hash() % set.stateful.len() as u64) as usize;
					set.stateful[at].clone()
				}
				Statefulness::Stateless => set.stateless.clone(),
				Statefulness::SingleThreaded => set.single_threaded.clone(),
			}
		};
		sender
			.send(action)
			.map_err(|_| Error::Shutdown("execution engine queues are closed".into()))
	}

	pub fn stateless_queue_length(&self, is_trigger: bool) -> usize {
		let guard = self.queues.read();
		match guard.as_ref() {
			None => 0,
			Some(queues) if is_trigger => queues.p2p.stateless.len(),
			Some(queues) => queues.multicast.stateless.len(),
		}
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	/// Stops the engine: closes every queue, lets workers drain, and
	/// joins them.
	pub fn shut_down(&self) {
		if !self.running.swap(false, Ordering::AcqRel) {
			return;
		}
		*self.queues.write() = None;
		for worker in self.workers.lock().drain(..) {
			if worker.join().is_err() {
				warn!("engine worker panicked");
			}
		}
		debug!("execution engine stopped");
	}
}

impl Drop for ExecutionEngine {
	fn drop(&mut self) {
		self.shut_down();
	}
}

impl QueueSet {
	fn build(
		path_tag: &str,
		stateful_workers: usize,
		stateless_workers: usize,
		config: &Arc<EngineConfig>,
		workers: &mut Vec<JoinHandle<()>>,
	) -> Self {
		let mut stateful = Vec::with_capacity(stateful_workers);
		for worker_id in 0..stateful_workers {
			let (sender, receiver) = crossbeam_channel::bounded(ACTION_BUFFER_SIZE);
			stateful.push(sender);
			workers.push(spawn_worker(
				format!("{path_tag}_stateful-{worker_id}"),
				worker_id,
				receiver,
				config,
			));
		}

		let (stateless, stateless_receiver) =
			crossbeam_channel::bounded::<Action>(ACTION_BUFFER_SIZE);
		for worker_id in 0..stateless_workers {
			workers.push(spawn_worker(
				format!("{path_tag}_stateless-{worker_id}"),
				worker_id,
				stateless_receiver.clone(),
				config,
			));
		}

		let (single_threaded, single_receiver) =
			crossbeam_channel::bounded::<Action>(ACTION_BUFFER_SIZE);
		workers.push(spawn_worker(format!("{path_tag}_single"), 0, single_receiver, config));

		Self {
			stateful,
			stateless,
			single_threaded,
		}
	}
}

fn spawn_worker(
	name: String,
	worker_id: usize,
	receiver: Receiver<Action>,
	config: &Arc<EngineConfig>,
) -> JoinHandle<()> {
	let config = Arc::clone(config);
	std::thread::Builder::new()
		.name(name.clone())
		.spawn(move || {
			pin_current_thread(&name, &config);
			// recv fails only once the queue is both closed and
			// drained.
			while let Ok(action) = receiver.recv() {
				action.fire(worker_id);
			}
		})
		.expect("cannot spawn engine worker")
}

#[cfg(target_os = "linux")]
fn pin_current_thread(name: &str, config: &EngineConfig) {
	let cores = config
		.worker_cpu_affinity
		.get(name)
		.cloned()
		.unwrap_or_else(|| config.cpu_cores.clone());
	if cores.is_empty() {
		return;
	}
	unsafe {
		let mut set: libc::cpu_set_t = std::mem::zeroed();
		libc::CPU_ZERO(&mut set);
		for core in cores {
			libc::CPU_SET(core, &mut set);
		}
		if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
			warn!(worker = name, "sched_setaffinity failed");
		}
	}
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(_name: &str, _config: &EngineConfig) {}
