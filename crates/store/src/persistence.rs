// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use weir_core::{ShardRef, Version};

/// A local or global persistence notification from the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PersistenceEvent {
	pub shard: ShardRef,
	pub version: Version,
	pub is_global: bool,
}

type PersistenceAction = Box<dyn FnOnce() + Send>;

struct ActionRegistry {
	/// Actions waiting for `(shard, is_global, version)` to persist.
	by_event: BTreeMap<(ShardRef, bool, Version), Vec<PersistenceAction>>,
	/// Actions registered after their event had already fired; run on
	/// the next worker loop.
	past_due: Vec<PersistenceAction>,
}

struct Shared {
	/// Largest persisted version per `(shard, is_global)`, updated only
	/// by the worker.
	frontiers: Mutex<HashMap<(ShardRef, bool), Version>>,
	registry: Mutex<ActionRegistry>,
}

/// Runs registered callbacks when a shard's local or global persistence
/// frontier advances past their version. One background thread, named
/// `pers_observer`, consumes the runtime's callback stream.
pub struct PersistenceObserver {
	sender: Sender<PersistenceEvent>,
	shared: Arc<Shared>,
	shutdown: Arc<AtomicBool>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceObserver {
	pub fn spawn() -> Self {
		let (sender, receiver) = crossbeam_channel::unbounded();
		let shared = Arc::new(Shared {
			frontiers: Mutex::new(HashMap::new()),
			registry: Mutex::new(ActionRegistry {
				by_event: BTreeMap::new(),
				past_due: Vec::new(),
			}),
		});
		let shutdown = Arc::new(AtomicBool::new(false));

		let worker = {
			let shared = Arc::clone(&shared);
			let shutdown = Arc::clone(&shutdown);
			std::thread::Builder::new()
				.name("pers_observer".into())
				.spawn(move || worker_loop(receiver, shared, shutdown))
				.expect("cannot spawn pers_observer thread")
		};

		Self {
			sender,
			shared,
			shutdown,
			worker: Mutex::new(Some(worker)),
		}
	}

	/// The sender the runtime delivers persistence callbacks through.
	pub fn event_sender(&self) -> Sender<PersistenceEvent> {
		self.sender.clone()
	}

	/// Registers `action` to run once `(shard, version)` has reached
	/// local (or global) persistence. An action registered behind the
	/// frontier fires on the worker's next loop.
	pub fn register_persistence_action(
		&self,
		shard: ShardRef,
		version: Version,
		is_global: bool,
		action: impl FnOnce() + Send + 'static,
	) {
		let already_persisted = self
			.shared
			.frontiers
			.lock()
			.get(&(shard, is_global))
			.is_some_and(|frontier| *frontier >= version);

		let mut registry = self.shared.registry.lock();
		if already_persisted {
			registry.past_due.push(Box::new(action));
		} else {
			registry.by_event.entry((shard, is_global, version)).or_default().push(Box::new(action));
		}
	}

	pub fn shut_down(&self) {
		self.shutdown.store(true, Ordering::Release);
		// Wake the worker so it notices the flag.
		let _ = self.sender.send(PersistenceEvent {
			shard: ShardRef::new(weir_core::SubgroupId::new(0, 0), 0),
			version: Version::INVALID,
			is_global: false,
		});
		if let Some(worker) = self.worker.lock().take() {
			if worker.join().is_err() {
				warn!("pers_observer thread panicked");
			}
		}
	}
}

impl Drop for PersistenceObserver {
	fn drop(&mut self) {
		self.shut_down();
	}
}

fn worker_loop(receiver: Receiver<PersistenceEvent>, shared: Arc<Shared>, shutdown: Arc<AtomicBool>) {
	loop {
		// Past-due actions run every loop, before blocking again.
		let past_due = std::mem::take(&mut shared.registry.lock().past_due);
		for action in past_due {
			action();
		}

		if shutdown.load(Ordering::Acquire) {
			return;
		}

		let event = match receiver.recv_timeout(Duration::from_millis(100)) {
			Ok(event) => event,
			Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
			Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
		};
		if !event.version.is_valid() {
			// Shutdown nudge.
			continue;
		}
		debug!(shard = %event.shard, version = %event.version, global = event.is_global, "persistence event");

		shared
			.frontiers
			.lock()
			.entry((event.shard, event.is_global))
			.and_modify(|frontier| {
				if event.version > *frontier {
					*frontier = event.version;
				}
			})
			.or_insert(event.version);

		// Fire every action registered at or below the new frontier.
		let mut due = Vec::new();
		{
			let mut registry = shared.registry.lock();
			let range_start = (event.shard, event.is_global, Version(0));
			let range_end = (event.shard, event.is_global, event.version);
			let matched: Vec<_> =
				registry.by_event.range(range_start..=range_end).map(|(key, _)| *key).collect();
			for key in matched {
				if let Some(actions) = registry.by_event.remove(&key) {
					due.extend(actions);
				}
			}
		}
		for action in due {
			action();
		}
	}
}
