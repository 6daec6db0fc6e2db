// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::warn;

use weir_core::{Error, NodeId, Result, ShardRef, StoreObject, Version, VersionStamp};
use weir_store::{PersistenceEvent, ShardStore};

use crate::clock::HybridClock;

/// How long a caller waits on an ordered-delivery reply before the
/// operation surfaces as a transport failure.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

enum OrderedRequest<O: StoreObject> {
	Put {
		value: O,
		sender: NodeId,
		reply: Option<Sender<VersionStamp>>,
	},
	Remove {
		key: O::Key,
		sender: NodeId,
		reply: Sender<VersionStamp>,
	},
	Get {
		key: O::Key,
		reply: Sender<O>,
	},
	ListKeys {
		prefix: String,
		reply: Sender<Vec<O::Key>>,
	},
	GetSize {
		key: O::Key,
		reply: Sender<u64>,
	},
}

/// One shard of one subgroup: its member list, one store replica per
/// member, and the single ordered-delivery thread that serializes every
/// mutation and `multi_` read.
///
/// The delivery thread mints `(version, timestamp)` per delivery
/// (versions strictly increase in delivery order), applies the operation
/// to every replica, and advances the persistence frontiers once all
/// replicas have committed.
pub struct Shard<O: StoreObject> {
	shard: ShardRef,
	members: Vec<NodeId>,
	replicas: Vec<Arc<dyn ShardStore<O>>>,
	submit: Mutex<Option<Sender<OrderedRequest<O>>>>,
	delivery: Mutex<Option<JoinHandle<()>>>,
}

impl<O: StoreObject> Shard<O> {
	pub(crate) fn spawn(
		shard: ShardRef,
		members: Vec<NodeId>,
		replicas: Vec<Arc<dyn ShardStore<O>>>,
		clock: Arc<HybridClock>,
		events: Sender<PersistenceEvent>,
	) -> Self {
		assert_eq!(members.len(), replicas.len());
		let (submit, requests) = crossbeam_channel::unbounded::<OrderedRequest<O>>();
		let delivery_replicas = replicas.clone();
		// Resume version minting past whatever a recovered log already
		// holds.
		let resume_from = replicas
			.iter()
			.filter_map(|replica| replica.latest_version())
			.max()
			.map(|version| version.0 + 1)
			.unwrap_or(0);
		let delivery = std::thread::Builder::new()
			.name(format!("delivery-{shard}"))
			.spawn(move || {
				let mut next_version = resume_from;
				while let Ok(request) = requests.recv() {
					deliver(
						shard,
						&delivery_replicas,
						&clock,
						&events,
						&mut next_version,
						request,
					);
				}
			})
			.expect("cannot spawn delivery thread");

		Self {
			shard,
			members,
			replicas,
			submit: Mutex::new(Some(submit)),
			delivery: Mutex::new(Some(delivery)),
		}
	}

	pub fn shard_ref(&self) -> ShardRef {
		self.shard
	}

	pub fn members(&self) -> &[NodeId] {
		&self.members
	}

	/// The replica hosted by `member`, for point-to-point operations.
	pub fn store_on(&self, member: NodeId) -> Result<&Arc<dyn ShardStore<O>>> {
		self.members
			.iter()
			.position(|node| *node == member)
			.map(|at| &self.replicas[at])
			.ok_or_else(|| {
				Error::Transport(format!("node {member} is not a member of shard {}", self.shard))
			})
	}

	fn submitter(&self) -> Result<Sender<OrderedRequest<O>>> {
		self.submit
			.lock()
			.clone()
			.ok_or_else(|| Error::Shutdown(format!("shard {} is stopped", self.shard)))
	}

	fn call<T>(&self, build: impl FnOnce(Sender<T>) -> OrderedRequest<O>) -> Result<T> {
		let submit = self.submitter()?;
		let (reply, slot) = crossbeam_channel::bounded(1);
		submit
			.send(build(reply))
			.map_err(|_| Error::Shutdown(format!("shard {} is stopped", self.shard)))?;
		slot.recv_timeout(RPC_TIMEOUT)
			.map_err(|_| Error::Transport(format!("ordered delivery on {} timed out", self.shard)))
	}

	/// Ordered put. The returned stamp is invalid when every replica
	/// rejected the mutation.
	pub fn put(&self, value: O, sender: NodeId) -> Result<VersionStamp> {
		self.call(|reply| OrderedRequest::Put {
			value,
			sender,
			reply: Some(reply),
		})
	}

	/// Ordered put without waiting for the outcome.
	pub fn put_and_forget(&self, value: O, sender: NodeId) -> Result<()> {
		self.submitter()?
			.send(OrderedRequest::Put {
				value,
				sender,
				reply: None,
			})
			.map_err(|_| Error::Shutdown(format!("shard {} is stopped", self.shard)))
	}

	pub fn remove(&self, key: O::Key, sender: NodeId) -> Result<VersionStamp> {
		self.call(|reply| OrderedRequest::Remove {
			key,
			sender,
			reply,
		})
	}

	/// Ordered read: observes every previously delivered mutation.
	pub fn multi_get(&self, key: O::Key) -> Result<O> {
		self.call(|reply| OrderedRequest::Get {
			key,
			reply,
		})
	}

	pub fn multi_list_keys(&self, prefix: String) -> Result<Vec<O::Key>> {
		self.call(|reply| OrderedRequest::ListKeys {
			prefix,
			reply,
		})
	}

	pub fn multi_get_size(&self, key: O::Key) -> Result<u64> {
		self.call(|reply| OrderedRequest::GetSize {
			key,
			reply,
		})
	}

	/// Stops the delivery thread after draining queued deliveries.
	pub fn shut_down(&self) {
		*self.submit.lock() = None;
		if let Some(delivery) = self.delivery.lock().take() {
			if delivery.join().is_err() {
				warn!(shard = %self.shard, "delivery thread panicked");
			}
		}
	}
}

impl<O: StoreObject> Drop for Shard<O> {
	fn drop(&mut self) {
		self.shut_down();
	}
}

fn deliver<O: StoreObject>(
	shard: ShardRef,
	replicas: &[Arc<dyn ShardStore<O>>],
	clock: &HybridClock,
	events: &Sender<PersistenceEvent>,
	next_version: &mut u64,
	request: OrderedRequest<O>,
) {
	match request {
		OrderedRequest::Put {
			value,
			sender,
			reply,
		} => {
			let stamp = VersionStamp::new(Version(*next_version), clock.now_us());
			*next_version += 1;
			// Replicas are deterministic: they all accept or all
			// reject.
			let mut outcome = VersionStamp::INVALID;
			for replica in replicas {
				outcome = replica.ordered_put(value.clone(), stamp, sender);
			}
			if outcome.is_valid() {
				commit(shard, replicas, events, stamp.version);
			}
			if let Some(reply) = reply {
				let _ = reply.send(outcome);
			}
		}
		OrderedRequest::Remove {
			key,
			sender,
			reply,
		} => {
			let stamp = VersionStamp::new(Version(*next_version), clock.now_us());
			*next_version += 1;
			let mut outcome = VersionStamp::INVALID;
			for replica in replicas {
				outcome = replica.ordered_remove(key.clone(), stamp, sender);
			}
			if outcome.is_valid() {
				commit(shard, replicas, events, stamp.version);
			}
			let _ = reply.send(outcome);
		}
		OrderedRequest::Get {
			key,
			reply,
		} => {
			let _ = reply.send(replicas[0].ordered_get(&key));
		}
		OrderedRequest::ListKeys {
			prefix,
			reply,
		} => {
			let _ = reply.send(replicas[0].ordered_list_keys(&prefix));
		}
		OrderedRequest::GetSize {
			key,
			reply,
		} => {
			let _ = reply.send(replicas[0].ordered_get_size(&key));
		}
	}
}

/// Every replica applied and logged the delivery: its local persistence
/// is implicit in the log append, and with all replicas in-process the
/// global frontier advances immediately after.
fn commit<O: StoreObject>(
	shard: ShardRef,
	replicas: &[Arc<dyn ShardStore<O>>],
	events: &Sender<PersistenceEvent>,
	version: Version,
) {
	let _ = events.send(PersistenceEvent {
		shard,
		version,
		is_global: false,
	});
	for replica in replicas {
		replica.advance_persistence_frontier(version, true);
	}
	let _ = events.send(PersistenceEvent {
		shard,
		version,
		is_global: true,
	});
}
