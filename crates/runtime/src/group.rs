// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use weir_core::{
	Error, Object, ObjectPoolMetadata, Result, ServiceConfig, ShardRef, SubgroupId, SubgroupKind,
};
use weir_store::{
	CriticalDataPathObserver, DeltaLog, FileLog, MemoryLog, NoopObserver, PersistenceObserver,
	PersistentStore, ShardSigner, ShardStore, SignatureStore, TriggerStore, VolatileStore,
};

use crate::clock::HybridClock;
use crate::shard::Shard;

/// Factory handing each data shard replica its critical-data-path
/// observer. The third argument is the member node the replica acts
/// for, so dispatchers can elect exactly one member of a shard.
pub type DataObserverFactory<'a> = dyn Fn(SubgroupKind, ShardRef, weir_core::NodeId) -> Arc<dyn CriticalDataPathObserver<Object<String>>>
	+ 'a;

/// Construction options for [`LocalRuntime`].
#[derive(Default)]
pub struct RuntimeOptions {
	/// Directory for file-backed shard logs; in-memory logs when
	/// absent.
	pub storage_dir: Option<PathBuf>,
	/// Seed for the signature subgroups' signing key; generated when
	/// absent.
	pub signer_seed: Option<[u8; 32]>,
}

struct SubgroupTypeRuntime {
	kind: SubgroupKind,
	/// `subgroups[subgroup_index][shard_index]`.
	subgroups: Vec<Vec<Shard<Object<String>>>>,
}

/// The in-process group runtime: every subgroup's shards with their
/// replicas and delivery threads, the hybrid-logical clock, the signing
/// provider, and the persistence observer consuming the delivery
/// threads' callbacks.
pub struct LocalRuntime {
	clock: Arc<HybridClock>,
	signer: Arc<ShardSigner>,
	persistence: PersistenceObserver,
	/// Shards of the reserved metadata subgroup (type 0, subgroup 0).
	metadata: Vec<Shard<ObjectPoolMetadata>>,
	/// Indexed by subgroup type index; entry 0 (metadata) stays empty.
	data_types: Vec<SubgroupTypeRuntime>,
}

impl LocalRuntime {
	pub fn build(
		config: &ServiceConfig,
		observers: &DataObserverFactory<'_>,
		options: RuntimeOptions,
	) -> Result<Self> {
		config.validate()?;

		let clock = Arc::new(HybridClock::new());
		let signer = Arc::new(match options.signer_seed {
			Some(seed) => ShardSigner::from_seed(seed),
			None => ShardSigner::generate(),
		});
		let persistence = PersistenceObserver::spawn();
		let events = persistence.event_sender();

		let open_log = |shard: ShardRef, replica: usize| -> Result<Box<dyn DeltaLog>> {
			match &options.storage_dir {
				None => Ok(Box::new(MemoryLog::new())),
				Some(dir) => {
					std::fs::create_dir_all(dir).map_err(|err| {
						Error::Fatal(format!("cannot create {}: {err}", dir.display()))
					})?;
					let path = dir.join(format!(
						"t{}-g{}-s{}-r{replica}.log",
						shard.subgroup.type_index, shard.subgroup.subgroup_index, shard.shard_index
					));
					Ok(Box::new(FileLog::open(path)?))
				}
			}
		};

		// The reserved metadata subgroup: persistent, no data-path
		// observer.
		let mut metadata = Vec::new();
		for (shard_index, layout) in config.layout[0].subgroups[0].shards.iter().enumerate() {
			let shard_ref = ShardRef::new(SubgroupId::new(0, 0), shard_index as u32);
			let mut replicas: Vec<Arc<dyn ShardStore<ObjectPoolMetadata>>> = Vec::new();
			for replica in 0..layout.replicas.len() {
				replicas.push(Arc::new(PersistentStore::new(
					shard_ref,
					open_log(shard_ref, replica)?,
					Arc::new(NoopObserver),
				)));
			}
			metadata.push(Shard::spawn(
				shard_ref,
				layout.replicas.clone(),
				replicas,
				Arc::clone(&clock),
				events.clone(),
			));
		}

		let mut data_types = Vec::with_capacity(config.layout.len());
		data_types.push(SubgroupTypeRuntime {
			kind: SubgroupKind::Metadata,
			subgroups: Vec::new(),
		});
		for (type_index, type_layout) in config.layout.iter().enumerate().skip(1) {
			let mut subgroups = Vec::with_capacity(type_layout.subgroups.len());
			for (subgroup_index, subgroup_layout) in type_layout.subgroups.iter().enumerate() {
				let subgroup_id = SubgroupId::new(type_index as u32, subgroup_index as u32);
				let mut shards = Vec::with_capacity(subgroup_layout.shards.len());
				for (shard_index, shard_layout) in subgroup_layout.shards.iter().enumerate() {
					let shard_ref = ShardRef::new(subgroup_id, shard_index as u32);
					let mut replicas: Vec<Arc<dyn ShardStore<Object<String>>>> = Vec::new();
					for (replica, member) in shard_layout.replicas.iter().enumerate() {
						let observer = observers(type_layout.kind, shard_ref, *member);
						replicas.push(match type_layout.kind {
							SubgroupKind::Volatile => Arc::new(VolatileStore::new(
								shard_ref,
								Arc::clone(&observer),
							)),
							SubgroupKind::Persistent => Arc::new(PersistentStore::new(
								shard_ref,
								open_log(shard_ref, replica)?,
								Arc::clone(&observer),
							)),
							SubgroupKind::Signature => Arc::new(SignatureStore::new(
								shard_ref,
								open_log(shard_ref, replica)?,
								Arc::clone(&signer),
								Arc::clone(&observer),
							)),
							SubgroupKind::Trigger => Arc::new(TriggerStore::new(
								shard_ref,
								Arc::clone(&observer),
							)),
							SubgroupKind::Metadata => unreachable!("validated layout"),
						});
					}
					shards.push(Shard::spawn(
						shard_ref,
						shard_layout.replicas.clone(),
						replicas,
						Arc::clone(&clock),
						events.clone(),
					));
				}
				subgroups.push(shards);
			}
			data_types.push(SubgroupTypeRuntime {
				kind: type_layout.kind,
				subgroups,
			});
		}

		debug!(types = data_types.len(), "local runtime built");
		Ok(Self {
			clock,
			signer,
			persistence,
			metadata,
			data_types,
		})
	}

	pub fn clock(&self) -> &Arc<HybridClock> {
		&self.clock
	}

	/// Verifying key of the runtime's signing provider.
	pub fn verifying_key(&self) -> weir_store::VerifyingKey {
		self.signer.verifying_key()
	}

	pub fn persistence(&self) -> &PersistenceObserver {
		&self.persistence
	}

	pub fn kind_of(&self, type_index: u32) -> Result<SubgroupKind> {
		self.data_types
			.get(type_index as usize)
			.map(|type_runtime| type_runtime.kind)
			.ok_or_else(|| Error::Transport(format!("unknown subgroup type {type_index}")))
	}

	pub fn num_subgroups(&self, type_index: u32) -> Result<usize> {
		if type_index == 0 {
			return Ok(1);
		}
		Ok(self.type_runtime(type_index)?.subgroups.len())
	}

	pub fn num_shards(&self, subgroup: SubgroupId) -> Result<usize> {
		if subgroup.type_index == 0 {
			return Ok(self.metadata.len());
		}
		Ok(self.data_subgroup(subgroup)?.len())
	}

	pub fn metadata_shard(&self, shard_index: u32) -> Result<&Shard<ObjectPoolMetadata>> {
		self.metadata.get(shard_index as usize).ok_or_else(|| {
			Error::Transport(format!("unknown metadata shard {shard_index}"))
		})
	}

	pub fn metadata_shards(&self) -> &[Shard<ObjectPoolMetadata>] {
		&self.metadata
	}

	pub fn data_shard(&self, subgroup: SubgroupId, shard_index: u32) -> Result<&Shard<Object<String>>> {
		self.data_subgroup(subgroup)?.get(shard_index as usize).ok_or_else(|| {
			Error::Transport(format!("unknown shard {subgroup}/{shard_index}"))
		})
	}

	/// Member list of a shard, as the current view has it.
	pub fn shard_members(&self, subgroup: SubgroupId, shard_index: u32) -> Result<Vec<weir_core::NodeId>> {
		if subgroup.type_index == 0 {
			return Ok(self.metadata_shard(shard_index)?.members().to_vec());
		}
		Ok(self.data_shard(subgroup, shard_index)?.members().to_vec())
	}

	fn type_runtime(&self, type_index: u32) -> Result<&SubgroupTypeRuntime> {
		self.data_types
			.get(type_index as usize)
			.ok_or_else(|| Error::Transport(format!("unknown subgroup type {type_index}")))
	}

	fn data_subgroup(&self, subgroup: SubgroupId) -> Result<&Vec<Shard<Object<String>>>> {
		self.type_runtime(subgroup.type_index)?
			.subgroups
			.get(subgroup.subgroup_index as usize)
			.ok_or_else(|| Error::Transport(format!("unknown subgroup {subgroup}")))
	}

	/// Stops every delivery thread and the persistence observer.
	pub fn shut_down(&self) {
		for shard in &self.metadata {
			shard.shut_down();
		}
		for type_runtime in &self.data_types {
			for subgroup in &type_runtime.subgroups {
				for shard in subgroup {
					shard.shut_down();
				}
			}
		}
		self.persistence.shut_down();
	}
}

impl Drop for LocalRuntime {
	fn drop(&mut self) {
		self.shut_down();
	}
}
