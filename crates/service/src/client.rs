// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, instrument};

use weir_core::{
	Error, NodeId, Object, ObjectKey, ObjectPoolMetadata, Result, ShardRef, ShardingPolicy,
	StoreObject, SubgroupId, Version, VersionStamp,
};
use weir_runtime::LocalRuntime;
use weir_store::ShardStore;

use crate::metadata::{PoolCache, PoolLocation, METADATA_SUBGROUP};

/// Transport failures retry this many times, refreshing the membership
/// view in between, before surfacing.
const MAX_TRANSPORT_RETRIES: usize = 3;

/// How a client picks the member of a shard to contact for
/// point-to-point operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShardMemberSelectionPolicy {
	FirstMember,
	LastMember,
	/// A fresh random member per operation.
	Random,
	/// A random member chosen once and kept until a membership
	/// refresh.
	FixedRandom,
	#[default]
	RoundRobin,
	/// The member elected by the key's hash.
	KeyHashing,
	UserSpecified(NodeId),
}

#[derive(Default)]
struct PolicyState {
	policy: ShardMemberSelectionPolicy,
	round_robin_next: usize,
	fixed: Option<NodeId>,
}

/// A notification fanned out to client-side handlers, keyed by the
/// object pool and the subgroup it originated from.
pub struct Notification {
	pub pool_pathname: String,
	pub subgroup: SubgroupId,
	pub value: Arc<Object<String>>,
}

type NotificationHandler = Box<dyn Fn(&Notification) + Send + Sync>;

/// The client facade: member selection, object-pool-aware routing with
/// the local metadata cache, bounded transport retries, and
/// notification fan-out.
pub struct ServiceClient {
	runtime: Arc<LocalRuntime>,
	node_id: NodeId,
	pools: PoolCache,
	policies: Mutex<HashMap<ShardRef, PolicyState>>,
	/// Pool pathname to handler; the empty pathname is the catch-all.
	handlers: RwLock<HashMap<String, NotificationHandler>>,
	/// Handlers keyed by the originating subgroup, consulted after the
	/// pathname handlers.
	subgroup_handlers: RwLock<HashMap<SubgroupId, NotificationHandler>>,
}

impl ServiceClient {
	pub fn new(runtime: Arc<LocalRuntime>, node_id: NodeId) -> Self {
		Self {
			runtime,
			node_id,
			pools: PoolCache::new(),
			policies: Mutex::new(HashMap::new()),
			handlers: RwLock::new(HashMap::new()),
			subgroup_handlers: RwLock::new(HashMap::new()),
		}
	}

	pub fn node_id(&self) -> NodeId {
		self.node_id
	}

	pub fn runtime(&self) -> &Arc<LocalRuntime> {
		&self.runtime
	}

	// ------------------------------------------------------------------
	// Member selection
	// ------------------------------------------------------------------

	pub fn set_member_selection_policy(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		policy: ShardMemberSelectionPolicy,
	) {
		let mut policies = self.policies.lock();
		let state = policies.entry(ShardRef::new(subgroup, shard_index)).or_default();
		state.policy = policy;
		state.fixed = None;
	}

	pub fn get_member_selection_policy(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
	) -> ShardMemberSelectionPolicy {
		self.policies
			.lock()
			.get(&ShardRef::new(subgroup, shard_index))
			.map(|state| state.policy)
			.unwrap_or_default()
	}

	fn pick_member(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		key_for_hashing: Option<&String>,
	) -> Result<NodeId> {
		let members = self.runtime.shard_members(subgroup, shard_index)?;
		let mut policies = self.policies.lock();
		let state = policies.entry(ShardRef::new(subgroup, shard_index)).or_default();
		let member = match state.policy {
			ShardMemberSelectionPolicy::FirstMember => members[0],
			ShardMemberSelectionPolicy::LastMember => members[members.len() - 1],
			ShardMemberSelectionPolicy::Random => {
				members[rand::thread_rng().gen_range(0..members.len())]
			}
			ShardMemberSelectionPolicy::FixedRandom => *state.fixed.get_or_insert_with(|| {
				members[rand::thread_rng().gen_range(0..members.len())]
			}),
			ShardMemberSelectionPolicy::RoundRobin => {
				let at = state.round_robin_next % members.len();
				state.round_robin_next = state.round_robin_next.wrapping_add(1);
				members[at]
			}
			ShardMemberSelectionPolicy::KeyHashing => match key_for_hashing {
				Some(key) => members[(key.route_hash() % members.len() as u64) as usize],
				None => members[0],
			},
			ShardMemberSelectionPolicy::UserSpecified(node) => {
				if !members.contains(&node) {
					return Err(Error::Transport(format!(
						"node {node} is not a member of {subgroup}/{shard_index}"
					)));
				}
				node
			}
		};
		Ok(member)
	}

	/// Drops cached member choices; the next pick re-reads the view.
	fn refresh_membership(&self) {
		for state in self.policies.lock().values_mut() {
			state.fixed = None;
		}
	}

	fn with_retry<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
		let mut last = None;
		for _ in 0..MAX_TRANSPORT_RETRIES {
			match op() {
				Ok(value) => return Ok(value),
				Err(err) if err.is_retryable() => {
					debug!("transport failure, refreshing membership: {err}");
					self.refresh_membership();
					last = Some(err);
				}
				Err(err) => return Err(err),
			}
		}
		Err(last.unwrap_or_else(|| Error::Transport("retries exhausted".into())))
	}

	// ------------------------------------------------------------------
	// Object pools
	// ------------------------------------------------------------------

	fn metadata_shard_for(&self, pathname: &str) -> Result<&weir_runtime::Shard<ObjectPoolMetadata>> {
		let shards = self.runtime.num_shards(METADATA_SUBGROUP)? as u64;
		self.runtime
			.metadata_shard((pathname.to_string().route_hash() % shards) as u32)
	}

	#[instrument(level = "debug", skip(self))]
	pub fn create_object_pool(
		&self,
		pathname: &str,
		subgroup_type_index: u32,
		subgroup_index: u32,
		sharding_policy: ShardingPolicy,
	) -> Result<VersionStamp> {
		if !pathname.starts_with('/') || pathname.ends_with('/') || pathname.len() < 2 {
			return Err(Error::InvalidValue(format!(
				"object pool pathname must be absolute without a trailing separator: {pathname}"
			)));
		}
		if subgroup_type_index == 0 {
			return Err(Error::InvalidValue(
				"subgroup type 0 is reserved for the metadata service".into(),
			));
		}
		let kind = self.runtime.kind_of(subgroup_type_index)?;
		if subgroup_index as usize >= self.runtime.num_subgroups(subgroup_type_index)? {
			return Err(Error::InvalidValue(format!(
				"subgroup type {subgroup_type_index} has no subgroup {subgroup_index}"
			)));
		}
		debug!(pathname, ?kind, "creating object pool");

		if let Ok(existing) = self.find_object_pool(pathname) {
			if !existing.deleted {
				return Err(Error::InvalidValue(format!("object pool {pathname} already exists")));
			}
		}

		let record = ObjectPoolMetadata::new(
			pathname,
			subgroup_type_index,
			subgroup_index,
			sharding_policy,
		);
		let stamp = self.metadata_shard_for(pathname)?.put(record.clone(), self.node_id)?;
		if !stamp.is_valid() {
			return Err(Error::InvalidValue(format!(
				"object pool {pathname} creation rejected"
			)));
		}
		let mut cached = record;
		cached.version = stamp.version;
		cached.timestamp_us = stamp.timestamp_us;
		self.pools.insert(cached);
		Ok(stamp)
	}

	/// Tombstones the pool record; its history is retained.
	#[instrument(level = "debug", skip(self))]
	pub fn remove_object_pool(&self, pathname: &str) -> Result<VersionStamp> {
		let mut record = self.find_object_pool(pathname)?;
		if record.deleted {
			return Err(Error::InvalidValue(format!(
				"object pool {pathname} has been removed already"
			)));
		}
		// Guard against a concurrent pool update slipping in between.
		record.previous_version_by_key = record.version;
		record.previous_version = Version::INVALID;
		record.deleted = true;

		let stamp = self.metadata_shard_for(pathname)?.put(record, self.node_id)?;
		if !stamp.is_valid() {
			return Err(Error::InvalidValue(format!(
				"object pool {pathname} removal lost a concurrent update"
			)));
		}
		self.pools.evict(pathname);
		Ok(stamp)
	}

	pub fn find_object_pool(&self, pathname: &str) -> Result<ObjectPoolMetadata> {
		let record = self.metadata_shard_for(pathname)?.multi_get(pathname.to_string())?;
		if !StoreObject::is_valid(&record) || record.is_null() {
			return Err(Error::NotFound(format!("no object pool {pathname}")));
		}
		Ok(record)
	}

	/// Every pool pathname in the directory, tombstoned pools
	/// included.
	pub fn list_object_pools(&self) -> Result<Vec<String>> {
		let mut pathnames = Vec::new();
		for shard in self.runtime.metadata_shards() {
			pathnames.extend(shard.multi_list_keys(String::new())?);
		}
		pathnames.sort();
		Ok(pathnames)
	}

	/// Resolves a key to its pool's `(subgroup, shard)`: longest-prefix
	/// cache match, fetching the record on a miss, then placement
	/// override and sharding policy.
	pub fn resolve_key(&self, key: &str) -> Result<PoolLocation> {
		let pathname = match self.pools.longest_prefix_match(key) {
			Some(pathname) => pathname,
			None => self.fetch_pool_for(key)?,
		};
		let metadata = self
			.pools
			.get(&pathname)
			.ok_or_else(|| Error::NotFound(format!("object pool {pathname} is not cached")))?;
		let subgroup = SubgroupId::new(metadata.subgroup_type_index, metadata.subgroup_index);
		let num_shards = self.runtime.num_shards(subgroup)? as u32;
		self.pools.resolve(&pathname, key, num_shards)
	}

	/// Walks the key's prefixes longest-first against the directory,
	/// caching and returning the first pool that exists.
	fn fetch_pool_for(&self, key: &str) -> Result<String> {
		let mut candidate = key;
		while let Some(at) = candidate.rfind('/') {
			candidate = &candidate[..at];
			if candidate.is_empty() {
				break;
			}
			if let Ok(record) = self.find_object_pool(candidate) {
				let pathname = record.pathname.clone();
				self.pools.insert(record);
				return Ok(pathname);
			}
		}
		Err(Error::NotFound(format!("no object pool serves key {key}")))
	}

	// ------------------------------------------------------------------
	// Object-pool-routed operations
	// ------------------------------------------------------------------

	fn data_shard(&self, location: PoolLocation) -> Result<&weir_runtime::Shard<Object<String>>> {
		self.runtime.data_shard(location.subgroup, location.shard_index)
	}

	#[instrument(level = "debug", skip(self, object), fields(key = %object.key))]
	pub fn put(&self, object: Object<String>) -> Result<VersionStamp> {
		let location = self.resolve_key(&object.key)?;
		let stamp = self.data_shard(location)?.put(object, self.node_id)?;
		if !stamp.is_valid() {
			return Err(Error::InvalidValue(format!(
				"ordered put rejected by shard {}/{}",
				location.subgroup, location.shard_index
			)));
		}
		Ok(stamp)
	}

	pub fn put_and_forget(&self, object: Object<String>) -> Result<()> {
		let location = self.resolve_key(&object.key)?;
		self.data_shard(location)?.put_and_forget(object, self.node_id)
	}

	#[instrument(level = "debug", skip(self))]
	pub fn remove(&self, key: &str) -> Result<VersionStamp> {
		let location = self.resolve_key(key)?;
		let stamp = self.data_shard(location)?.remove(key.to_string(), self.node_id)?;
		if !stamp.is_valid() {
			return Err(Error::InvalidValue(format!(
				"remove of {key} rejected: absent or already tombstoned"
			)));
		}
		Ok(stamp)
	}

	/// Hands the object to the critical data path of one member
	/// without updating shard state.
	pub fn trigger_put(&self, object: Object<String>) -> Result<()> {
		let location = self.resolve_key(&object.key)?;
		self.with_retry(|| {
			let member =
				self.pick_member(location.subgroup, location.shard_index, Some(&object.key))?;
			let shard = self.data_shard(location)?;
			shard.store_on(member)?.trigger_put(object.clone(), self.node_id);
			Ok(())
		})
	}

	pub fn get(
		&self,
		key: &str,
		version: Option<Version>,
		stable: bool,
		exact: bool,
	) -> Result<Object<String>> {
		let location = self.resolve_key(key)?;
		let key = key.to_string();
		self.with_retry(|| {
			let member = self.pick_member(location.subgroup, location.shard_index, Some(&key))?;
			let shard = self.data_shard(location)?;
			shard.store_on(member)?.get(&key, version, stable, exact)
		})
	}

	/// Ordered read: observes every put delivered before it.
	pub fn multi_get(&self, key: &str) -> Result<Object<String>> {
		let location = self.resolve_key(key)?;
		self.data_shard(location)?.multi_get(key.to_string())
	}

	pub fn get_by_time(&self, key: &str, ts_us: u64, stable: bool) -> Result<Object<String>> {
		let location = self.resolve_key(key)?;
		let key = key.to_string();
		self.with_retry(|| {
			let member = self.pick_member(location.subgroup, location.shard_index, Some(&key))?;
			let shard = self.data_shard(location)?;
			shard.store_on(member)?.get_by_time(&key, ts_us, stable)
		})
	}

	pub fn get_size(
		&self,
		key: &str,
		version: Option<Version>,
		stable: bool,
		exact: bool,
	) -> Result<u64> {
		let location = self.resolve_key(key)?;
		let key = key.to_string();
		self.with_retry(|| {
			let member = self.pick_member(location.subgroup, location.shard_index, Some(&key))?;
			let shard = self.data_shard(location)?;
			shard.store_on(member)?.get_size(&key, version, stable, exact)
		})
	}

	pub fn multi_get_size(&self, key: &str) -> Result<u64> {
		let location = self.resolve_key(key)?;
		self.data_shard(location)?.multi_get_size(key.to_string())
	}

	pub fn get_size_by_time(&self, key: &str, ts_us: u64, stable: bool) -> Result<u64> {
		let location = self.resolve_key(key)?;
		let key = key.to_string();
		self.with_retry(|| {
			let member = self.pick_member(location.subgroup, location.shard_index, Some(&key))?;
			let shard = self.data_shard(location)?;
			shard.store_on(member)?.get_size_by_time(&key, ts_us, stable)
		})
	}

	/// Lists keys under `prefix` across every shard of the pool
	/// serving it.
	pub fn list_keys(
		&self,
		prefix: &str,
		version: Option<Version>,
		stable: bool,
	) -> Result<Vec<String>> {
		self.list_keys_with(prefix, |shard, member| {
			shard.store_on(member)?.list_keys(prefix, version, stable)
		})
	}

	pub fn multi_list_keys(&self, prefix: &str) -> Result<Vec<String>> {
		let location = self.pool_location_for_prefix(prefix)?;
		let subgroup = location.subgroup;
		let mut keys = Vec::new();
		for shard_index in 0..self.runtime.num_shards(subgroup)? as u32 {
			let shard = self.runtime.data_shard(subgroup, shard_index)?;
			keys.extend(shard.multi_list_keys(prefix.to_string())?);
		}
		keys.sort();
		Ok(keys)
	}

	pub fn list_keys_by_time(&self, prefix: &str, ts_us: u64, stable: bool) -> Result<Vec<String>> {
		self.list_keys_with(prefix, |shard, member| {
			shard.store_on(member)?.list_keys_by_time(prefix, ts_us, stable)
		})
	}

	fn list_keys_with(
		&self,
		prefix: &str,
		list: impl Fn(&weir_runtime::Shard<Object<String>>, NodeId) -> Result<Vec<String>>,
	) -> Result<Vec<String>> {
		let location = self.pool_location_for_prefix(prefix)?;
		let subgroup = location.subgroup;
		let mut keys = Vec::new();
		for shard_index in 0..self.runtime.num_shards(subgroup)? as u32 {
			let listed = self.with_retry(|| {
				let member = self.pick_member(subgroup, shard_index, None)?;
				let shard = self.runtime.data_shard(subgroup, shard_index)?;
				list(shard, member)
			})?;
			keys.extend(listed);
		}
		keys.sort();
		Ok(keys)
	}

	fn pool_location_for_prefix(&self, prefix: &str) -> Result<PoolLocation> {
		// A prefix addresses the whole pool; shard 0 stands in for the
		// subgroup lookup.
		let probe = if prefix.ends_with('/') {
			format!("{prefix}_")
		} else {
			format!("{prefix}/_")
		};
		let mut location = self.resolve_key(&probe)?;
		location.shard_index = 0;
		Ok(location)
	}

	// ------------------------------------------------------------------
	// Signatures
	// ------------------------------------------------------------------

	pub fn get_signature(&self, key: &str, version: Option<Version>) -> Result<(Vec<u8>, Version)> {
		let location = self.resolve_key(key)?;
		let key = key.to_string();
		self.with_retry(|| {
			let member = self.pick_member(location.subgroup, location.shard_index, Some(&key))?;
			let shard = self.data_shard(location)?;
			shard.store_on(member)?.get_signature(&key, version)
		})
	}

	pub fn get_signature_by_version(&self, key: &str, version: Version) -> Result<(Vec<u8>, Version)> {
		let location = self.resolve_key(key)?;
		let key = key.to_string();
		self.with_retry(|| {
			let member = self.pick_member(location.subgroup, location.shard_index, Some(&key))?;
			let shard = self.data_shard(location)?;
			shard.store_on(member)?.get_signature_by_version(version)
		})
	}

	// ------------------------------------------------------------------
	// Subgroup-addressed operations
	// ------------------------------------------------------------------

	pub fn put_on(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		object: Object<String>,
	) -> Result<VersionStamp> {
		let stamp = self.runtime.data_shard(subgroup, shard_index)?.put(object, self.node_id)?;
		if !stamp.is_valid() {
			return Err(Error::InvalidValue(format!(
				"ordered put rejected by shard {subgroup}/{shard_index}"
			)));
		}
		Ok(stamp)
	}

	pub fn remove_on(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		key: &str,
	) -> Result<VersionStamp> {
		let stamp = self
			.runtime
			.data_shard(subgroup, shard_index)?
			.remove(key.to_string(), self.node_id)?;
		if !stamp.is_valid() {
			return Err(Error::InvalidValue(format!(
				"remove of {key} rejected: absent or already tombstoned"
			)));
		}
		Ok(stamp)
	}

	pub fn get_on(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		key: &str,
		version: Option<Version>,
		stable: bool,
		exact: bool,
	) -> Result<Object<String>> {
		let key = key.to_string();
		self.with_retry(|| {
			let member = self.pick_member(subgroup, shard_index, Some(&key))?;
			let shard = self.runtime.data_shard(subgroup, shard_index)?;
			shard.store_on(member)?.get(&key, version, stable, exact)
		})
	}

	pub fn multi_get_on(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		key: &str,
	) -> Result<Object<String>> {
		self.runtime.data_shard(subgroup, shard_index)?.multi_get(key.to_string())
	}

	pub fn list_keys_on(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		prefix: &str,
		version: Option<Version>,
		stable: bool,
	) -> Result<Vec<String>> {
		self.with_retry(|| {
			let member = self.pick_member(subgroup, shard_index, None)?;
			let shard = self.runtime.data_shard(subgroup, shard_index)?;
			shard.store_on(member)?.list_keys(prefix, version, stable)
		})
	}

	pub fn trigger_put_on(
		&self,
		subgroup: SubgroupId,
		shard_index: u32,
		object: Object<String>,
	) -> Result<()> {
		self.with_retry(|| {
			let member = self.pick_member(subgroup, shard_index, Some(&object.key))?;
			let shard = self.runtime.data_shard(subgroup, shard_index)?;
			shard.store_on(member)?.trigger_put(object.clone(), self.node_id);
			Ok(())
		})
	}

	// ------------------------------------------------------------------
	// Notifications
	// ------------------------------------------------------------------

	/// Registers a handler for notifications of one pool, or the
	/// catch-all when `pool_pathname` is empty. Returns whether a
	/// previous handler was replaced.
	pub fn register_notification_handler(
		&self,
		pool_pathname: &str,
		handler: impl Fn(&Notification) + Send + Sync + 'static,
	) -> bool {
		self.handlers
			.write()
			.insert(pool_pathname.to_string(), Box::new(handler))
			.is_some()
	}

	pub fn unregister_notification_handler(&self, pool_pathname: &str) -> bool {
		self.handlers.write().remove(pool_pathname).is_some()
	}

	/// Registers a handler for every notification out of one subgroup.
	pub fn register_subgroup_notification_handler(
		&self,
		subgroup: SubgroupId,
		handler: impl Fn(&Notification) + Send + Sync + 'static,
	) -> bool {
		self.subgroup_handlers.write().insert(subgroup, Box::new(handler)).is_some()
	}

	pub fn unregister_subgroup_notification_handler(&self, subgroup: SubgroupId) -> bool {
		self.subgroup_handlers.write().remove(&subgroup).is_some()
	}

	/// Fans a notification out: the pool's handler first, then the
	/// subgroup's, then the catch-all. Returns whether any handler ran.
	pub fn notify(&self, notification: Notification) -> bool {
		{
			let handlers = self.handlers.read();
			if let Some(handler) = handlers.get(&notification.pool_pathname) {
				handler(&notification);
				return true;
			}
		}
		if let Some(handler) = self.subgroup_handlers.read().get(&notification.subgroup) {
			handler(&notification);
			return true;
		}
		if let Some(handler) = self.handlers.read().get("") {
			handler(&notification);
			return true;
		}
		false
	}
}
