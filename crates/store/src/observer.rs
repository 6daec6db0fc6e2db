// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::Arc;

use weir_core::{NodeId, ShardRef, StoreObject};

/// The critical-data-path hook invoked from every store variant inside
/// the ordered-delivery thread, on every accepted mutation and on every
/// trigger put.
///
/// Implementations must be quick and side-effect-free beyond posting
/// work off the critical path: the delivery thread is the shard's only
/// mutation path. The value handle is shared: the observer clones the
/// `Arc`, never the object.
pub trait CriticalDataPathObserver<O: StoreObject>: Send + Sync {
	fn observe(
		&self,
		shard: ShardRef,
		sender: NodeId,
		key: &O::Key,
		value: &Arc<O>,
		is_trigger: bool,
	);
}

/// Observer that does nothing, for stores wired without a data path.
pub struct NoopObserver;

impl<O: StoreObject> CriticalDataPathObserver<O> for NoopObserver {
	fn observe(&self, _: ShardRef, _: NodeId, _: &O::Key, _: &Arc<O>, _: bool) {}
}
