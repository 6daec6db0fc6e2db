// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! Per-shard storage for Weir: the delta store core (a single shard's
//! key/value map plus the pending-delta buffer), the versioned log
//! adapter over it, the four store variants sharing the
//! [`ShardStore`] contract, and the persistence observer.

pub use adapter::{Snapshot, VersionedLog};
pub use delta::DeltaStoreCore;
pub use log::{DeltaLog, FileLog, LogEntry, MemoryLog, SignatureRecord};
pub use observer::{CriticalDataPathObserver, NoopObserver};
pub use signer::hash_blob;
pub use persistence::{PersistenceEvent, PersistenceObserver};
pub use signer::{ShardSigner, VerifyingKey};
pub use variant::{
	PersistentStore, ShardStore, SignatureStore, TriggerStore, VolatileStore,
};

mod adapter;
mod delta;
pub mod log;
mod observer;
mod persistence;
mod signer;
mod variant;
