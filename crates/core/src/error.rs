// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use crate::Version;

/// Service-wide error taxonomy.
///
/// The ordered path surfaces `InvalidValue` and `InvalidVersion` to the
/// delivering runtime, which maps them to [`crate::VersionStamp::INVALID`]
/// on the reply; the client facade turns that back into an error result.
/// Read paths return the object type's invalid sentinel for inexact
/// misses and only produce `NotFound` when the caller demanded an exact
/// version.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
	/// A validator rejected the object, or a remove targeted an
	/// absent or already-tombstoned key.
	#[error("invalid value: {0}")]
	InvalidValue(String),

	/// The previous-version check failed on an ordered put.
	#[error("invalid version: log tail {log_tail}, previous version by key {prev_by_key}")]
	InvalidVersion {
		log_tail: Version,
		prev_by_key: Version,
	},

	/// A stable read requested a version beyond both the persistence
	/// frontier and the latest delivered version.
	#[error("future version: requested {requested}, latest {latest}")]
	FutureVersion {
		requested: Version,
		latest: Version,
	},

	/// An exact versioned read targeted a version at which the key was
	/// not updated.
	#[error("not found: {0}")]
	NotFound(String),

	/// Sharding-policy misconfiguration, e.g. RANGE without a range
	/// table.
	#[error("policy error: {0}")]
	Policy(String),

	/// RPC failure reported by the group runtime; retried with a
	/// membership refresh up to a small bound before surfacing.
	#[error("transport error: {0}")]
	Transport(String),

	/// The service (or one of its queues) is shutting down.
	#[error("shutting down: {0}")]
	Shutdown(String),

	/// Encoding or decoding of an object or delta failed.
	#[error("encoding error: {0}")]
	Encoding(#[from] crate::encoding::Error),

	/// Unrecoverable condition: log corruption, poisoned delivery
	/// thread, unreachable code paths.
	#[error("fatal: {0}")]
	Fatal(String),
}

impl Error {
	/// True for the error kinds the client facade retries after a
	/// membership refresh.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::Transport(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_only_transport_retries() {
		assert!(Error::Transport("peer gone".into()).is_retryable());
		assert!(!Error::NotFound("k".into()).is_retryable());
		assert!(!Error::Shutdown("engine".into()).is_retryable());
	}
}
