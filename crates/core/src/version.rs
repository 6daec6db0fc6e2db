// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::fmt::{self, Debug, Display, Formatter, LowerHex};

use serde::{Deserialize, Serialize};

/// A per-shard version number minted by the group runtime at ordered
/// delivery. Versions are opaque 64-bit values that strictly increase in
/// delivery order within a shard.
///
/// Read APIs that accept "the current version" take `Option<Version>`
/// with `None` meaning the latest state, so the [`Version::INVALID`]
/// sentinel only ever appears in data (genesis `previous_version_by_key`)
/// and in error returns from the ordered path.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
	/// Reserved sentinel: no such version.
	pub const INVALID: Version = Version(u64::MAX);

	pub fn is_valid(&self) -> bool {
		*self != Self::INVALID
	}

	pub fn next(&self) -> Version {
		debug_assert!(self.is_valid());
		Version(self.0 + 1)
	}
}

impl Debug for Version {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if self.is_valid() {
			write!(f, "v0x{:x}", self.0)
		} else {
			write!(f, "v<invalid>")
		}
	}
}

impl Display for Version {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		Debug::fmt(self, f)
	}
}

impl LowerHex for Version {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		LowerHex::fmt(&self.0, f)
	}
}

impl From<u64> for Version {
	fn from(v: u64) -> Self {
		Version(v)
	}
}

/// The `(version, timestamp)` pair returned by every accepted write.
/// A rejected ordered operation carries [`Version::INVALID`] and a zero
/// timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
	pub version: Version,
	pub timestamp_us: u64,
}

impl VersionStamp {
	pub const INVALID: VersionStamp = VersionStamp {
		version: Version::INVALID,
		timestamp_us: 0,
	};

	pub fn new(version: Version, timestamp_us: u64) -> Self {
		Self {
			version,
			timestamp_us,
		}
	}

	pub fn is_valid(&self) -> bool {
		self.version.is_valid()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_ordering_and_sentinel() {
		let genesis = Version(0);
		assert!(genesis.is_valid());
		assert!(genesis.next() > genesis);
		assert!(Version::INVALID > Version(u64::MAX - 1));
		assert!(!Version::INVALID.is_valid());
	}

	#[test]
	fn test_invalid_stamp() {
		assert!(!VersionStamp::INVALID.is_valid());
		assert!(VersionStamp::new(Version(7), 1234).is_valid());
	}
}
