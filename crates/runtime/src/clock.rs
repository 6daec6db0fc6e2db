// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid-logical clock in microseconds: readings follow the wall
/// clock but are forced strictly monotonic, so timestamps minted at
/// ordered delivery never retreat even when the wall clock does.
pub struct HybridClock {
	last_us: AtomicU64,
}

impl HybridClock {
	pub fn new() -> Self {
		Self {
			last_us: AtomicU64::new(0),
		}
	}

	pub fn now_us(&self) -> u64 {
		let physical = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|elapsed| elapsed.as_micros() as u64)
			.unwrap_or(0);
		let mut last = self.last_us.load(Ordering::Relaxed);
		loop {
			let next = physical.max(last + 1);
			match self.last_us.compare_exchange_weak(
				last,
				next,
				Ordering::AcqRel,
				Ordering::Relaxed,
			) {
				Ok(_) => return next,
				Err(current) => last = current,
			}
		}
	}
}

impl Default for HybridClock {
	fn default() -> Self {
		Self::new()
	}
}
