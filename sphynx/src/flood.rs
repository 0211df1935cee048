//! Per-source-address connect-rate limiting for the server's unconnected listen socket.
//!
//! Grounded on the original `sphynx::Map`'s hashed-address bucket design (see DESIGN.md);
//! here it's a plain table since the flood guard only ever needs a counter, not a connection.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::r#const::CONNECTION_FLOOD_THRESHOLD;

struct Bucket {
	count: u32,
	window_start_ms: u32,
}

const WINDOW_MSEC: u32 = 1000;

pub struct FloodGuard {
	buckets: HashMap<IpAddr, Bucket>,
}

impl FloodGuard {
	#[must_use]
	pub fn new() -> Self {
		Self { buckets: HashMap::new() }
	}

	/// Registers one connect attempt from `addr`; returns `false` once the per-second
	/// threshold is exceeded, in which case the caller must drop the Hello silently.
	pub fn allow(&mut self, addr: IpAddr, now_ms: u32) -> bool {
		let bucket = self.buckets.entry(addr).or_insert(Bucket { count: 0, window_start_ms: now_ms });

		if now_ms.wrapping_sub(bucket.window_start_ms) >= WINDOW_MSEC {
			bucket.count = 0;
			bucket.window_start_ms = now_ms;
		}

		bucket.count += 1;
		bucket.count <= CONNECTION_FLOOD_THRESHOLD
	}

	/// Drops stale buckets; call occasionally (e.g. once per tick) to bound memory use.
	pub fn sweep(&mut self, now_ms: u32) {
		self.buckets.retain(|_, b| now_ms.wrapping_sub(b.window_start_ms) < WINDOW_MSEC * 4);
	}

	/// Releases one connect attempt counted against `addr`, called when the Connexion it led
	/// to is destroyed, so a closed-then-reopened connection doesn't count twice against the
	/// window.
	pub fn release(&mut self, addr: IpAddr) {
		if let Some(bucket) = self.buckets.get_mut(&addr) {
			bucket.count = bucket.count.saturating_sub(1);
		}
	}
}

impl Default for FloodGuard {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allows_up_to_threshold() {
		let mut fg = FloodGuard::new();
		let addr: IpAddr = "127.0.0.1".parse().unwrap();
		for _ in 0..CONNECTION_FLOOD_THRESHOLD {
			assert!(fg.allow(addr, 0));
		}
		assert!(!fg.allow(addr, 0));
	}

	#[test]
	fn resets_after_window() {
		let mut fg = FloodGuard::new();
		let addr: IpAddr = "127.0.0.1".parse().unwrap();
		for _ in 0..CONNECTION_FLOOD_THRESHOLD {
			fg.allow(addr, 0);
		}
		assert!(!fg.allow(addr, 0));
		assert!(fg.allow(addr, WINDOW_MSEC + 1));
	}

	#[test]
	fn tracks_addresses_independently() {
		let mut fg = FloodGuard::new();
		let a: IpAddr = "127.0.0.1".parse().unwrap();
		let b: IpAddr = "127.0.0.2".parse().unwrap();
		for _ in 0..CONNECTION_FLOOD_THRESHOLD {
			assert!(fg.allow(a, 0));
		}
		assert!(fg.allow(b, 0));
	}

	#[test]
	fn release_frees_up_room_in_the_same_window() {
		let mut fg = FloodGuard::new();
		let addr: IpAddr = "127.0.0.1".parse().unwrap();
		for _ in 0..CONNECTION_FLOOD_THRESHOLD {
			assert!(fg.allow(addr, 0));
		}
		assert!(!fg.allow(addr, 0));

		fg.release(addr);
		assert!(fg.allow(addr, 0));
	}
}
