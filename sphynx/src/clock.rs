//! Clock synchronization: RTT and clock-delta estimation from a ping/pong exchange.
//!
//! Grounded on `spec.md` §4.6. Each pong yields one `(rtt, delta)` sample; the running
//! estimate is the average of the best (lowest-RTT) quarter of the retained samples, which
//! favors samples least distorted by queuing delay.

use crate::r#const::{MAX_TS_SAMPLES, MIN_TS_SAMPLES, TIME_SYNC_FAST_COUNT, TIME_SYNC_FAST_MSEC, TIME_SYNC_INTERVAL_MSEC};

struct Sample {
	rtt_ms: u32,
	delta_ms: i32,
}

pub struct ClockSynch {
	samples: Vec<Sample>,
	pong_count: u32,
	last_ping_ms: u32,
	rtt_ms: u32,
	delta_ms: i32,
}

impl ClockSynch {
	#[must_use]
	pub fn new() -> Self {
		Self { samples: Vec::new(), pong_count: 0, last_ping_ms: 0, rtt_ms: crate::r#const::INITIAL_RTT_MSEC, delta_ms: 0 }
	}

	/// Whether a new ping should be sent, given the time since the last one.
	#[must_use]
	pub fn should_ping(&self, now_ms: u32) -> bool {
		let elapsed = now_ms.wrapping_sub(self.last_ping_ms);
		let interval = if self.pong_count < TIME_SYNC_FAST_COUNT { TIME_SYNC_FAST_MSEC } else { TIME_SYNC_INTERVAL_MSEC };
		elapsed >= interval
	}

	pub fn on_ping_sent(&mut self, now_ms: u32) {
		self.last_ping_ms = now_ms;
	}

	/// Records one pong's two-leg timing: `client_send_ms`/`client_recv_ms` bound our side of
	/// the round trip, `server_recv_ms`/`server_send_ms` the peer's processing interval.
	/// Subtracting the peer's processing time out of the round trip isolates network delay,
	/// and `delta` is the average of each leg's one-way clock offset.
	pub fn on_pong(&mut self, client_send_ms: u32, server_recv_ms: u32, server_send_ms: u32, client_recv_ms: u32) {
		let round_trip = client_recv_ms.wrapping_sub(client_send_ms) as i32;
		let server_processing = server_send_ms.wrapping_sub(server_recv_ms) as i32;
		let rtt = (round_trip - server_processing).max(crate::r#const::MIN_RTT_MSEC as i32) as u32;

		let first_leg = server_recv_ms.wrapping_sub(client_send_ms) as i32;
		let second_leg = server_send_ms.wrapping_sub(client_recv_ms) as i32;
		let delta = (first_leg + second_leg) / 2;

		self.samples.push(Sample { rtt_ms: rtt, delta_ms: delta });
		if self.samples.len() > MAX_TS_SAMPLES {
			self.samples.remove(0);
		}
		self.pong_count += 1;

		self.recompute();
	}

	fn recompute(&mut self) {
		if self.samples.is_empty() {
			return;
		}

		let mut by_rtt: Vec<&Sample> = self.samples.iter().collect();
		by_rtt.sort_by_key(|s| s.rtt_ms);

		let keep = (by_rtt.len().div_ceil(4)).max(MIN_TS_SAMPLES).min(by_rtt.len());
		let best = &by_rtt[..keep];

		let sum_rtt: u64 = best.iter().map(|s| u64::from(s.rtt_ms)).sum();
		let sum_delta: i64 = best.iter().map(|s| i64::from(s.delta_ms)).sum();

		self.rtt_ms = (sum_rtt / best.len() as u64) as u32;
		self.delta_ms = (sum_delta / best.len() as i64) as i32;
	}

	#[must_use]
	pub fn rtt_ms(&self) -> u32 {
		self.rtt_ms
	}

	#[must_use]
	pub fn delta_ms(&self) -> i32 {
		self.delta_ms
	}

	/// Converts a local timestamp to the peer's clock.
	#[must_use]
	pub fn to_peer_clock(&self, local_ms: u32) -> u32 {
		(local_ms as i64 + i64::from(self.delta_ms)) as u32
	}
}

impl Default for ClockSynch {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn converges_on_consistent_samples() {
		let mut cs = ClockSynch::new();
		for t in (0..2000).step_by(100) {
			cs.on_ping_sent(t);
			cs.on_pong(t, t + 500, t + 500, t + 40);
		}
		assert!(cs.rtt_ms() <= 50);
		assert!((cs.delta_ms() - 480).abs() <= 20);
	}

	#[test]
	fn prefers_low_rtt_samples() {
		let mut cs = ClockSynch::new();
		// A handful of noisy high-RTT samples with a bogus delta...
		for t in (0..1000).step_by(100) {
			cs.on_ping_sent(t);
			cs.on_pong(t, t + 10_000, t + 10_000, t + 400);
		}
		// ...then a clean low-RTT one close to the true delta.
		cs.on_ping_sent(2000);
		cs.on_pong(2000, 2500, 2500, 2010);
		assert!(cs.rtt_ms() < 400);
	}
}
