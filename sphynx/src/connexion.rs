//! Server-side per-peer session state and its stable handle.
//!
//! Grounded on `spec.md` §3 and SPEC_FULL.md's "Cyclic ownership" redesign note: the
//! `Transport : UDPEndpoint : RefObject` chain of inheritance and back-references becomes a
//! `Connexion` owned by a per-worker arena, addressed by a small `ConnexionId` instead of a
//! pointer, with no reference counting needed since the arena alone owns the value.

use crate::addr::NetAddr;
use crate::r#const::{ANSWER_BYTES, CHALLENGE_BYTES};
use crate::transport::Transport;

/// Index into a worker's `slab::Slab<Connexion>`, paired with a generation to detect reuse of
/// a freed slot (the `ConnexionMap` stores this, not a raw index, so a stale map entry that
/// loses the race with a destroy+reinsert is detectable instead of aliasing a new Connexion).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnexionId {
	pub worker: u32,
	pub slot: u32,
	pub generation: u32,
}

pub struct Connexion {
	pub remote_addr: NetAddr,
	pub worker_id: u32,
	pub generation: u32,
	pub last_recv_msec: u32,
	pub first_challenge: [u8; CHALLENGE_BYTES],
	pub cached_answer: [u8; ANSWER_BYTES],
	pub transport: Transport,
	pub disconnect_reason: u8,
	pub shutdown_ticks_remaining: u32,
}

impl Connexion {
	#[must_use]
	pub fn new(
		remote_addr: NetAddr,
		worker_id: u32,
		generation: u32,
		now_ms: u32,
		first_challenge: [u8; CHALLENGE_BYTES],
		cached_answer: [u8; ANSWER_BYTES],
	) -> Self {
		Self {
			remote_addr,
			worker_id,
			generation,
			last_recv_msec: now_ms,
			first_challenge,
			cached_answer,
			transport: Transport::new(now_ms),
			disconnect_reason: crate::r#const::DISCO_CONNECTED,
			shutdown_ticks_remaining: 0,
		}
	}

	#[must_use]
	pub fn is_shutting_down(&self) -> bool {
		self.disconnect_reason != crate::r#const::DISCO_CONNECTED
	}

	pub fn begin_disconnect(&mut self, reason: u8) {
		if self.is_shutting_down() {
			return;
		}
		self.disconnect_reason = reason;
		self.shutdown_ticks_remaining = crate::r#const::SHUTDOWN_TICK_COUNT;
		if reason != crate::r#const::DISCO_TIMEOUT {
			self.transport.write_disco(reason);
		}
	}
}
