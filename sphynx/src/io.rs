//! The abstract capability surface the transport needs from the network layer.
//!
//! Grounded on SPEC_FULL.md's redesign of `Transport : UDPEndpoint : RefObject` into
//! composition: `Transport` holds no socket; whatever drives it supplies a `DatagramIo`.

use std::net::SocketAddr;

pub trait DatagramIo {
	/// Sends each `(addr, bytes)` pair as one datagram; best-effort, no delivery guarantee.
	fn send_batch(&mut self, batch: &[(SocketAddr, Vec<u8>)]);

	/// The local monotonic clock, in milliseconds, used for all timers and timestamps.
	fn local_now_ms(&self) -> u32;
}

/// A real, already-bound UDP socket.
pub struct UdpIo {
	socket: std::net::UdpSocket,
	start: std::time::Instant,
}

impl UdpIo {
	#[must_use]
	pub fn new(socket: std::net::UdpSocket) -> Self {
		Self { socket, start: std::time::Instant::now() }
	}
}

impl DatagramIo for UdpIo {
	fn send_batch(&mut self, batch: &[(SocketAddr, Vec<u8>)]) {
		for (addr, bytes) in batch {
			if let Err(e) = self.socket.send_to(bytes, addr) {
				log::warn!("send_to {addr}: {e}");
			}
		}
	}

	fn local_now_ms(&self) -> u32 {
		self.start.elapsed().as_millis() as u32
	}
}

/// An in-memory loopback used by tests: datagrams are appended to a shared queue instead of
/// touching a real socket, and the clock is advanced explicitly.
#[cfg(any(test, feature = "test-support"))]
pub struct LoopbackIo {
	pub sent: Vec<(SocketAddr, Vec<u8>)>,
	pub now_ms: u32,
}

#[cfg(any(test, feature = "test-support"))]
impl LoopbackIo {
	#[must_use]
	pub fn new() -> Self {
		Self { sent: Vec::new(), now_ms: 0 }
	}

	pub fn advance(&mut self, delta_ms: u32) {
		self.now_ms = self.now_ms.wrapping_add(delta_ms);
	}

	pub fn take_sent(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
		std::mem::take(&mut self.sent)
	}
}

#[cfg(any(test, feature = "test-support"))]
impl Default for LoopbackIo {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(any(test, feature = "test-support"))]
impl DatagramIo for LoopbackIo {
	fn send_batch(&mut self, batch: &[(SocketAddr, Vec<u8>)]) {
		self.sent.extend_from_slice(batch);
	}

	fn local_now_ms(&self) -> u32 {
		self.now_ms
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loopback_records_sends_and_advances_clock() {
		let mut io = LoopbackIo::new();
		let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
		io.send_batch(&[(addr, b"hello".to_vec())]);
		assert_eq!(io.take_sent().len(), 1);
		assert!(io.take_sent().is_empty());

		io.advance(50);
		assert_eq!(io.local_now_ms(), 50);
	}
}
