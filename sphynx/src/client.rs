//! Client-side handshake state machine and post-connect transport driver.
//!
//! Grounded on `spec.md` §4.1 ("Client state machine") and §6 (event propagation policy:
//! `OnConnect`/`OnConnectFail`/`OnDisconnectReason`).

use crate::config::ClientConfig;
use crate::crypto::{AuthenticatedEncryption, CookieMac, KeyAgreement};
use crate::handshake::{self, Answer, Challenge, Cookie, Hello, HandshakeError};
use crate::io::DatagramIo;
use crate::r#const::{
	C2S_HELLO, CHALLENGE_BYTES, CONNECT_TIMEOUT_MSEC, ERR_CLIENT_ABORTED, ERR_CLIENT_TIMEOUT, HELLO_RETRY_INITIAL_MSEC,
	PUBLIC_KEY_BYTES, S2C_ANSWER, S2C_COOKIE, S2C_ERROR,
};
use crate::transport::{Delivered, Transport};

/// Callbacks the application supplies to learn of handshake and session-lifetime events.
pub trait ClientEvents {
	fn on_connect(&mut self) {}
	fn on_connect_fail(&mut self, reason: u8) {}
	fn on_disconnect_reason(&mut self, reason: u8) {}
}

/// No-op implementation for callers that only poll `Client::state()`.
pub struct NullEvents;
impl ClientEvents for NullEvents {}

enum State<K: KeyAgreement> {
	Connecting { client_private: K::PrivateKey, client_public: K::PublicKey, first_hello_ms: u32, next_retry_ms: u32, retry_interval_ms: u32, cookie: Option<[u8; 4]> },
	Connected,
	Failed { reason: u8 },
}

/// Drives one client-side connection attempt and, once connected, its `Transport`.
pub struct Client<K: KeyAgreement, A: AuthenticatedEncryption, C> {
	config: ClientConfig,
	server_public_key: [u8; PUBLIC_KEY_BYTES],
	state: State<K>,
	pub transport: Option<Transport>,
	session_key: Option<A::Key>,
	_marker: std::marker::PhantomData<C>,
}

impl<K: KeyAgreement, A: AuthenticatedEncryption, C: CookieMac> Client<K, A, C> {
	#[must_use]
	pub fn new(config: ClientConfig, server_public_key: [u8; PUBLIC_KEY_BYTES], rng: &mut dyn rand::RngCore, now_ms: u32) -> Self {
		let (client_private, client_public) = K::generate(rng);
		Self {
			config,
			server_public_key,
			state: State::Connecting {
				client_private,
				client_public,
				first_hello_ms: now_ms,
				next_retry_ms: now_ms,
				retry_interval_ms: HELLO_RETRY_INITIAL_MSEC,
				cookie: None,
			},
			transport: None,
			session_key: None,
			_marker: std::marker::PhantomData,
		}
	}

	#[must_use]
	pub fn is_connected(&self) -> bool {
		matches!(self.state, State::Connected)
	}

	#[must_use]
	pub fn failure_reason(&self) -> Option<u8> {
		match self.state {
			State::Failed { reason } => Some(reason),
			_ => None,
		}
	}

	/// Called once per tick: retransmits the Hello on back-off, times out the attempt, and
	/// (once connected) drives the `Transport`'s own tick.
	pub fn on_tick(&mut self, now_ms: u32, io: &mut impl DatagramIo, events: &mut impl ClientEvents) {
		match &mut self.state {
			State::Connecting { first_hello_ms, next_retry_ms, retry_interval_ms, .. } => {
				if now_ms.wrapping_sub(*first_hello_ms) >= CONNECT_TIMEOUT_MSEC {
					let reason = ERR_CLIENT_TIMEOUT;
					self.state = State::Failed { reason };
					events.on_connect_fail(reason);
					return;
				}
				if now_ms.wrapping_sub(*next_retry_ms) as i32 >= 0 {
					let hello = Hello { server_public_key: self.server_public_key }.encode();
					debug_assert_eq!(hello[0], C2S_HELLO);
					io.send_batch(&[(self.config.server_addr, hello)]);
					*next_retry_ms = now_ms.wrapping_add(*retry_interval_ms);
					*retry_interval_ms = retry_interval_ms.saturating_mul(2);
				}
			}
			State::Connected => {
				if let Some(transport) = &mut self.transport {
					if let Some(body) = transport.tick(now_ms) {
						io.send_batch(&[(self.config.server_addr, body)]);
					}
				}
			}
			State::Failed { .. } => {}
		}
	}

	/// Handles one datagram from the server, dispatching on handshake stage or decrypted
	/// transport payload. Returns delivered application messages once connected.
	pub fn on_datagram(&mut self, buf: &[u8], now_ms: u32, io: &mut impl DatagramIo, events: &mut impl ClientEvents) -> Vec<Delivered> {
		match &mut self.state {
			State::Connecting { client_private, client_public, cookie, .. } => {
				let Some(&tag) = buf.first() else { return Vec::new() };
				match tag {
					S2C_COOKIE => {
						let Some(c) = Cookie::decode(buf) else { return Vec::new() };
						*cookie = Some(c.cookie);

						let mut challenge_bytes = [0u8; CHALLENGE_BYTES];
						let pub_bytes = client_public.as_ref();
						let n = pub_bytes.len().min(CHALLENGE_BYTES);
						challenge_bytes[..n].copy_from_slice(&pub_bytes[..n]);

						let challenge = Challenge { cookie: c.cookie, challenge: challenge_bytes }.encode();
						io.send_batch(&[(self.config.server_addr, challenge)]);
						Vec::new()
					}
					S2C_ANSWER => {
						let Some(answer) = Answer::decode(buf) else { return Vec::new() };
						let Some(session_key) = handshake::process_answer::<K, A>(client_private, &answer) else {
							let reason = ERR_CLIENT_ABORTED;
							self.state = State::Failed { reason };
							events.on_connect_fail(reason);
							return Vec::new();
						};

						self.session_key = Some(session_key);
						self.transport = Some(Transport::new_client(now_ms));
						self.state = State::Connected;
						events.on_connect();
						Vec::new()
					}
					S2C_ERROR => {
						let Some(err) = HandshakeError::decode(buf) else { return Vec::new() };
						self.state = State::Failed { reason: err.reason };
						events.on_connect_fail(err.reason);
						Vec::new()
					}
					_ => Vec::new(),
				}
			}
			State::Connected => {
				let Some(transport) = &mut self.transport else { return Vec::new() };
				let delivered = transport.on_datagram(buf, now_ms);
				if transport.disconnect_reason != crate::r#const::DISCO_CONNECTED {
					events.on_disconnect_reason(transport.disconnect_reason);
				}
				delivered
			}
			State::Failed { .. } => Vec::new(),
		}
	}

	/// Queues a reliable message on `stream`, once connected.
	pub fn send_reliable(&mut self, stream: u8, sop: crate::wire::Sop, payload: Vec<u8>) -> Option<u32> {
		self.transport.as_mut().map(|t| t.write_reliable(stream, sop, payload))
	}

	pub fn disconnect(&mut self, reason: u8) {
		if let Some(transport) = &mut self.transport {
			transport.write_disco(reason);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::test_support::{Blake2Cookie, ChaCha, X25519};
	use crate::io::LoopbackIo;

	fn addr() -> std::net::SocketAddr {
		"127.0.0.1:9999".parse().unwrap()
	}

	#[test]
	fn retransmits_hello_on_backoff() {
		let mut rng = rand::rngs::OsRng;
		let config = ClientConfig { server_addr: addr(), tick_interval_ms: 20 };
		let mut client: Client<X25519, ChaCha, Blake2Cookie> = Client::new(config, [1u8; PUBLIC_KEY_BYTES], &mut rng, 0);
		let mut io = LoopbackIo::new();
		let mut events = NullEvents;

		client.on_tick(0, &mut io, &mut events);
		assert_eq!(io.take_sent().len(), 1);

		client.on_tick(50, &mut io, &mut events);
		assert!(io.take_sent().is_empty());

		client.on_tick(250, &mut io, &mut events);
		assert_eq!(io.take_sent().len(), 1);
	}

	#[test]
	fn times_out_after_connect_timeout() {
		let mut rng = rand::rngs::OsRng;
		let config = ClientConfig { server_addr: addr(), tick_interval_ms: 20 };
		let mut client: Client<X25519, ChaCha, Blake2Cookie> = Client::new(config, [1u8; PUBLIC_KEY_BYTES], &mut rng, 0);
		let mut io = LoopbackIo::new();
		let mut events = NullEvents;

		client.on_tick(CONNECT_TIMEOUT_MSEC, &mut io, &mut events);
		assert_eq!(client.failure_reason(), Some(ERR_CLIENT_TIMEOUT));
	}

	#[test]
	fn full_handshake_reaches_connected() {
		use crate::addr::NetAddr;
		use crate::config::{KeyPairFile, ServerConfig};
		use crate::connexion::ConnexionId;
		use crate::server::{Shared, Worker};
		use std::sync::Arc;

		let mut rng = rand::rngs::OsRng;
		let keys = KeyPairFile { public_key: [7u8; PUBLIC_KEY_BYTES], private_key: [0u8; 32] };
		let server_public = keys.public_key;

		let shared = Arc::new(Shared::new());
		let cfg = Arc::new(ServerConfig::default());
		let mut worker: Worker<X25519, ChaCha, Blake2Cookie> = Worker::new(0, cfg, Arc::new(keys), [3u8; 32], shared);

		let config = ClientConfig { server_addr: addr(), tick_interval_ms: 20 };
		let mut client: Client<X25519, ChaCha, Blake2Cookie> = Client::new(config, server_public, &mut rng, 0);
		let mut io = LoopbackIo::new();
		let mut events = NullEvents;

		client.on_tick(0, &mut io, &mut events);
		let (_, hello) = io.take_sent().pop().unwrap();

		let from = NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), 4000);
		let cookie_reply = worker.on_hello(from, &hello).unwrap();
		client.on_datagram(&cookie_reply, 0, &mut io, &mut events);
		let (_, challenge) = io.take_sent().pop().unwrap();

		let answer_reply = worker.on_challenge(from, &challenge, 0).unwrap();
		client.on_datagram(&answer_reply, 0, &mut io, &mut events);

		assert!(client.is_connected());
		let _ = ConnexionId { worker: 0, slot: 0, generation: 0 };
	}
}
