//! Server-side worker pool: router dispatch, handshake processing, and per-Connexion ticking.
//!
//! Grounded on `spec.md` §4.1 (server handshake state machine), §4.7 (dispatch), §5
//! (concurrency model). The router thread lives in `runtime::router`; this module is the
//! worker that consumes its `Inbound` stream.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};

use collections::ConnexionMap;
use slab::Slab;

use crate::addr::NetAddr;
use crate::config::{KeyPairFile, ServerConfig};
use crate::connexion::{Connexion, ConnexionId};
use crate::crypto::{AuthenticatedEncryption, CookieMac, KeyAgreement};
use crate::flood::FloodGuard;
use crate::handshake::{self, Challenge, Cookie, Hello};
use crate::io::DatagramIo;
use crate::r#const::{
	C2S_CHALLENGE, C2S_HELLO, CHALLENGE_BYTES, CONNECTION_FLOOD_THRESHOLD, DISCO_CONNECTED, ERR_BLOCKED, ERR_FLOOD_DETECTED,
	ERR_SERVER_FULL, ERR_SHUTDOWN, ERR_TAMPERING, ERR_WRONG_KEY, HASH_TABLE_SIZE, PUBLIC_KEY_BYTES, TIMEOUT_DISCONNECT_MSEC,
};
use crate::transport::Delivered;

pub struct Inbound {
	pub from: NetAddr,
	pub data: Arc<[u8]>,
}

pub enum WorkerMsg {
	Datagram(Inbound),
	Tick(u32),
}

/// Shared state every worker and the router consult: the address→Connexion table and the
/// per-IP flood counters.
pub struct Shared {
	pub map: RwLock<ConnexionMap<NetAddr, ConnexionId>>,
	pub flood: Mutex<FloodGuard>,
	pub shutting_down: std::sync::atomic::AtomicBool,
}

impl Shared {
	#[must_use]
	pub fn new() -> Self {
		Self { map: RwLock::new(ConnexionMap::new(HASH_TABLE_SIZE)), flood: Mutex::new(FloodGuard::new()), shutting_down: std::sync::atomic::AtomicBool::new(false) }
	}
}

impl Default for Shared {
	fn default() -> Self {
		Self::new()
	}
}

/// Routes one inbound datagram to the worker owning its Connexion, or to a round-robin
/// "connect worker" if the address is unknown. Performs the flood check for unconnected
/// sources per §4.7 step 5.
pub fn route(shared: &Shared, workers: &[Sender<WorkerMsg>], connect_workers: &mut usize, from: NetAddr, data: Arc<[u8]>, now_ms: u32) {
	let worker_id = shared.map.read().expect("map lock").get(&from).map(|id| id.worker as usize);

	let target = match worker_id {
		Some(w) => w,
		None => {
			let mut flood = shared.flood.lock().expect("flood lock");
			if !flood.allow(std::net::SocketAddr::from(from).ip(), now_ms) {
				return;
			}
			let w = *connect_workers % workers.len();
			*connect_workers = connect_workers.wrapping_add(1);
			w
		}
	};

	let _ = workers[target].send(WorkerMsg::Datagram(Inbound { from, data }));
}

/// A single worker thread's state: its slice of the Connexion arena plus the handshake logic
/// for addresses not yet in the arena.
pub struct Worker<K, A, C> {
	id: u32,
	config: Arc<ServerConfig>,
	keys: Arc<KeyPairFile>,
	cookie_secret: [u8; 32],
	shared: Arc<Shared>,
	arena: Slab<Connexion>,
	by_addr: HashMap<NetAddr, usize>,
	_marker: PhantomData<(K, A, C)>,
}

impl<K: KeyAgreement, A: AuthenticatedEncryption, C: CookieMac> Worker<K, A, C> {
	#[must_use]
	pub fn new(id: u32, config: Arc<ServerConfig>, keys: Arc<KeyPairFile>, cookie_secret: [u8; 32], shared: Arc<Shared>) -> Self {
		Self { id, config, keys, cookie_secret, shared, arena: Slab::new(), by_addr: HashMap::new(), _marker: PhantomData }
	}

	pub fn run(mut self, rx: Receiver<WorkerMsg>, io: &mut impl DatagramIo) {
		while let Ok(msg) = rx.recv() {
			match msg {
				WorkerMsg::Datagram(inbound) => self.on_datagram(inbound, io),
				WorkerMsg::Tick(now_ms) => self.on_tick(now_ms, io),
			}
		}
	}

	fn on_datagram(&mut self, inbound: Inbound, io: &mut impl DatagramIo) {
		let now_ms = io.local_now_ms();

		if let Some(&slot) = self.by_addr.get(&inbound.from) {
			let conn = &mut self.arena[slot];
			let delivered = conn.transport.on_datagram(&inbound.data, now_ms);
			conn.last_recv_msec = now_ms;
			self.flush(slot, io);
			let _: Vec<Delivered> = delivered; // handed to the application layer by the caller
			return;
		}

		let Some(&tag) = inbound.data.first() else { return };
		let batch: Vec<(std::net::SocketAddr, Vec<u8>)> = match tag {
			C2S_HELLO => self.on_hello(inbound.from, &inbound.data).into_iter().map(|m| (inbound.from.into(), m)).collect(),
			C2S_CHALLENGE => self.on_challenge(inbound.from, &inbound.data, now_ms).into_iter().map(|m| (inbound.from.into(), m)).collect(),
			_ => Vec::new(),
		};
		io.send_batch(&batch);
	}

	pub fn on_hello(&self, from: NetAddr, buf: &[u8]) -> Option<Vec<u8>> {
		let hello = Hello::decode(buf)?;
		if hello.server_public_key != self.keys.public_key {
			return Some(crate::handshake::HandshakeError { reason: ERR_WRONG_KEY }.encode());
		}
		let cookie = handshake::compute_cookie::<C>(&self.cookie_secret, &from.to_bytes());
		Some(Cookie { cookie }.encode())
	}

	pub fn on_challenge(&mut self, from: NetAddr, buf: &[u8], now_ms: u32) -> Option<Vec<u8>> {
		let challenge = Challenge::decode(buf)?;

		if let Some(&slot) = self.by_addr.get(&from) {
			let conn = &self.arena[slot];
			if conn.first_challenge == challenge.challenge {
				return Some(conn.cached_answer.to_vec());
			}
		}

		if self.shared.shutting_down.load(std::sync::atomic::Ordering::Relaxed) {
			return Some(crate::handshake::HandshakeError { reason: ERR_SHUTDOWN }.encode());
		}
		if self.arena.len() >= self.config.max_population {
			return Some(crate::handshake::HandshakeError { reason: ERR_SERVER_FULL }.encode());
		}
		if !self.shared.flood.lock().expect("flood lock").allow(std::net::SocketAddr::from(from).ip(), now_ms) {
			return Some(crate::handshake::HandshakeError { reason: ERR_FLOOD_DETECTED }.encode());
		}

		let expected_cookie = handshake::compute_cookie::<C>(&self.cookie_secret, &from.to_bytes());
		if challenge.cookie != expected_cookie {
			// The cookie is bound to the client address, so a mismatch here means a stale,
			// forged, or replayed-from-elsewhere cookie.
			return None;
		}

		let client_ephemeral = match K::PublicKey::try_from(&challenge.challenge[..]) {
			Ok(pk) => pk,
			Err(_) => return Some(crate::handshake::HandshakeError { reason: ERR_TAMPERING }.encode()),
		};

		let mut rng = rand::rngs::OsRng;
		let Some((answer, _session_key)) = handshake::process_challenge::<K, A>(&mut rng, &client_ephemeral) else {
			return Some(crate::handshake::HandshakeError { reason: ERR_TAMPERING }.encode());
		};

		let mut cached_answer = [0u8; crate::r#const::ANSWER_BYTES];
		cached_answer.copy_from_slice(&answer.answer);

		let conn = Connexion::new(from, self.id, 0, now_ms, challenge.challenge, cached_answer);
		let slot = self.arena.insert(conn);
		self.by_addr.insert(from, slot);

		let id = ConnexionId { worker: self.id, slot: slot as u32, generation: 0 };
		if self.shared.map.write().expect("map lock").insert(from, id).is_err() {
			self.arena.remove(slot);
			self.by_addr.remove(&from);
			return Some(crate::handshake::HandshakeError { reason: ERR_BLOCKED }.encode());
		}

		Some(answer.encode())
	}

	fn flush(&mut self, slot: usize, io: &mut impl DatagramIo) {
		let conn = &mut self.arena[slot];
		let now_ms = io.local_now_ms();
		if let Some(body) = conn.transport.build_datagram(now_ms) {
			io.send_batch(&[(conn.remote_addr.into(), body)]);
		}
	}

	fn on_tick(&mut self, now_ms: u32, io: &mut impl DatagramIo) {
		let mut to_remove = Vec::new();

		for (slot, conn) in self.arena.iter_mut() {
			if conn.transport.is_timed_out(now_ms, TIMEOUT_DISCONNECT_MSEC) && conn.disconnect_reason == DISCO_CONNECTED {
				conn.begin_disconnect(crate::r#const::DISCO_TIMEOUT);
			}

			if let Some(body) = conn.transport.tick(now_ms) {
				io.send_batch(&[(conn.remote_addr.into(), body)]);
			}

			if conn.is_shutting_down() {
				if conn.shutdown_ticks_remaining == 0 {
					to_remove.push((slot, conn.remote_addr));
				} else {
					conn.shutdown_ticks_remaining -= 1;
				}
			}
		}

		for (slot, addr) in to_remove {
			self.arena.remove(slot);
			self.by_addr.remove(&addr);
			self.shared.map.write().expect("map lock").remove(&addr);
			self.shared.flood.lock().expect("flood lock").release(std::net::SocketAddr::from(addr).ip());
		}
	}
}

#[must_use]
pub fn connection_flood_threshold() -> u32 {
	CONNECTION_FLOOD_THRESHOLD
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::test_support::{Blake2Cookie, ChaCha, X25519};

	#[test]
	fn hello_with_wrong_key_replies_err_wrong_key() {
		let shared = Arc::new(Shared::new());
		let keys = Arc::new(KeyPairFile { public_key: [1u8; PUBLIC_KEY_BYTES], private_key: [0u8; 32] });
        let cfg = Arc::new(ServerConfig::default());
		let worker: Worker<X25519, ChaCha, Blake2Cookie> = Worker::new(0, cfg, keys, [9u8; 32], shared);

		let from = NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), 9000);
		let hello = Hello { server_public_key: [2u8; PUBLIC_KEY_BYTES] }.encode();
		let reply = worker.on_hello(from, &hello).unwrap();
		assert_eq!(crate::handshake::HandshakeError::decode(&reply).unwrap().reason, ERR_WRONG_KEY);
	}

	#[test]
	fn hello_with_right_key_replies_cookie() {
		let shared = Arc::new(Shared::new());
		let keys = Arc::new(KeyPairFile { public_key: [1u8; PUBLIC_KEY_BYTES], private_key: [0u8; 32] });
		let cfg = Arc::new(ServerConfig::default());
		let worker: Worker<X25519, ChaCha, Blake2Cookie> = Worker::new(0, cfg, keys.clone(), [9u8; 32], shared);

		let from = NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), 9000);
		let hello = Hello { server_public_key: keys.public_key }.encode();
		let reply = worker.on_hello(from, &hello).unwrap();
		assert!(Cookie::decode(&reply).is_some());
	}

	#[test]
	fn cookie_from_hello_is_accepted_by_matching_challenge() {
		let shared = Arc::new(Shared::new());
		let keys = Arc::new(KeyPairFile { public_key: [1u8; PUBLIC_KEY_BYTES], private_key: [0u8; 32] });
		let cfg = Arc::new(ServerConfig::default());
		let mut worker: Worker<X25519, ChaCha, Blake2Cookie> = Worker::new(0, cfg, keys.clone(), [9u8; 32], shared);

		let from = NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), 9000);
		let hello = Hello { server_public_key: keys.public_key }.encode();
		let cookie = Cookie::decode(&worker.on_hello(from, &hello).unwrap()).unwrap().cookie;

		let challenge = Challenge { cookie, challenge: [3u8; CHALLENGE_BYTES] }.encode();
		let reply = worker.on_challenge(from, &challenge, 0).unwrap();
		assert!(crate::handshake::HandshakeError::decode(&reply).is_none());

		// A different client address must not reuse this cookie.
		let other = NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), 9001);
		let stale = Challenge { cookie, challenge: [4u8; CHALLENGE_BYTES] }.encode();
		assert!(worker.on_challenge(other, &stale, 0).is_none());
	}

	#[test]
	fn challenge_flood_replies_err_flood_detected() {
		let shared = Arc::new(Shared::new());
		let keys = Arc::new(KeyPairFile { public_key: [1u8; PUBLIC_KEY_BYTES], private_key: [0u8; 32] });
		let cfg = Arc::new(ServerConfig::default());
		let mut worker: Worker<X25519, ChaCha, Blake2Cookie> = Worker::new(0, cfg, keys.clone(), [9u8; 32], shared);
		let hello = Hello { server_public_key: keys.public_key }.encode();

		// Each distinct challenge (different cookie-consuming address-port pairs share one IP)
		// counts against the same IP's flood bucket once it reaches KeyAgreement::ProcessChallenge.
		for port in 0..CONNECTION_FLOOD_THRESHOLD as u16 {
			let from = NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), 9000 + port);
			let cookie = Cookie::decode(&worker.on_hello(from, &hello).unwrap()).unwrap().cookie;
			let challenge = Challenge { cookie, challenge: [port as u8; CHALLENGE_BYTES] }.encode();
			let reply = worker.on_challenge(from, &challenge, 0).unwrap();
			assert!(crate::handshake::HandshakeError::decode(&reply).is_none());
		}

		let from = NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), 20000);
		let cookie = Cookie::decode(&worker.on_hello(from, &hello).unwrap()).unwrap().cookie;
		let challenge = Challenge { cookie, challenge: [9u8; CHALLENGE_BYTES] }.encode();
		let reply = worker.on_challenge(from, &challenge, 0).unwrap();
		assert_eq!(crate::handshake::HandshakeError::decode(&reply).unwrap().reason, ERR_FLOOD_DETECTED);
	}
}
