//! A UDP-based secure client/server transport: authenticated key-agreement handshake, then
//! framed reliable/unreliable/ordered messaging with fragmentation, flow control, and clock
//! synchronization over the same socket.
//!
//! `spec.md` is this crate's requirements document; `DESIGN.md` records where each module's
//! behavior is grounded.

pub mod r#const;

pub mod ack;
pub mod addr;
pub mod client;
pub mod clock;
pub mod config;
pub mod connexion;
pub mod crypto;
pub mod flood;
pub mod flow;
pub mod handshake;
pub mod io;
pub mod message;
pub mod server;
pub mod transport;
pub mod wire;

use std::net::UdpSocket;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::addr::NetAddr;
use crate::config::{KeyPairFile, ServerConfig};
use crate::crypto::{AuthenticatedEncryption, CookieMac, KeyAgreement};
use crate::io::UdpIo;
use crate::server::{Shared, Worker, WorkerMsg};

/// Binds `config.bind_addr`, spawns `config.worker_count` worker threads plus one reader
/// thread, and runs until the process exits. Each worker owns its own cloned socket handle
/// for sends (`send_to` is safe to call concurrently across clones of the same UDP socket);
/// the single reader thread does the blocking `recv_from` and dispatches via `server::route`.
pub fn run_server<K, A, C>(config: ServerConfig, keys: KeyPairFile, cookie_secret: [u8; 32]) -> std::io::Result<()>
where
	K: KeyAgreement + Send + 'static,
	A: AuthenticatedEncryption + Send + 'static,
	C: CookieMac + Send + 'static,
{
	let socket = UdpSocket::bind(config.bind_addr)?;
	let shared = Arc::new(Shared::new());
	let keys = Arc::new(keys);
	let config = Arc::new(config);

	let mut senders: Vec<Sender<WorkerMsg>> = Vec::with_capacity(config.worker_count as usize);
	for id in 0..config.worker_count {
		let (tx, rx) = std::sync::mpsc::channel();
		senders.push(tx);

		let worker_socket = socket.try_clone()?;
		let worker: Worker<K, A, C> = Worker::new(id, config.clone(), keys.clone(), cookie_secret, shared.clone());
		std::thread::Builder::new()
			.name(format!("sphynx-worker-{id}"))
			.spawn(move || {
				let mut io = UdpIo::new(worker_socket);
				worker.run(rx, &mut io);
			})?;
	}

	{
		let tick_ms = config.tick_interval_ms;
		let senders = senders.clone();
		let start = std::time::Instant::now();
		std::thread::Builder::new().name("sphynx-ticker".into()).spawn(move || loop {
			std::thread::sleep(std::time::Duration::from_millis(u64::from(tick_ms)));
			let now_ms = start.elapsed().as_millis() as u32;
			for tx in &senders {
				let _ = tx.send(WorkerMsg::Tick(now_ms));
			}
		})?;
	}

	let start = std::time::Instant::now();
	let mut connect_worker = 0usize;
	let mut buf = vec![0u8; 65536];
	loop {
		let (n, from) = socket.recv_from(&mut buf)?;
		let data: Arc<[u8]> = buf[..n].into();
		let now_ms = start.elapsed().as_millis() as u32;
		server::route(&shared, &senders, &mut connect_worker, NetAddr::from(from), data, now_ms);
	}
}
