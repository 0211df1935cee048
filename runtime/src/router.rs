//! A plain blocking `recv_from`/`send_to` pump for the server's shared socket.
//!
//! Unlike [`crate::Io`], which multiplexes many connected sockets inside a single
//! cooperative `stakker` reactor thread, the server owns exactly one bound, unconnected
//! socket that every worker shares. That socket gets its own dedicated OS thread running
//! a tight blocking loop; there is nothing else for the thread to cooperate with.

use std::net::UdpSocket;
use std::sync::mpsc::{Receiver, Sender};

use log::{error, warn};
use utils::error::*;

/// A datagram read off the shared socket, tagged with its source address.
pub struct Inbound {
	pub from: std::net::SocketAddr,
	pub data: std::sync::Arc<[u8]>,
}

/// A datagram queued for the shared socket to send.
pub struct Outbound {
	pub to: std::net::SocketAddr,
	pub data: Box<[u8]>,
}

/// Runs forever, reading datagrams into `inbound` and draining `outbound` into the socket.
///
/// Intended to run on its own thread; returns only if the socket itself fails.
pub fn pump(socket: UdpSocket, inbound: Sender<Inbound>, outbound: Receiver<Outbound>) -> Result {
	let write_socket = socket.try_clone().map_err(|e| error!("failed to clone router socket: {e}"))?;

	std::thread::Builder::new()
		.name("sphynx-router-write".into())
		.spawn(move || {
			for out in outbound {
				if let Err(e) = write_socket.send_to(&out.data, out.to) {
					warn!("send_to {} failed: {e}", out.to);
				}
			}
		})
		.map_err(|e| error!("failed to spawn router write thread: {e}"))?;

	let mut buf = vec![0u8; 65536];

	loop {
		let (n, from) = match socket.recv_from(&mut buf) {
			Ok(pair) => pair,
			Err(e) => {
				warn!("recv_from failed: {e}");
				continue;
			}
		};

		let data: std::sync::Arc<[u8]> = buf[..n].into();

		if inbound.send(Inbound { from, data }).is_err() {
			// Receiver side (the dispatch thread) is gone; nothing left to do.
			return Ok(());
		}
	}
}
