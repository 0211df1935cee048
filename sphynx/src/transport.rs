//! Per-Connexion reliable/unreliable/fragmented transport: `spec.md` §4.2-§4.5.

use std::collections::VecDeque;

use collections::Ring;

use crate::ack::{self, StreamAck};
use crate::clock::ClockSynch;
use crate::r#const::{
	CRYPTO_OVERHEAD_BYTES, FRAG_HEADER_BYTES, INITIAL_RTT_MSEC, IOP_C2S_MTU_PROBE, IOP_C2S_TIME_PING,
	IOP_C2S_TIME_PING_BYTES, IOP_DISCO, IOP_DISCO_BYTES, IOP_S2C_MTU_SET, IOP_S2C_MTU_SET_BYTES, IOP_S2C_TIME_PONG,
	IOP_S2C_TIME_PONG_BYTES, MEDIUM_MTU, NUM_STREAMS, OUT_OF_ORDER_LIMIT, STREAM_UNORDERED,
};
use crate::flow::FlowControl;
use crate::message::{OutgoingMessage, Reassembly, RecvNode};
use crate::wire::{compress_timestamp, decode_ack_id, decompress_timestamp, encode_ack_id, reconstruct_ack_id, Hdr, Sop};

/// A message handed to the application after reassembly/ordering.
pub struct Delivered {
	pub stream: u8,
	pub payload: Vec<u8>,
}

struct Stream {
	next_send_id: u32,
	next_recv_expected_id: u32,
	got_reliable: bool,
	send_queue: VecDeque<OutgoingMessage>,
	sent_list: Vec<OutgoingMessage>,
	recv_queue: Ring<RecvNode>,
	fragment: Option<Reassembly>,
}

impl Stream {
	fn new() -> Self {
		Self {
			next_send_id: 0,
			next_recv_expected_id: 0,
			got_reliable: false,
			send_queue: VecDeque::new(),
			sent_list: Vec::new(),
			recv_queue: Ring::new(0, OUT_OF_ORDER_LIMIT),
			fragment: None,
		}
	}
}

/// Default cap on a single message's payload, derived from `MEDIUM_MTU` minus the
/// authenticated-encryption overhead; applications expecting a different path MTU should call
/// [`Transport::set_max_payload_bytes`] once MTU discovery (IOP_C2S_MTU_PROBE) completes.
const DEFAULT_MAX_PAYLOAD_BYTES: usize = MEDIUM_MTU as usize - CRYPTO_OVERHEAD_BYTES;

pub struct Transport {
	streams: [Stream; NUM_STREAMS],
	pub ts_delta: i32,
	pub rtt_ms: u32,
	pub flow: FlowControl,
	pub last_recv_msec: u32,
	pub disconnect_reason: u8,
	max_payload_bytes: usize,
	trip_samples_sum: u64,
	trip_samples_count: u32,
	is_client: bool,
	mtu_probed: bool,
	clock: ClockSynch,
}

impl Transport {
	/// Builds a server-side (responder) transport: answers pings/MTU probes but never
	/// initiates them.
	#[must_use]
	pub fn new(now_ms: u32) -> Self {
		Self {
			streams: std::array::from_fn(|_| Stream::new()),
			ts_delta: 0,
			rtt_ms: INITIAL_RTT_MSEC,
			flow: FlowControl::new(now_ms),
			last_recv_msec: now_ms,
			disconnect_reason: crate::r#const::DISCO_CONNECTED,
			max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
			trip_samples_sum: 0,
			trip_samples_count: 0,
			is_client: false,
			mtu_probed: false,
			clock: ClockSynch::new(),
		}
	}

	/// Builds a client-side transport: drives §4.6 clock-sync pings and the one-shot §4.7
	/// MTU probe once connected.
	#[must_use]
	pub fn new_client(now_ms: u32) -> Self {
		Self { is_client: true, ..Self::new(now_ms) }
	}

	#[must_use]
	pub fn clock(&self) -> &ClockSynch {
		&self.clock
	}

	fn loss_timeout_ms(&self) -> u32 {
		self.rtt_ms.max(INITIAL_RTT_MSEC) * 2
	}

	/// Bounds future `write_reliable` calls to splitting payloads larger than
	/// `max_payload_bytes` into FRAG messages, per MTU discovery's result.
	pub fn set_max_payload_bytes(&mut self, max_payload_bytes: usize) {
		self.max_payload_bytes = max_payload_bytes;
	}

	/// Enqueues a reliable message, splitting it into FRAG messages first if `payload` exceeds
	/// `max_payload_bytes` (§4.2). Returns the ACK-ID of the first message written.
	pub fn write_reliable(&mut self, stream: u8, sop: Sop, payload: Vec<u8>) -> u32 {
		if sop == Sop::Data && payload.len() > self.max_payload_bytes.saturating_sub(FRAG_HEADER_BYTES) {
			return self.write_fragmented(stream, payload);
		}
		self.write_reliable_single(stream, sop, payload)
	}

	fn write_reliable_single(&mut self, stream: u8, sop: Sop, payload: Vec<u8>) -> u32 {
		let s = &mut self.streams[stream as usize];
		let id = s.next_send_id;
		s.next_send_id = s.next_send_id.wrapping_add(1);
		let mut msg = OutgoingMessage::new(payload, sop, stream, id);
		msg.reliable = true;
		s.send_queue.push_back(msg);
		id
	}

	fn write_fragmented(&mut self, stream: u8, payload: Vec<u8>) -> u32 {
		let total = payload.len();
		let first_cap = self.max_payload_bytes.saturating_sub(FRAG_HEADER_BYTES).max(1);

		let first_len = first_cap.min(total);
		let mut first_payload = Vec::with_capacity(FRAG_HEADER_BYTES + first_len);
		first_payload.extend_from_slice(&(total as u16).to_le_bytes());
		first_payload.extend_from_slice(&payload[..first_len]);
		let first_id = self.write_reliable_single(stream, Sop::Frag, first_payload);

		let mut offset = first_len;
		while offset < total {
			let end = (offset + self.max_payload_bytes).min(total);
			self.write_reliable_single(stream, Sop::Frag, payload[offset..end].to_vec());
			offset = end;
		}

		first_id
	}

	/// Enqueues an unreliable message; it carries no ACK-ID and is never retransmitted.
	pub fn write_unreliable(&mut self, stream: u8, sop: Sop, payload: Vec<u8>) {
		let msg = OutgoingMessage::new(payload, sop, stream, 0);
		self.streams[stream as usize].send_queue.push_back(msg);
	}

	pub fn write_disco(&mut self, reason: u8) {
		self.write_unreliable(STREAM_UNORDERED, Sop::Internal, vec![IOP_DISCO, reason]);
	}

	/// Drains as much of `send_queue` as the flow-control budget allows into one datagram
	/// body (not yet encrypted), appending the trailing ACK and timestamp. Returns `None` if
	/// there's nothing to send.
	#[must_use]
	pub fn build_datagram(&mut self, now_ms: u32) -> Option<Vec<u8>> {
		let mut body = Vec::new();
		let mut budget = self.flow.bytes_available();
		let mut marked_loss = false;
		let mut last_reliable: Option<(u8, u32)> = None;

		for s in &mut self.streams {
			while let Some(mut msg) = s.send_queue.pop_front() {
				// §4.2 ACK-ID compression: omit the field when this message is the immediate
				// successor, on the same stream, of the previous reliable message written into
				// this datagram. Retransmissions always carry the ID explicitly, since the
				// receiver's state can't be inferred once a gap may have opened.
				let explicit_ack_id = msg.reliable
					&& (msg.is_retransmit || last_reliable != Some((msg.stream, msg.ack_id.wrapping_sub(1))));
				let frame = encode_frame(&msg, explicit_ack_id);

				if frame.len() as u32 > budget && !body.is_empty() {
					s.send_queue.push_front(msg);
					break;
				}
				budget = budget.saturating_sub(frame.len() as u32);

				msg.ts_firstsend = now_ms;
				msg.ts_lastsend = now_ms;
				msg.sent_bytes = frame.len() as u32;
				if msg.reliable && !marked_loss {
					msg.loss_on = true;
					marked_loss = true;
				}

				self.flow.on_send(frame.len() as u32);
				body.extend_from_slice(&frame);

				if msg.reliable {
					last_reliable = Some((msg.stream, msg.ack_id));
					s.sent_list.push(msg);
				}
			}
		}

		let ack = self.build_ack();
		if body.is_empty() && ack.is_empty() {
			return None;
		}
		body.extend_from_slice(&ack);

		body.push(Hdr::NOP);
		let ts = compress_timestamp(now_ms);
		body.extend_from_slice(&ts.to_le_bytes());
		Some(body)
	}

	/// Called once per tick (`TICK_INTERVAL_MSEC`): retransmits timed-out sent messages and,
	/// on the client side, drives clock-sync pings and the one-shot MTU probe.
	pub fn tick(&mut self, now_ms: u32) -> Option<Vec<u8>> {
		self.flow.on_tick(now_ms);
		let timeout = self.loss_timeout_ms();

		if self.is_client {
			if self.clock.should_ping(now_ms) {
				self.clock.on_ping_sent(now_ms);
				let mut ping = Vec::with_capacity(IOP_C2S_TIME_PING_BYTES);
				ping.push(IOP_C2S_TIME_PING);
				ping.extend_from_slice(&now_ms.to_le_bytes());
				self.write_unreliable(STREAM_UNORDERED, Sop::Internal, ping);
			}
			if !self.mtu_probed {
				self.mtu_probed = true;
				let pad_len = MEDIUM_MTU as usize - CRYPTO_OVERHEAD_BYTES - 1;
				let mut probe = Vec::with_capacity(1 + pad_len);
				probe.push(IOP_C2S_MTU_PROBE);
				probe.resize(1 + pad_len, 0);
				self.write_unreliable(STREAM_UNORDERED, Sop::Internal, probe);
			}
		}

		for s in &mut self.streams {
			let mut i = 0;
			while i < s.sent_list.len() {
				if now_ms.wrapping_sub(s.sent_list[i].ts_lastsend) >= timeout {
					let mut resend = s.sent_list[i].clone();
					resend.ts_lastsend = now_ms;
					resend.is_retransmit = true;
					if resend.loss_on {
						self.flow.on_loss();
					}
					s.send_queue.push_front(resend);
					s.sent_list[i].ts_lastsend = now_ms;
				}
				i += 1;
			}
		}

		self.build_datagram(now_ms)
	}

	fn build_ack(&mut self) -> Vec<u8> {
		let avg_trip = if self.trip_samples_count > 0 {
			(self.trip_samples_sum / u64::from(self.trip_samples_count)) as u16
		} else {
			0
		};
		self.trip_samples_sum = 0;
		self.trip_samples_count = 0;

		let mut dirty = Vec::new();
		for (idx, s) in self.streams.iter_mut().enumerate() {
			if s.got_reliable {
				dirty.push(StreamAck { stream: idx as u8, rollup: s.next_recv_expected_id, ranges: Vec::new() });
				s.got_reliable = false;
			}
		}

		if dirty.is_empty() {
			return Vec::new();
		}

		let mut body = Vec::new();
		let ack_body = ack::encode(avg_trip, &dirty);
		let (hdr, bhi) = Hdr::encode(ack_body.len(), false, false, Sop::Ack);
		body.push(hdr);
		if let Some(bhi) = bhi {
			body.push(bhi);
		}
		body.extend_from_slice(&ack_body);
		body
	}

	/// Processes one received, already-decrypted datagram body.
	pub fn on_datagram(&mut self, buf: &[u8], now_ms: u32) -> Vec<Delivered> {
		self.last_recv_msec = now_ms;
		let mut delivered = Vec::new();
		let mut off = 0usize;
		let mut last_reliable: Option<(u8, u32)> = None;

		while off < buf.len() {
			let hdr = buf[off];
			if hdr == Hdr::NOP {
				if let Some(ts_bytes) = buf.get(off + 1..off + 3) {
					let sample = u16::from_le_bytes(ts_bytes.try_into().expect("checked len"));
					let send_time = decompress_timestamp(now_ms, sample);
					let trip = now_ms.wrapping_sub(send_time) as i32;
					self.trip_samples_sum += u64::from(trip.max(0) as u32);
					self.trip_samples_count += 1;
				}
				break;
			}
			off += 1;

			let has_bhi = Hdr::has_bhi(hdr);
			let bhi = if has_bhi {
				let Some(&b) = buf.get(off) else { break };
				off += 1;
				Some(b)
			} else {
				None
			};
			let decoded = Hdr::decode(hdr, bhi);

			let mut stream = 0u8;
			let mut ack_id = 0u32;
			if decoded.explicit_ack_id {
				let Some((s, sample, n)) = decode_ack_id(&buf[off..]) else { break };
				off += n;
				stream = s;
				let reference = self.streams[s as usize].next_recv_expected_id;
				ack_id = reconstruct_ack_id(reference, sample);
			} else if decoded.reliable {
				// §4.2: the ID field was omitted because it's the successor of the previous
				// reliable message on the same stream within this datagram.
				let Some((s, prev_id)) = last_reliable else { break };
				stream = s;
				ack_id = prev_id.wrapping_add(1);
			}

			let Some(payload) = buf.get(off..off + decoded.data_bytes) else { break };
			off += decoded.data_bytes;

			if decoded.reliable {
				last_reliable = Some((stream, ack_id));
			}

			match decoded.sop {
				Sop::Ack => self.on_ack(payload, now_ms),
				_ if !decoded.reliable => {
					if let Some(d) = self.deliver_one(stream, decoded.sop, payload, now_ms) {
						delivered.push(d);
					}
				}
				_ => self.reliable_receive(stream, decoded.sop, ack_id, payload, now_ms, &mut delivered),
			}
		}

		delivered
	}

	fn reliable_receive(&mut self, stream: u8, sop: Sop, ack_id: u32, payload: &[u8], now_ms: u32, out: &mut Vec<Delivered>) {
		let s = &mut self.streams[stream as usize];
		let e = s.next_recv_expected_id;

		if ack_id.wrapping_sub(e) as i32 < 0 {
			s.got_reliable = true;
			return; // duplicate, already delivered
		}

		if ack_id == e {
			s.next_recv_expected_id = e.wrapping_add(1);
			s.got_reliable = true;
			drop(s);
			if let Some(d) = self.deliver_one(stream, sop, payload, now_ms) {
				out.push(d);
			}

			let s = &mut self.streams[stream as usize];
			s.recv_queue.advance_to(s.next_recv_expected_id);
			let drained = s.recv_queue.drain_contiguous();
			let next = s.next_recv_expected_id.wrapping_add(drained.len() as u32);
			s.next_recv_expected_id = next;
			for node in drained {
				if let Some(d) = self.deliver_one(stream, node.sop, &node.payload, now_ms) {
					out.push(d);
				}
			}
			return;
		}

		s.got_reliable = true;
		s.recv_queue.advance_to(e);
		s.recv_queue.insert(ack_id, RecvNode { ack_id, sop, payload: payload.to_vec() });
	}

	fn deliver_one(&mut self, stream: u8, sop: Sop, payload: &[u8], now_ms: u32) -> Option<Delivered> {
		match sop {
			Sop::Internal if payload.first() == Some(&IOP_DISCO) && payload.len() == IOP_DISCO_BYTES => {
				self.disconnect_reason = payload[1];
				None
			}
			Sop::Internal if !self.is_client && payload.first() == Some(&IOP_C2S_TIME_PING) && payload.len() == IOP_C2S_TIME_PING_BYTES => {
				let mut pong = Vec::with_capacity(IOP_S2C_TIME_PONG_BYTES);
				pong.push(IOP_S2C_TIME_PONG);
				pong.extend_from_slice(&payload[1..5]); // echoed client_send_time
				pong.extend_from_slice(&now_ms.to_le_bytes()); // server_recv_time
				pong.extend_from_slice(&now_ms.to_le_bytes()); // server_send_time
				self.write_unreliable(STREAM_UNORDERED, Sop::Internal, pong);
				None
			}
			Sop::Internal if self.is_client && payload.first() == Some(&IOP_S2C_TIME_PONG) && payload.len() == IOP_S2C_TIME_PONG_BYTES => {
				let client_send_time = u32::from_le_bytes(payload[1..5].try_into().expect("checked len"));
				let server_recv_time = u32::from_le_bytes(payload[5..9].try_into().expect("checked len"));
				let server_send_time = u32::from_le_bytes(payload[9..13].try_into().expect("checked len"));
				self.clock.on_pong(client_send_time, server_recv_time, server_send_time, now_ms);
				self.rtt_ms = self.clock.rtt_ms();
				self.ts_delta = self.clock.delta_ms();
				None
			}
			Sop::Internal if !self.is_client && payload.first() == Some(&IOP_C2S_MTU_PROBE) => {
				let mut set = Vec::with_capacity(IOP_S2C_MTU_SET_BYTES);
				set.push(IOP_S2C_MTU_SET);
				set.extend_from_slice(&(payload.len() as u16).to_le_bytes());
				self.write_unreliable(STREAM_UNORDERED, Sop::Internal, set);
				None
			}
			Sop::Internal if self.is_client && payload.first() == Some(&IOP_S2C_MTU_SET) && payload.len() == IOP_S2C_MTU_SET_BYTES => {
				let mtu = u16::from_le_bytes([payload[1], payload[2]]);
				self.max_payload_bytes = mtu as usize - CRYPTO_OVERHEAD_BYTES;
				None
			}
			Sop::Frag => self.reassemble(stream, payload),
			_ => Some(Delivered { stream, payload: payload.to_vec() }),
		}
	}

	fn reassemble(&mut self, stream: u8, payload: &[u8]) -> Option<Delivered> {
		let s = &mut self.streams[stream as usize];

		if s.fragment.is_none() {
			if payload.len() < 2 {
				return None;
			}
			let total = u16::from_le_bytes([payload[0], payload[1]]);
			if total == 0 {
				return None; // huge-transfer handoff: out of scope here
			}
			let mut r = Reassembly::new(total);
			r.buf.extend_from_slice(&payload[2..]);
			if r.is_complete() {
				s.fragment = None;
				return Some(Delivered { stream, payload: r.buf });
			}
			s.fragment = Some(r);
			return None;
		}

		let r = s.fragment.as_mut().expect("checked above");
		r.buf.extend_from_slice(payload);
		if r.is_complete() {
			let buf = std::mem::take(&mut r.buf);
			s.fragment = None;
			return Some(Delivered { stream, payload: buf });
		}
		None
	}

	fn on_ack(&mut self, payload: &[u8], now_ms: u32) {
		let Some((_avg_trip, mut off)) = ack::decode_avgtrip(payload) else { return };

		while off < payload.len() {
			let Some(&b0) = payload.get(off) else { break };
			let peek_stream = ((b0 >> 5) & 0x3) as usize;
			let reference = self.streams[peek_stream].next_send_id;
			let Some((stream, rollup, n)) = ack::decode_rollup(&payload[off..], reference) else { break };
			off += n;

			let timeout = self.loss_timeout_ms();
			let s = &mut self.streams[stream as usize];
			s.sent_list.retain(|m| {
				let acked = (rollup.wrapping_sub(m.ack_id) as i32) > 0;
				!acked
			});

			let mut cursor = rollup;
			loop {
				let Some(&b) = payload.get(off) else { break };
				if b & 0x80 != 0 {
					break; // next ROLLUP for a different stream
				}
				let Some((start, has_end, n2)) = ack::decode_range_start(&payload[off..], cursor) else { break };
				off += n2;
				let end = if has_end {
					let Some((e, n3)) = ack::decode_range_end(&payload[off..], start) else { break };
					off += n3;
					e
				} else {
					start
				};
				cursor = end;

				s.sent_list.retain(|m| !(m.ack_id.wrapping_sub(start) as i32 >= 0 && (end.wrapping_sub(m.ack_id) as i32) >= 0));
			}

			for m in &mut s.sent_list {
				if now_ms.wrapping_sub(m.ts_lastsend) >= timeout && m.loss_on {
					self.flow.on_loss();
				}
			}
		}
	}

	#[must_use]
	pub fn is_timed_out(&self, now_ms: u32, timeout_ms: u32) -> bool {
		now_ms.wrapping_sub(self.last_recv_msec) >= timeout_ms
	}
}

fn encode_frame(msg: &OutgoingMessage, explicit_ack_id: bool) -> Vec<u8> {
	let (hdr, bhi) = Hdr::encode(msg.payload.len(), explicit_ack_id, msg.reliable, msg.sop);
	let mut frame = Vec::with_capacity(2 + 3 + msg.payload.len());
	frame.push(hdr);
	if let Some(bhi) = bhi {
		frame.push(bhi);
	}
	if explicit_ack_id {
		frame.extend(encode_ack_id(msg.stream, msg.ack_id & 0xF_FFFF));
	}
	frame.extend_from_slice(&msg.payload);
	frame
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reliable_in_order_delivery() {
		let mut a = Transport::new(0);
		let mut b = Transport::new(0);

		a.write_reliable(1, Sop::Data, b"one".to_vec());
		a.write_reliable(1, Sop::Data, b"two".to_vec());
		let dgram = a.build_datagram(0).unwrap();

		let delivered = b.on_datagram(&dgram, 0);
		assert_eq!(delivered.len(), 2);
		assert_eq!(delivered[0].payload, b"one");
		assert_eq!(delivered[1].payload, b"two");
	}

	#[test]
	fn out_of_order_buffers_then_drains() {
		let mut a = Transport::new(0);
		let mut b = Transport::new(0);

		a.write_reliable(1, Sop::Data, b"first".to_vec());
		let first = a.build_datagram(0).unwrap();
		a.write_reliable(1, Sop::Data, b"second".to_vec());
		let second = a.build_datagram(0).unwrap();

		// Deliver out of order: second arrives before first.
		let d2 = b.on_datagram(&second, 0);
		assert!(d2.is_empty());

		let d1 = b.on_datagram(&first, 0);
		assert_eq!(d1.len(), 2);
		assert_eq!(d1[0].payload, b"first");
		assert_eq!(d1[1].payload, b"second");
	}

	#[test]
	fn unreliable_delivers_without_ack_id() {
		let mut a = Transport::new(0);
		let mut b = Transport::new(0);

		a.write_unreliable(0, Sop::Data, b"ping".to_vec());
		let dgram = a.build_datagram(0).unwrap();
		let delivered = b.on_datagram(&dgram, 0);
		assert_eq!(delivered.len(), 1);
		assert_eq!(delivered[0].payload, b"ping");
	}

	#[test]
	fn client_ping_is_answered_and_updates_clock() {
		let mut client = Transport::new_client(0);
		let mut server = Transport::new(0);

		// 2000ms = TIME_SYNC_FAST_MSEC, the first-ping interval while pong_count < TIME_SYNC_FAST_COUNT.
		let ping_dgram = client.tick(2000).expect("ping and mtu probe pending");
		let _ = server.on_datagram(&ping_dgram, 1000);
		let pong_dgram = server.build_datagram(1000).expect("pong and mtu set queued");

		let _ = client.on_datagram(&pong_dgram, 1050);
		assert!(client.clock().rtt_ms() <= 100);
	}

	#[test]
	fn client_mtu_probe_sets_max_payload_bytes() {
		let mut client = Transport::new_client(0);
		let mut server = Transport::new(0);

		let probe_dgram = client.tick(0).expect("mtu probe pending");
		let _ = server.on_datagram(&probe_dgram, 0);
		let set_dgram = server.build_datagram(0).expect("mtu set queued");

		let _ = client.on_datagram(&set_dgram, 0);
		assert_eq!(client.max_payload_bytes, MEDIUM_MTU as usize - CRYPTO_OVERHEAD_BYTES);
	}

	#[test]
	fn fragment_reassembly() {
		let mut t = Transport::new(0);
		let total: u16 = 6;
		let mut first = total.to_le_bytes().to_vec();
		first.extend_from_slice(b"ab");
		let second = b"cdef".to_vec();

		assert!(t.reassemble(2, &first).is_none());
		let d = t.reassemble(2, &second).unwrap();
		assert_eq!(d.payload, b"abcdef");
	}
}
