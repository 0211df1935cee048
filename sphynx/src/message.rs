use crate::wire::Sop;

/// A reliable or unreliable message awaiting or having undergone first transmission.
#[derive(Clone)]
pub struct OutgoingMessage {
	pub payload: Vec<u8>,
	pub sop: Sop,
	pub stream: u8,
	pub ack_id: u32,
	pub reliable: bool,
	pub ts_firstsend: u32,
	pub ts_lastsend: u32,
	pub sent_bytes: u32,
	pub frag_count: u32,
	pub loss_on: bool,
	pub is_retransmit: bool,
}

impl OutgoingMessage {
	#[must_use]
	pub fn new(payload: Vec<u8>, sop: Sop, stream: u8, ack_id: u32) -> Self {
		Self {
			payload,
			sop,
			stream,
			ack_id,
			reliable: false,
			ts_firstsend: 0,
			ts_lastsend: 0,
			sent_bytes: 0,
			frag_count: 0,
			loss_on: false,
			is_retransmit: false,
		}
	}
}

/// A received-but-not-yet-delivered message, buffered until the preceding gap closes.
pub struct RecvNode {
	pub ack_id: u32,
	pub sop: Sop,
	pub payload: Vec<u8>,
}

/// In-progress fragment reassembly for one stream.
pub struct Reassembly {
	pub total_bytes: u16,
	pub buf: Vec<u8>,
}

impl Reassembly {
	#[must_use]
	pub fn new(total_bytes: u16) -> Self {
		Self { total_bytes, buf: Vec::with_capacity(total_bytes as usize) }
	}

	#[must_use]
	pub fn is_complete(&self) -> bool {
		self.buf.len() >= self.total_bytes as usize
	}
}
