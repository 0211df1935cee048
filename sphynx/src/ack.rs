//! ACK packet body codec: AVGTRIP, ROLLUP, and RANGE fields.
//!
//! Deltas for RANGE_START/RANGE_END are relative to a running cursor that starts at each
//! ROLLUP's reconstructed ID, exactly as described in `spec.md` §4.4.

use crate::wire::reconstruct_counter;

const ROLLUP_MARKER: u8 = 1 << 7;
const ROLLUP_ID_BITS: u32 = 21;

/// One dirty stream's acknowledgment: everything below `rollup` is acked, plus any ranges.
pub struct StreamAck {
	pub stream: u8,
	pub rollup: u32,
	pub ranges: Vec<(u32, Option<u32>)>,
}

/// Encodes the full ACK body: one AVGTRIP field followed by each stream's ROLLUP + ranges.
#[must_use]
pub fn encode(avg_trip_ms: u16, streams: &[StreamAck]) -> Vec<u8> {
	let mut out = Vec::new();
	encode_avgtrip(avg_trip_ms, &mut out);

	for s in streams {
		encode_rollup(s.stream, s.rollup, &mut out);

		let mut cursor = s.rollup;
		for &(start, end) in &s.ranges {
			encode_range_start(start.wrapping_sub(cursor), end.is_some(), &mut out);
			if let Some(end) = end {
				encode_range_end(end.wrapping_sub(start), &mut out);
				cursor = end;
			} else {
				cursor = start;
			}
		}
	}

	out
}

fn encode_avgtrip(ms: u16, out: &mut Vec<u8>) {
	let tlo = (ms & 0x7F) as u8;
	let thi = ms >> 7;

	if thi == 0 {
		out.push(tlo);
	} else {
		out.push(tlo | (1 << 7));
		out.push(thi as u8);
	}
}

fn encode_rollup(stream: u8, id21: u32, out: &mut Vec<u8>) {
	let ida = (id21 & 0x1F) as u8;
	let idb = ((id21 >> 5) & 0xFF) as u8;
	let idc = ((id21 >> 13) & 0xFF) as u8;

	out.push(ida | ((stream & 0x3) << 5) | ROLLUP_MARKER);
	out.push(idb);
	out.push(idc);
}

fn encode_range_start(delta20: u32, has_end: bool, out: &mut Vec<u8>) {
	let ida = (delta20 & 0x1F) as u8;
	let idb = ((delta20 >> 5) & 0x7F) as u8;
	let idc = ((delta20 >> 12) & 0xFF) as u8;

	if idb == 0 && idc == 0 {
		out.push(ida | (u8::from(has_end) << 6));
	} else if idc == 0 {
		out.push(ida | (u8::from(has_end) << 6) | (1 << 5));
		out.push(idb);
	} else {
		out.push(ida | (u8::from(has_end) << 6) | (1 << 5));
		out.push(idb | (1 << 7));
		out.push(idc);
	}
}

fn encode_range_end(delta22: u32, out: &mut Vec<u8>) {
	let ida = (delta22 & 0x7F) as u8;
	let idb = ((delta22 >> 7) & 0x7F) as u8;
	let idc = ((delta22 >> 14) & 0xFF) as u8;

	if idb == 0 && idc == 0 {
		out.push(ida);
	} else if idc == 0 {
		out.push(ida | (1 << 7));
		out.push(idb);
	} else {
		out.push(ida | (1 << 7));
		out.push(idb | (1 << 7));
		out.push(idc);
	}
}

/// Decodes the AVGTRIP prefix, returning `(avg_trip_ms, bytes_consumed)`.
#[must_use]
pub fn decode_avgtrip(buf: &[u8]) -> Option<(u16, usize)> {
	let b0 = *buf.first()?;
	let tlo = u16::from(b0 & 0x7F);

	if b0 & (1 << 7) == 0 {
		return Some((tlo, 1));
	}

	let thi = u16::from(*buf.get(1)?);
	Some((tlo | (thi << 7), 2))
}

/// Decodes one ROLLUP field (always 3 bytes), reconstructing the full 32-bit ID against
/// `reference` (the decoder's own last-known value for this stream).
#[must_use]
pub fn decode_rollup(buf: &[u8], reference: u32) -> Option<(u8, u32, usize)> {
	let b0 = *buf.first()?;
	if b0 & ROLLUP_MARKER == 0 {
		return None;
	}

	let stream = (b0 >> 5) & 0x3;
	let ida = u32::from(b0 & 0x1F);
	let idb = u32::from(*buf.get(1)?);
	let idc = u32::from(*buf.get(2)?);

	let sample = ida | (idb << 5) | (idc << 13);
	let bias = 1u32 << (ROLLUP_ID_BITS - 4);
	let id = reconstruct_counter(reference, sample, ROLLUP_ID_BITS, bias);

	Some((stream, id, 3))
}

/// Decodes one RANGE_START field relative to `cursor`, returning `(absolute_start, has_end, bytes_consumed)`.
#[must_use]
pub fn decode_range_start(buf: &[u8], cursor: u32) -> Option<(u32, bool, usize)> {
	let b0 = *buf.first()?;
	if b0 & ROLLUP_MARKER != 0 {
		return None; // This is actually a ROLLUP, not a RANGE.
	}

	let has_end = b0 & (1 << 6) != 0;
	let mut delta = u32::from(b0 & 0x1F);

	if b0 & (1 << 5) == 0 {
		return Some((cursor.wrapping_add(delta), has_end, 1));
	}

	let b1 = *buf.get(1)?;
	delta |= u32::from(b1 & 0x7F) << 5;

	if b1 & (1 << 7) == 0 {
		return Some((cursor.wrapping_add(delta), has_end, 2));
	}

	let b2 = *buf.get(2)?;
	delta |= u32::from(b2) << 12;

	Some((cursor.wrapping_add(delta), has_end, 3))
}

/// Decodes one RANGE_END field relative to `start`, returning `(absolute_end, bytes_consumed)`.
#[must_use]
pub fn decode_range_end(buf: &[u8], start: u32) -> Option<(u32, usize)> {
	let b0 = *buf.first()?;
	let mut delta = u32::from(b0 & 0x7F);

	if b0 & (1 << 7) == 0 {
		return Some((start.wrapping_add(delta), 1));
	}

	let b1 = *buf.get(1)?;
	delta |= u32::from(b1 & 0x7F) << 7;

	if b1 & (1 << 7) == 0 {
		return Some((start.wrapping_add(delta), 2));
	}

	let b2 = *buf.get(2)?;
	delta |= u32::from(b2) << 14;

	Some((start.wrapping_add(delta), 3))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn avgtrip_roundtrip() {
		for ms in [0u16, 100, 127, 128, 32767] {
			let mut out = Vec::new();
			encode_avgtrip(ms, &mut out);
			let (got, n) = decode_avgtrip(&out).unwrap();
			assert_eq!(got, ms);
			assert_eq!(n, out.len());
		}
	}

	#[test]
	fn rollup_roundtrip() {
		let id = 123_456u32;
		let mut out = Vec::new();
		encode_rollup(1, id, &mut out);
		let (stream, got, n) = decode_rollup(&out, id).unwrap();
		assert_eq!(stream, 1);
		assert_eq!(got, id);
		assert_eq!(n, 3);
	}

	#[test]
	fn single_id_range_roundtrip() {
		let ack = StreamAck { stream: 1, rollup: 100, ranges: vec![(105, None)] };
		let body = encode(0, std::slice::from_ref(&ack));

		let (_avg, mut off) = decode_avgtrip(&body).unwrap();
		let (stream, rollup, n) = decode_rollup(&body[off..], 0).unwrap();
		off += n;
		assert_eq!(stream, 1);
		assert_eq!(rollup, 100);

		let (start, has_end, n2) = decode_range_start(&body[off..], rollup).unwrap();
		assert_eq!(start, 105);
		assert!(!has_end);
		assert_eq!(off + n2, body.len());
	}

	#[test]
	fn range_with_end_roundtrip() {
		let ack = StreamAck { stream: 0, rollup: 50, ranges: vec![(60, Some(70))] };
		let body = encode(10, std::slice::from_ref(&ack));

		let (_avg, mut off) = decode_avgtrip(&body).unwrap();
		let (_s, rollup, n) = decode_rollup(&body[off..], 0).unwrap();
		off += n;
		let (start, has_end, n2) = decode_range_start(&body[off..], rollup).unwrap();
		off += n2;
		assert_eq!(start, 60);
		assert!(has_end);
		let (end, n3) = decode_range_end(&body[off..], start).unwrap();
		assert_eq!(end, 70);
		assert_eq!(off + n3, body.len());
	}
}
