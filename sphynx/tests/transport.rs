//! End-to-end transport scenarios, from `spec.md` §8.

use sphynx::r#const::INITIAL_RTT_MSEC;
use sphynx::transport::Transport;
use sphynx::wire::Sop;

#[test]
fn scenario_4_reliable_stream_ordering_under_loss() {
	let mut sender = Transport::new(0);
	let mut receiver = Transport::new(0);

	sender.write_reliable(1, Sop::Data, vec![0xAA]);
	let first = sender.build_datagram(0).unwrap();
	sender.write_reliable(1, Sop::Data, vec![0xBB]);
	let _second = sender.build_datagram(0).unwrap(); // "lost on the wire"
	sender.write_reliable(1, Sop::Data, vec![0xCC]);
	let third = sender.build_datagram(0).unwrap();

	let mut delivered = Vec::new();
	delivered.extend(receiver.on_datagram(&first, 0));
	delivered.extend(receiver.on_datagram(&third, 0));
	assert_eq!(delivered.iter().map(|d| d.payload.clone()).collect::<Vec<_>>(), vec![vec![0xAA]]);

	// Retransmit of the dropped datagram arrives after the loss timeout. `rtt_ms` starts at
	// INITIAL_RTT_MSEC until real samples arrive, so the initial timeout is exactly double that.
	let retransmit = sender.tick(INITIAL_RTT_MSEC * 2 + 1).expect("retransmit pending");
	delivered.extend(receiver.on_datagram(&retransmit, 0));

	assert_eq!(delivered.len(), 3);
	assert_eq!(delivered[0].payload, vec![0xAA]);
	assert_eq!(delivered[1].payload, vec![0xBB]);
	assert_eq!(delivered[2].payload, vec![0xCC]);
}

#[test]
fn scenario_5_fragmented_send_reassembles_exactly() {
	let payload: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();

	let mut sender = Transport::new(0);
	sender.set_max_payload_bytes(1000);
	let mut receiver = Transport::new(0);

	sender.write_reliable(1, Sop::Data, payload.clone());

	let mut datagrams = Vec::new();
	let mut now = 0u32;
	while let Some(dgram) = sender.build_datagram(now) {
		datagrams.push(dgram);
		now += 1;
	}
	assert!(datagrams.len() >= 3, "expected at least 3 FRAG messages, got {}", datagrams.len());

	let mut delivered = Vec::new();
	for dgram in &datagrams {
		delivered.extend(receiver.on_datagram(dgram, now));
	}

	assert_eq!(delivered.len(), 1);
	assert_eq!(delivered[0].payload, payload);
}

#[test]
fn scenario_6_clock_synch_converges_within_tolerance() {
	use sphynx::clock::ClockSynch;

	let true_delta: i32 = 250;
	let mut clock = ClockSynch::new();
	let mut local_ms: u32 = 0;

	let jitter = [40u32, 80, 55, 62, 48, 71, 66, 59, 44, 77, 53, 68, 61, 49, 73, 58, 64, 46, 70, 51];
	for rtt in jitter {
		let ping_send = local_ms;
		let half = rtt / 2;
		let peer_ms = (local_ms as i32 + true_delta + half as i32) as u32;
		local_ms += rtt;
		clock.on_pong(ping_send, peer_ms, peer_ms, local_ms);
	}

	assert!((clock.delta_ms() - true_delta).abs() <= 5, "delta {} not within 5ms of {}", clock.delta_ms(), true_delta);
}
