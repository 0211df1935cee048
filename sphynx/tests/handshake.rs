//! End-to-end handshake scenarios, literal values from `spec.md` §8.

use std::sync::Arc;

use sphynx::addr::NetAddr;
use sphynx::config::{KeyPairFile, ServerConfig};
use sphynx::crypto::test_support::{Blake2Cookie, ChaCha, X25519};
use sphynx::handshake::{Challenge, Cookie, Hello};
use sphynx::r#const::{CHALLENGE_BYTES, ERR_WRONG_KEY, PUBLIC_KEY_BYTES, S2C_COOKIE, S2C_ERROR};
use sphynx::server::{Shared, Worker};

fn client_addr(port: u16) -> NetAddr {
	NetAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1), port)
}

fn new_worker(server_public: [u8; PUBLIC_KEY_BYTES]) -> Worker<X25519, ChaCha, Blake2Cookie> {
	let keys = Arc::new(KeyPairFile { public_key: server_public, private_key: [0u8; 32] });
	let shared = Arc::new(Shared::new());
	let cfg = Arc::new(ServerConfig::default());
	Worker::new(0, cfg, keys, [42u8; 32], shared)
}

#[test]
fn scenario_1_hello_reply() {
	let server_public = [9u8; PUBLIC_KEY_BYTES];
	let worker = new_worker(server_public);

	let hello = Hello { server_public_key: server_public }.encode();
	assert_eq!(hello.len(), 69);
	assert_eq!(&hello[1..5], &[0x01, 0x00, 0x7D, 0xC4]);
	assert_eq!(&hello[5..], &server_public[..]);

	let reply = worker.on_hello(client_addr(9000), &hello).unwrap();
	assert_eq!(reply.len(), 5);
	assert_eq!(reply[0], S2C_COOKIE);
	assert!(Cookie::decode(&reply).is_some());
}

#[test]
fn scenario_2_wrong_key() {
	let worker = new_worker([9u8; PUBLIC_KEY_BYTES]);

	let hello = Hello { server_public_key: [0u8; PUBLIC_KEY_BYTES] }.encode();
	let reply = worker.on_hello(client_addr(9000), &hello).unwrap();

	assert_eq!(reply, vec![S2C_ERROR, ERR_WRONG_KEY]);
}

#[test]
fn scenario_3_replay_of_lost_answer() {
	let server_public = [9u8; PUBLIC_KEY_BYTES];
	let mut worker = new_worker(server_public);
	let from = client_addr(9000);

	let hello = Hello { server_public_key: server_public }.encode();
	let cookie = Cookie::decode(&worker.on_hello(from, &hello).unwrap()).unwrap().cookie;

	let challenge = Challenge { cookie, challenge: [5u8; CHALLENGE_BYTES] }.encode();
	let first_answer = worker.on_challenge(from, &challenge, 0).unwrap();
	assert_eq!(first_answer.len(), 1 + sphynx::r#const::ANSWER_BYTES);

	// Client never saw the reply and resends the identical CHALLENGE.
	let second_answer = worker.on_challenge(from, &challenge, 10).unwrap();
	assert_eq!(first_answer, second_answer);
}
