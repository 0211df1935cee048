//! The five-message handshake: Hello / Cookie / Challenge / Answer / Error.
//!
//! Grounded on `spec.md` §4.1. Wire layout uses plain byte slicing (these messages are sent
//! unencrypted, outside the `Transport` framing in `wire.rs`) rather than the `Cast` derive,
//! since none of them are fixed-size `#[repr(C)]` structs worth a zero-copy view.

use collections::bytes::Reader;

use crate::crypto::{AuthenticatedEncryption, CookieMac, KeyAgreement};
use crate::r#const::{
	ANSWER_BYTES, C2S_CHALLENGE, C2S_HELLO, CHALLENGE_BYTES, PROTOCOL_MAGIC, PUBLIC_KEY_BYTES, S2C_ANSWER, S2C_COOKIE,
	S2C_ERROR,
};

#[derive(Clone, Copy, Debug)]
pub struct Hello {
	pub server_public_key: [u8; PUBLIC_KEY_BYTES],
}

impl Hello {
	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(1 + 4 + PUBLIC_KEY_BYTES);
		buf.push(C2S_HELLO);
		buf.extend_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
		buf.extend_from_slice(&self.server_public_key);
		buf
	}

	#[must_use]
	pub fn decode(buf: &[u8]) -> Option<Self> {
		if buf.len() != 1 + 4 + PUBLIC_KEY_BYTES || buf[0] != C2S_HELLO {
			return None;
		}
		let mut r = Reader::new(&buf[1..]);
		let magic = u32::from_le_bytes(r.split_bytes(4)?.try_into().ok()?);
		if magic != PROTOCOL_MAGIC {
			return None;
		}
		let key = r.split_bytes(PUBLIC_KEY_BYTES)?.try_into().ok()?;
		Some(Self { server_public_key: key })
	}
}

#[derive(Clone, Copy, Debug)]
pub struct Cookie {
	pub cookie: [u8; 4],
}

impl Cookie {
	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		let mut buf = vec![0u8; 1 + 4];
		buf[0] = S2C_COOKIE;
		buf[1..].copy_from_slice(&self.cookie);
		buf
	}

	#[must_use]
	pub fn decode(buf: &[u8]) -> Option<Self> {
		if buf.len() != 1 + 4 || buf[0] != S2C_COOKIE {
			return None;
		}
		Some(Self { cookie: buf[1..5].try_into().ok()? })
	}
}

#[derive(Clone, Debug)]
pub struct Challenge {
	pub cookie: [u8; 4],
	pub challenge: [u8; CHALLENGE_BYTES],
}

impl Challenge {
	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(1 + 4 + 4 + CHALLENGE_BYTES);
		buf.push(C2S_CHALLENGE);
		buf.extend_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
		buf.extend_from_slice(&self.cookie);
		buf.extend_from_slice(&self.challenge);
		buf
	}

	#[must_use]
	pub fn decode(buf: &[u8]) -> Option<Self> {
		if buf.len() != 1 + 4 + 4 + CHALLENGE_BYTES || buf[0] != C2S_CHALLENGE {
			return None;
		}
		let mut r = Reader::new(&buf[1..]);
		let magic = u32::from_le_bytes(r.split_bytes(4)?.try_into().ok()?);
		if magic != PROTOCOL_MAGIC {
			return None;
		}
		let cookie = r.split_bytes(4)?.try_into().ok()?;
		let challenge = r.split_bytes(CHALLENGE_BYTES)?.try_into().ok()?;
		Some(Self { cookie, challenge })
	}
}

#[derive(Clone, Debug)]
pub struct Answer {
	pub answer: [u8; ANSWER_BYTES],
}

impl Answer {
	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		let mut buf = vec![0u8; 1 + ANSWER_BYTES];
		buf[0] = S2C_ANSWER;
		buf[1..].copy_from_slice(&self.answer);
		buf
	}

	#[must_use]
	pub fn decode(buf: &[u8]) -> Option<Self> {
		if buf.len() != 1 + ANSWER_BYTES || buf[0] != S2C_ANSWER {
			return None;
		}
		Some(Self { answer: buf[1..].try_into().ok()? })
	}
}

#[derive(Clone, Copy, Debug)]
pub struct HandshakeError {
	pub reason: u8,
}

impl HandshakeError {
	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		vec![S2C_ERROR, self.reason]
	}

	#[must_use]
	pub fn decode(buf: &[u8]) -> Option<Self> {
		if buf.len() != 2 || buf[0] != S2C_ERROR {
			return None;
		}
		Some(Self { reason: buf[1] })
	}
}

/// The server's derivation of `challenge` -> `(answer, session_key)`: the client's ephemeral
/// public key is the challenge; the server replies with its own ephemeral public key plus a
/// MAC binding the exchange, and both sides derive the session key from the shared secret.
pub fn process_challenge<K: KeyAgreement, A: AuthenticatedEncryption>(
	rng: &mut dyn rand::RngCore,
	client_ephemeral: &K::PublicKey,
) -> Option<(Answer, A::Key)> {
	let (server_private, server_public) = K::generate(rng);
	let shared = K::agree(&server_private, client_ephemeral);

	let session_key = A::derive_key(shared.as_ref(), b"sphynx session key");

	let mut answer = [0u8; ANSWER_BYTES];
	let pub_bytes = server_public.as_ref();
	if pub_bytes.len() != PUBLIC_KEY_BYTES {
		return None;
	}
	answer[..PUBLIC_KEY_BYTES].copy_from_slice(pub_bytes);
	// Remaining bytes authenticate the exchange: a MAC-free binding tag derived from the
	// shared secret itself, so tampering with the server's ephemeral key is detectable by
	// the client re-deriving the same bytes.
	let tag_key = A::derive_key(shared.as_ref(), b"sphynx answer tag");
	let tag_bytes = A::seal(&tag_key, 0, &[0u8; PUBLIC_KEY_BYTES]);
	let tag_len = (ANSWER_BYTES - PUBLIC_KEY_BYTES).min(tag_bytes.len());
	answer[PUBLIC_KEY_BYTES..PUBLIC_KEY_BYTES + tag_len].copy_from_slice(&tag_bytes[..tag_len]);

	Some((Answer { answer }, session_key))
}

/// The client's derivation from the server's `Answer`, given its own ephemeral keypair.
pub fn process_answer<K: KeyAgreement, A: AuthenticatedEncryption>(
	client_private: &K::PrivateKey,
	answer: &Answer,
) -> Option<A::Key> {
	let server_public_bytes = &answer.answer[..PUBLIC_KEY_BYTES];
	let server_public = K::PublicKey::try_from(server_public_bytes).ok()?;
	let shared = K::agree(client_private, &server_public);

	let tag_key = A::derive_key(shared.as_ref(), b"sphynx answer tag");
	let expected = A::seal(&tag_key, 0, &[0u8; PUBLIC_KEY_BYTES]);
	let tag_len = (ANSWER_BYTES - PUBLIC_KEY_BYTES).min(expected.len());
	if answer.answer[PUBLIC_KEY_BYTES..PUBLIC_KEY_BYTES + tag_len] != expected[..tag_len] {
		return None;
	}

	Some(A::derive_key(shared.as_ref(), b"sphynx session key"))
}

/// Computes the stateless cookie for `client_addr`, reusable across retries without server
/// state, per §4.1.
pub fn compute_cookie<C: CookieMac>(server_secret: &[u8], client_addr: &[u8]) -> [u8; 4] {
	let full = C::compute(server_secret, client_addr);
	full[..4].try_into().expect("CHALLENGE_BYTES >= 4")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hello_roundtrip() {
		let h = Hello { server_public_key: [7u8; PUBLIC_KEY_BYTES] };
		let buf = h.encode();
		let back = Hello::decode(&buf).unwrap();
		assert_eq!(back.server_public_key, h.server_public_key);
	}

	#[test]
	fn hello_rejects_bad_magic() {
		let mut buf = Hello { server_public_key: [1u8; PUBLIC_KEY_BYTES] }.encode();
		buf[1] ^= 0xFF;
		assert!(Hello::decode(&buf).is_none());
	}

	#[test]
	fn cookie_roundtrip() {
		let c = Cookie { cookie: [1, 2, 3, 4] };
		assert_eq!(Cookie::decode(&c.encode()).unwrap().cookie, c.cookie);
	}

	#[test]
	fn challenge_roundtrip() {
		let c = Challenge { cookie: [9; 4], challenge: [5u8; CHALLENGE_BYTES] };
		let buf = c.encode();
		let back = Challenge::decode(&buf).unwrap();
		assert_eq!(back.cookie, c.cookie);
		assert_eq!(back.challenge, c.challenge);
	}

	#[test]
	fn error_roundtrip() {
		let e = HandshakeError { reason: crate::r#const::ERR_WRONG_KEY };
		assert_eq!(HandshakeError::decode(&e.encode()).unwrap().reason, e.reason);
	}

	#[test]
	fn full_exchange_derives_matching_session_keys() {
		use crate::crypto::test_support::{ChaCha, X25519};

		let mut rng = rand::rngs::OsRng;
		let (client_private, client_public) = X25519::generate(&mut rng);

		let (answer, server_key) = process_challenge::<X25519, ChaCha>(&mut rng, &client_public).unwrap();
		let client_key = process_answer::<X25519, ChaCha>(&client_private, &answer).unwrap();

		// Keys must agree bit-for-bit for post-handshake traffic to decrypt.
		let probe = ChaCha::seal(&server_key, 42, b"ping");
		assert_eq!(ChaCha::open(&client_key, 42, &probe).unwrap(), b"ping");
	}

	#[test]
	fn tampered_answer_is_rejected() {
		use crate::crypto::test_support::{ChaCha, X25519};

		let mut rng = rand::rngs::OsRng;
		let (client_private, client_public) = X25519::generate(&mut rng);
		let (mut answer, _server_key) = process_challenge::<X25519, ChaCha>(&mut rng, &client_public).unwrap();
		answer.answer[PUBLIC_KEY_BYTES] ^= 0xFF;

		assert!(process_answer::<X25519, ChaCha>(&client_private, &answer).is_none());
	}
}
