//! Cryptographic seams. Production code depends only on these traits; concrete algorithms
//! are supplied by the caller (see `test_support` for the fixtures used by this crate's own
//! tests) so that handshake and transport logic stay independent of a specific cipher suite.

use crate::r#const::{ANSWER_BYTES, CHALLENGE_BYTES, PRIVATE_KEY_BYTES, PUBLIC_KEY_BYTES};

/// A static or ephemeral Diffie-Hellman keypair and the shared-secret derivation it supports.
pub trait KeyAgreement {
	type PublicKey: Clone + PartialEq + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;
	type PrivateKey: Clone;
	type SharedSecret: AsRef<[u8]>;

	fn generate(rng: &mut dyn rand::RngCore) -> (Self::PrivateKey, Self::PublicKey);
	fn public_from_private(private: &Self::PrivateKey) -> Self::PublicKey;
	fn agree(private: &Self::PrivateKey, public: &Self::PublicKey) -> Self::SharedSecret;
}

/// Authenticated encryption over a derived session key, as used for every post-handshake
/// datagram: detached MAC, nonce supplied by the caller (the transport derives it from the
/// wire IV field).
pub trait AuthenticatedEncryption {
	type Key: Clone;

	fn derive_key(shared_secret: &[u8], salt: &[u8]) -> Self::Key;

	/// Encrypts `plaintext` in place, appending the authentication tag, and returns it.
	fn seal(key: &Self::Key, nonce: u64, plaintext: &[u8]) -> Vec<u8>;

	/// Verifies and decrypts `ciphertext` (tag included at the end); `None` on failure.
	fn open(key: &Self::Key, nonce: u64, ciphertext: &[u8]) -> Option<Vec<u8>>;
}

/// The server's stateless cookie MAC, used to validate a returning Challenge without retaining
/// per-client state across the Hello/Cookie round trip: `cookie = MAC(server_secret, client_addr)`.
pub trait CookieMac {
	fn compute(server_secret: &[u8], client_addr: &[u8]) -> [u8; CHALLENGE_BYTES];
}

/// Sizes the handshake layer assumes regardless of which `KeyAgreement`/`AuthenticatedEncryption`
/// pair is plugged in.
pub const fn answer_plaintext_bytes() -> usize {
	ANSWER_BYTES
}

pub const fn private_key_bytes() -> usize {
	PRIVATE_KEY_BYTES
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
	//! Concrete fixtures for this crate's own tests: X25519 key agreement, ChaCha20-Poly1305
	//! AEAD, and a Blake2s-keyed cookie MAC.

	use super::{AuthenticatedEncryption, CookieMac, KeyAgreement};
	use chacha20poly1305::aead::{Aead, KeyInit, Payload};
	use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

	pub struct X25519;

	/// Wraps a 32-byte X25519 public key into the wire's 64-byte `PUBLIC_KEY_BYTES` slot
	/// (the upper half padded with zero); the handshake layer is written against a
	/// key-agreement scheme with 64-byte public keys in general, and this fixture satisfies
	/// that contract without pretending X25519 itself produces 64-byte keys.
	#[derive(Clone, PartialEq)]
	pub struct Pub64 {
		bytes: [u8; super::PUBLIC_KEY_BYTES],
	}

	impl AsRef<[u8]> for Pub64 {
		fn as_ref(&self) -> &[u8] {
			&self.bytes
		}
	}

	impl TryFrom<&[u8]> for Pub64 {
		type Error = ();

		fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
			if value.len() != super::PUBLIC_KEY_BYTES {
				return Err(());
			}
			let mut bytes = [0u8; super::PUBLIC_KEY_BYTES];
			bytes.copy_from_slice(value);
			Ok(Self { bytes })
		}
	}

	impl Pub64 {
		fn from_dalek(pk: &x25519_dalek::PublicKey) -> Self {
			let mut bytes = [0u8; super::PUBLIC_KEY_BYTES];
			bytes[..32].copy_from_slice(pk.as_bytes());
			Self { bytes }
		}

		fn to_dalek(&self) -> x25519_dalek::PublicKey {
			let raw: [u8; 32] = self.bytes[..32].try_into().expect("32 <= PUBLIC_KEY_BYTES");
			x25519_dalek::PublicKey::from(raw)
		}
	}

	impl KeyAgreement for X25519 {
		type PublicKey = Pub64;
		type PrivateKey = x25519_dalek::StaticSecret;
		type SharedSecret = x25519_dalek::SharedSecret;

		fn generate(rng: &mut dyn rand::RngCore) -> (Self::PrivateKey, Self::PublicKey) {
			let mut bytes = [0u8; 32];
			rng.fill_bytes(&mut bytes);
			let private = x25519_dalek::StaticSecret::from(bytes);
			let public = Pub64::from_dalek(&x25519_dalek::PublicKey::from(&private));
			(private, public)
		}

		fn public_from_private(private: &Self::PrivateKey) -> Self::PublicKey {
			Pub64::from_dalek(&x25519_dalek::PublicKey::from(private))
		}

		fn agree(private: &Self::PrivateKey, public: &Self::PublicKey) -> Self::SharedSecret {
			private.diffie_hellman(&public.to_dalek())
		}
	}

	pub struct ChaCha;

	impl AuthenticatedEncryption for ChaCha {
		type Key = Key;

		fn derive_key(shared_secret: &[u8], salt: &[u8]) -> Self::Key {
			use blake2::digest::{FixedOutput, Mac};
			let mut mac = blake2::Blake2sMac256::new_from_slice(salt).expect("salt within key range");
			mac.update(shared_secret);
			let out = mac.finalize_fixed();
			*Key::from_slice(&out)
		}

		fn seal(key: &Self::Key, nonce: u64, plaintext: &[u8]) -> Vec<u8> {
			let cipher = ChaCha20Poly1305::new(key);
			let mut nonce_bytes = [0u8; 12];
			nonce_bytes[4..].copy_from_slice(&nonce.to_le_bytes());
			cipher
				.encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad: &[] })
				.expect("encryption in memory cannot fail")
		}

		fn open(key: &Self::Key, nonce: u64, ciphertext: &[u8]) -> Option<Vec<u8>> {
			let cipher = ChaCha20Poly1305::new(key);
			let mut nonce_bytes = [0u8; 12];
			nonce_bytes[4..].copy_from_slice(&nonce.to_le_bytes());
			cipher.decrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: ciphertext, aad: &[] }).ok()
		}
	}

	pub struct Blake2Cookie;

	impl CookieMac for Blake2Cookie {
		fn compute(server_secret: &[u8], client_addr: &[u8]) -> [u8; super::CHALLENGE_BYTES] {
			use blake2::digest::{FixedOutput, Mac};
			let mut mac = blake2::Blake2sMac256::new_from_slice(server_secret).expect("secret within key range");
			mac.update(client_addr);
			let digest = mac.finalize_fixed();

			let mut out = [0u8; super::CHALLENGE_BYTES];
			out[..32].copy_from_slice(&digest);
			out[32..].copy_from_slice(&digest);
			out
		}
	}

	#[test]
	fn x25519_agreement_matches() {
		let mut rng = rand::rngs::OsRng;
		let (priv_a, pub_a) = X25519::generate(&mut rng);
		let (priv_b, pub_b) = X25519::generate(&mut rng);
		let secret_a = X25519::agree(&priv_a, &pub_b);
		let secret_b = X25519::agree(&priv_b, &pub_a);
		assert_eq!(secret_a.as_bytes(), secret_b.as_bytes());
	}

	#[test]
	fn chacha_seal_open_roundtrip() {
		let key = ChaCha::derive_key(b"some shared secret bytes", b"sphynx transport key");
		let ct = ChaCha::seal(&key, 7, b"hello world");
		let pt = ChaCha::open(&key, 7, &ct).unwrap();
		assert_eq!(pt, b"hello world");
	}

	#[test]
	fn chacha_open_rejects_tampering() {
		let key = ChaCha::derive_key(b"some shared secret bytes", b"sphynx transport key");
		let mut ct = ChaCha::seal(&key, 1, b"payload");
		let last = ct.len() - 1;
		ct[last] ^= 0xFF;
		assert!(ChaCha::open(&key, 1, &ct).is_none());
	}
}
