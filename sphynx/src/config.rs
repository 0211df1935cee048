//! Runtime configuration and the persisted key-pair file.
//!
//! Grounded on `spec.md` §6 ("Persisted state") and SPEC_FULL.md's ambient-config addition;
//! shaped like the teacher's plain `std::fs`-based bring-up (no config-file parser, since
//! none is named by the spec).

use std::net::SocketAddr;
use std::path::Path;

use utils::error::Ext;

use crate::r#const::{PRIVATE_KEY_BYTES, PUBLIC_KEY_BYTES};

pub struct ServerConfig {
	pub bind_addr: SocketAddr,
	pub worker_count: u32,
	pub tick_interval_ms: u32,
	pub max_population: usize,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			bind_addr: "0.0.0.0:0".parse().expect("valid literal"),
			worker_count: 1,
			tick_interval_ms: crate::r#const::TICK_INTERVAL_MSEC,
			max_population: crate::r#const::HASH_TABLE_SIZE / 2,
		}
	}
}

pub struct ClientConfig {
	pub server_addr: SocketAddr,
	pub tick_interval_ms: u32,
}

/// A 64-byte public key paired with its 32-byte private half, persisted bit-opaquely.
pub struct KeyPairFile {
	pub public_key: [u8; PUBLIC_KEY_BYTES],
	pub private_key: [u8; PRIVATE_KEY_BYTES],
}

impl KeyPairFile {
	/// Loads the key pair from `path`, or generates and saves a new one if absent.
	pub fn load_or_create(path: &Path, rng: &mut dyn rand::RngCore) -> Option<Self> {
		match std::fs::read(path) {
			Ok(bytes) => Self::from_bytes(&bytes).ok_or(|e| log::error!("parsing key-pair file {path:?}: {e}")),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				let mut public_key = [0u8; PUBLIC_KEY_BYTES];
				let mut private_key = [0u8; PRIVATE_KEY_BYTES];
				rng.fill_bytes(&mut public_key);
				rng.fill_bytes(&mut private_key);
				let pair = Self { public_key, private_key };
				pair.save(path).ok_or(|e| log::error!("saving key-pair file {path:?}: {e}"))?;
				Some(pair)
			}
			Err(e) => {
				log::error!("reading key-pair file {path:?}: {e}");
				None
			}
		}
	}

	fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
		if bytes.len() != PUBLIC_KEY_BYTES + PRIVATE_KEY_BYTES {
			return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "wrong key-pair file length"));
		}
		let mut public_key = [0u8; PUBLIC_KEY_BYTES];
		let mut private_key = [0u8; PRIVATE_KEY_BYTES];
		public_key.copy_from_slice(&bytes[..PUBLIC_KEY_BYTES]);
		private_key.copy_from_slice(&bytes[PUBLIC_KEY_BYTES..]);
		Ok(Self { public_key, private_key })
	}

	pub fn save(&self, path: &Path) -> std::io::Result<()> {
		let mut bytes = Vec::with_capacity(PUBLIC_KEY_BYTES + PRIVATE_KEY_BYTES);
		bytes.extend_from_slice(&self.public_key);
		bytes.extend_from_slice(&self.private_key);
		std::fs::write(path, bytes)
	}

	#[must_use]
	pub fn export_public_hex(&self) -> String {
		self.public_key.iter().map(|b| format!("{b:02x}")).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn creates_then_reloads_identical_keys() {
		let dir = std::env::temp_dir().join(format!("sphynx-keytest-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("server.key");
		let _ = std::fs::remove_file(&path);

		let mut rng = rand::rngs::OsRng;
		let a = KeyPairFile::load_or_create(&path, &mut rng).unwrap();
		let b = KeyPairFile::load_or_create(&path, &mut rng).unwrap();

		assert_eq!(a.public_key, b.public_key);
		assert_eq!(a.private_key, b.private_key);

		std::fs::remove_file(&path).ok();
	}

	#[test]
	fn export_public_hex_has_expected_length() {
		let kp = KeyPairFile { public_key: [0xAB; PUBLIC_KEY_BYTES], private_key: [0u8; PRIVATE_KEY_BYTES] };
		assert_eq!(kp.export_public_hex().len(), PUBLIC_KEY_BYTES * 2);
	}
}
