use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Endpoint identity: either a 4-byte IPv4+port or a 16-byte IPv6+port.
///
/// Equality and ordering are by `(family, address bytes, port)`, matching the way the
/// server's connection table keys on it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum NetAddr {
	V4(Ipv4Addr, u16),
	V6(Ipv6Addr, u16),
}

impl NetAddr {
	#[must_use]
	pub fn port(&self) -> u16 {
		match self {
			Self::V4(_, p) | Self::V6(_, p) => *p,
		}
	}

	#[must_use]
	pub fn is_v6(&self) -> bool {
		matches!(self, Self::V6(..))
	}

	/// Serializes the address for binding into a MAC, e.g. the server's cookie: address octets
	/// followed by the port in network byte order.
	#[must_use]
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = match self {
			Self::V4(ip, _) => ip.octets().to_vec(),
			Self::V6(ip, _) => ip.octets().to_vec(),
		};
		out.extend_from_slice(&self.port().to_be_bytes());
		out
	}
}

impl From<SocketAddr> for NetAddr {
	fn from(addr: SocketAddr) -> Self {
		match addr {
			SocketAddr::V4(a) => NetAddr::V4(*a.ip(), a.port()),
			SocketAddr::V6(a) => NetAddr::V6(*a.ip(), a.port()),
		}
	}
}

impl From<NetAddr> for SocketAddr {
	fn from(addr: NetAddr) -> Self {
		match addr {
			NetAddr::V4(ip, port) => SocketAddr::new(IpAddr::V4(ip), port),
			NetAddr::V6(ip, port) => SocketAddr::new(IpAddr::V6(ip), port),
		}
	}
}

impl std::fmt::Display for NetAddr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		SocketAddr::from(*self).fmt(f)
	}
}
