pub mod bytes;
pub mod map;
pub mod ring;

pub use map::ConnexionMap;
pub use ring::Ring;
