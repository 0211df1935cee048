//! Wire constants, named exactly as the protocol names them.

pub const PROTOCOL_MAGIC: u32 = 0xC47D_0001;

pub const PUBLIC_KEY_BYTES: usize = 64;
pub const PRIVATE_KEY_BYTES: usize = 32;
pub const CHALLENGE_BYTES: usize = 64;
pub const ANSWER_BYTES: usize = 128;

// Handshake message tags.
pub const C2S_HELLO: u8 = 85;
pub const S2C_COOKIE: u8 = 24;
pub const C2S_CHALLENGE: u8 = 9;
pub const S2C_ANSWER: u8 = 108;
pub const S2C_ERROR: u8 = 162;

// Handshake error codes (wire).
pub const ERR_WRONG_KEY: u8 = 0x7F;
pub const ERR_SERVER_FULL: u8 = 0xA6;
pub const ERR_FLOOD_DETECTED: u8 = 0x40;
pub const ERR_TAMPERING: u8 = 0xCC;
pub const ERR_SHUTDOWN: u8 = 0x3A;
pub const ERR_BLOCKED: u8 = 0xB7;
pub const ERR_SERVER_ERROR: u8 = 0x1F;

// Client-internal errors; never transmitted.
pub const ERR_CLIENT_TIMEOUT: u8 = 0xE0;
pub const ERR_CLIENT_ABORTED: u8 = 0xE1;

// Internal opcodes (first payload byte of an INTERNAL message).
pub const IOP_C2S_MTU_PROBE: u8 = 0;
pub const IOP_S2C_MTU_SET: u8 = 0;
pub const IOP_C2S_TIME_PING: u8 = 1;
pub const IOP_S2C_TIME_PONG: u8 = 1;
pub const IOP_FILE_PART: u8 = 2;
pub const IOP_DISCO: u8 = 3;

pub const IOP_S2C_MTU_SET_BYTES: usize = 3;
pub const IOP_C2S_TIME_PING_BYTES: usize = 5;
pub const IOP_S2C_TIME_PONG_BYTES: usize = 13;
pub const IOP_DISCO_BYTES: usize = 2;

// MTU discovery.
pub const MINIMUM_MTU: u16 = 576;
pub const MEDIUM_MTU: u16 = 1400;
pub const MAXIMUM_MTU: u16 = 1500;

/// Overhead added by the authenticated-encryption layer: MAC(8) + IV(3).
pub const CRYPTO_OVERHEAD_BYTES: usize = 11;

// Streams.
pub const STREAM_UNORDERED: u8 = 0;
pub const NUM_STREAMS: usize = 4;

// Framing.
pub const MAX_ACK_ID_BYTES: usize = 3;
pub const ACK_ID_BITS: u32 = 20;
pub const FRAG_HEADER_BYTES: usize = 2;
pub const FRAG_THRESHOLD: usize = 32;

// Timers (milliseconds).
pub const TICK_INTERVAL_MSEC: u32 = 20;
pub const INITIAL_RTT_MSEC: u32 = 1500;
pub const MIN_RTT_MSEC: u32 = 2;
pub const TIMEOUT_DISCONNECT_MSEC: u32 = 15_000;
pub const CONNECT_TIMEOUT_MSEC: u32 = 6_000;
pub const SHUTDOWN_TICK_COUNT: u32 = 3;
pub const HELLO_RETRY_INITIAL_MSEC: u32 = 200;

// Out-of-order buffering.
pub const OUT_OF_ORDER_LIMIT: usize = 4096;

// Timestamp compression.
pub const TS_BITS: u32 = 14;
pub const TS_COMPRESS_FUTURE_TOLERANCE_MSEC: u32 = 1000;

// Clock synchronization.
pub const MAX_TS_SAMPLES: usize = 16;
pub const MIN_TS_SAMPLES: usize = 1;
pub const TIME_SYNC_FAST_MSEC: u32 = 2000;
pub const TIME_SYNC_FAST_COUNT: u32 = 20;
pub const TIME_SYNC_INTERVAL_MSEC: u32 = 10_000;
pub const SILENCE_LIMIT_MSEC: u32 = 4357;

// Flow control.
pub const MIN_RATE_LIMIT_BYTES_PER_SEC: u32 = 100_000;
pub const EPOCH_INTERVAL_MSEC: u32 = 500;

// Server.
pub const CONNECTION_FLOOD_THRESHOLD: u32 = 10;
pub const HASH_TABLE_SIZE: usize = 32768;

// Disconnect reasons (wire byte).
pub const DISCO_CONNECTED: u8 = 0x00;
pub const DISCO_USER_EXIT: u8 = 0xFB;
pub const DISCO_BROKEN_PIPE: u8 = 0xFC;
pub const DISCO_TAMPERING: u8 = 0xFD;
pub const DISCO_TIMEOUT: u8 = 0xFE;
pub const DISCO_SILENT: u8 = 0xFF;
