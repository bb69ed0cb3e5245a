//! R2000 protocol constants.

/// Scan data packet start marker.
pub const PACKET_MAGIC: u16 = 0xa25c;

/// Header size written by the mock (including the I/Q fields).
pub const PACKET_HEADER_SIZE: usize = 76;

pub const PACKET_TYPE_A: u16 = 0x0041;
pub const PACKET_TYPE_B: u16 = 0x0042;
pub const PACKET_TYPE_C: u16 = 0x0043;

/// Distance value of a sample without echo (types A and B).
pub const NO_ECHO: u32 = 0xFFFF_FFFF;

// Command error codes
pub const ERROR_SUCCESS: i32 = 0;
pub const ERROR_UNKNOWN_ARGUMENT: i32 = 100;
pub const ERROR_INVALID_VALUE: i32 = 110;
pub const ERROR_INVALID_HANDLE: i32 = 210;
pub const ERROR_HANDLE_LIMIT: i32 = 220;

/// Handles a device hands out at once.
pub const MAX_HANDLES: usize = 4;
