//! Protocol constants for the DBI USB file-transfer protocol.

// ============================================================================
// Device Identification
// ============================================================================

/// Nintendo Co., Ltd Vendor ID
pub const NINTENDO_VENDOR_ID: u16 = 0x057E;

/// Switch Product ID when DBI exposes its USB install endpoint
pub const SWITCH_PRODUCT_ID: u16 = 0x3000;

/// Interface carrying the bulk endpoint pair.
pub const DBI_INTERFACE: u8 = 0;

/// Alternate setting of [`DBI_INTERFACE`] carrying the bulk endpoint pair.
pub const DBI_ALT_SETTING: u8 = 0;

// ============================================================================
// Framing
// ============================================================================

/// Magic literal opening every command header.
pub const MAGIC: [u8; 4] = *b"DBI0";

/// Fixed command header size.
pub const HEADER_SIZE: usize = 16;

/// Fixed prefix of a FileRange request payload (size + offset + name length).
pub const RANGE_REQUEST_PREFIX_SIZE: usize = 16;

/// Longest file name accepted in a FileRange request.
pub const MAX_NAME_LEN: usize = 4096;

/// Largest FileRange request payload read from the peer.
pub const MAX_RANGE_REQUEST_SIZE: usize = RANGE_REQUEST_PREFIX_SIZE + MAX_NAME_LEN;

/// File data is streamed in segments of at most this many bytes.
pub const BUFFER_SEGMENT_DATA_SIZE: usize = 0x100000; // 1 MiB

// ============================================================================
// Command Types
// ============================================================================

/// Device -> Host request.
pub const CMD_TYPE_REQUEST: u32 = 0;
/// Host -> Device response.
pub const CMD_TYPE_RESPONSE: u32 = 1;
/// Acknowledgment (both directions).
pub const CMD_TYPE_ACK: u32 = 2;

// ============================================================================
// Command IDs
// ============================================================================

pub const CMD_ID_EXIT: u32 = 0;
/// Deprecated listing command. Never answered.
pub const CMD_ID_LIST_OLD: u32 = 1;
pub const CMD_ID_FILE_RANGE: u32 = 2;
pub const CMD_ID_LIST: u32 = 3;

// ============================================================================
// Timing
// ============================================================================

/// Default interval between device discovery attempts.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Default delay after a bus reset before the device is configured.
pub const DEFAULT_SETTLE_MS: u64 = 1000;

/// Default delay between whole-session retries.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Default number of whole-session attempts.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Minimum interval between transfer rate samples.
pub const RATE_SAMPLE_INTERVAL_MS: u64 = 500;
