//! # rmstore Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! DB_HEADER_SIZE (40 bytes)
//!       │
//!       ├─> RS0_SIGNATURE .. RS7_FREE_SIZE (field offsets, must tile 0..40)
//!       │
//!       └─> first block offset (blocks start right after the header)
//!
//! BLOCK_HEADER_SIZE (8 bytes)
//!       │
//!       ├─> BLOCK_ALIGNMENT (payloads are padded to the same unit)
//!       │
//!       └─> COMPACT_BUFFER_SIZE (must be a multiple so moved blocks stay aligned)
//!
//! NOTIFICATION_QUEUE_SIZE (10)
//!       │
//!       └─> a receiver with more than this many unacknowledged events
//!           blocks senders for NOTIFICATION_TIMEOUT_MS, at most
//!           NOTIFICATION_ATTEMPTS times
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. Header field offsets are contiguous and end at `DB_HEADER_SIZE`
//! 2. `DB_HEADER_SIZE` is a multiple of `BLOCK_ALIGNMENT`
//! 3. `COMPACT_BUFFER_SIZE` is a multiple of `BLOCK_ALIGNMENT`

// ============================================================================
// FILE LAYOUT CONSTANTS
// Offsets into the 40-byte store header. All fields are big-endian.
// ============================================================================

/// Store signature, 8 bytes.
pub const RS0_SIGNATURE: usize = 0;

/// Access mode flags, 4 bytes.
pub const RS1_AUTHMODE: usize = 8;

/// Next record ID to hand out, 4 bytes.
pub const RS2_NEXT_ID: usize = 12;

/// Number of live records, 4 bytes.
pub const RS3_NUM_LIVE: usize = 16;

/// Store version, 4 bytes.
pub const RS4_VERSION: usize = 20;

/// Last modification time in epoch milliseconds, 8 bytes.
pub const RS5_LAST_MODIFIED: usize = 24;

/// Bytes occupied by all blocks, 4 bytes.
pub const RS6_DATA_SIZE: usize = 32;

/// Bytes occupied by free blocks, 4 bytes.
pub const RS7_FREE_SIZE: usize = 36;

/// Total size of the store header.
pub const DB_HEADER_SIZE: usize = 40;

/// Signature written at offset 0 of every store file.
pub const DB_SIGNATURE: &[u8; 8] = b"midp-rms";

/// Size of the per-block header: record ID plus data length.
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Payloads are padded to this many bytes.
pub const BLOCK_ALIGNMENT: usize = BLOCK_HEADER_SIZE;

/// Record ID sentinel marking a free block.
pub const FREE_BLOCK_ID: i32 = -1;

/// First record ID assigned in a fresh store.
pub const FIRST_RECORD_ID: i32 = 1;

const _: () = assert!(RS1_AUTHMODE == RS0_SIGNATURE + DB_SIGNATURE.len());
const _: () = assert!(RS2_NEXT_ID == RS1_AUTHMODE + 4);
const _: () = assert!(RS3_NUM_LIVE == RS2_NEXT_ID + 4);
const _: () = assert!(RS4_VERSION == RS3_NUM_LIVE + 4);
const _: () = assert!(RS5_LAST_MODIFIED == RS4_VERSION + 4);
const _: () = assert!(RS6_DATA_SIZE == RS5_LAST_MODIFIED + 8);
const _: () = assert!(RS7_FREE_SIZE == RS6_DATA_SIZE + 4);
const _: () = assert!(DB_HEADER_SIZE == RS7_FREE_SIZE + 4);

const _: () = assert!(
    DB_HEADER_SIZE % BLOCK_ALIGNMENT == 0,
    "blocks must start aligned after the store header"
);

// ============================================================================
// ENGINE CONSTANTS
// ============================================================================

/// Size of the buffer used to shift live blocks during compaction.
pub const COMPACT_BUFFER_SIZE: usize = 1024;

const _: () = assert!(
    COMPACT_BUFFER_SIZE % BLOCK_ALIGNMENT == 0,
    "COMPACT_BUFFER_SIZE must keep moved blocks aligned"
);

/// Largest record payload accepted, so block sizes stay within `i32`.
pub const MAX_RECORD_SIZE: usize = i32::MAX as usize - 2 * BLOCK_HEADER_SIZE;

/// Initial capacity of the record offset cache.
pub const INITIAL_OFFSET_CACHE_CAPACITY: usize = 0x20;

/// Maximum length of a store name, in characters.
pub const MAX_STORE_NAME_LEN: usize = 32;

/// Store file extension.
pub const DB_EXTENSION: &str = "db";

/// Default storage allowed per suite, in bytes.
pub const DEFAULT_SUITE_STORAGE_LIMIT: u32 = 50 * 1024 * 1024;

/// Capacity reported by in-memory files that were not given one.
pub const DEFAULT_MEMORY_CAPACITY: u32 = 50 * 1024 * 1024;

// ============================================================================
// NOTIFICATION CONSTANTS
// Backpressure for cross-context change events
// ============================================================================

/// Unacknowledged events a receiver may hold before senders back off.
pub const NOTIFICATION_QUEUE_SIZE: u32 = 10;

/// How long a sender waits for a blocking receiver before retrying.
pub const NOTIFICATION_TIMEOUT_MS: u64 = 1000;

/// Retries before the sender reports the stall and broadcasts anyway.
pub const NOTIFICATION_ATTEMPTS: u32 = 5;

const _: () = assert!(NOTIFICATION_QUEUE_SIZE > 0, "queue size of zero blocks every send");
