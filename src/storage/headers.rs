//! # File Header Definitions
//!
//! This module provides the two fixed-layout headers of a store file: the
//! 40-byte `DbHeader` at offset 0 and the 8-byte `BlockHeader` in front of
//! every block.
//!
//! ## Store Header Layout
//!
//! ```text
//! Offset  Size  Field         Description
//! ------  ----  ------------  -------------------------------------------
//! 0       8     signature     "midp-rms"
//! 8       4     auth_mode     0 = private, 1 = any, 2 = any read-only
//! 12      4     next_id       next record ID to assign
//! 16      4     num_live      live record count
//! 20      4     version       bumped by every mutation
//! 24      8     last_modified epoch milliseconds
//! 32      4     data_size     bytes of all blocks after the header
//! 36      4     free_size     bytes of free blocks within data_size
//! ```
//!
//! ## Block Header Layout
//!
//! ```text
//! Offset  Size  Field      Description
//! 0       4     record_id  -1 for a free block
//! 4       4     data_len   payload length (free payload for free blocks)
//! ```
//!
//! ## Narrow Writes
//!
//! The engine never rewrites the whole store header after open. It edits a
//! copy, writes `copy.as_bytes()[range]` at `range.start`, and only then
//! publishes the copy to the shared header. `DbHeader` is `Copy` for this.
//!
//! ## Endianness
//!
//! All multi-byte fields are big-endian. The zerocopy `big_endian` wrapper
//! types handle conversion; block headers use the `codec` helpers directly.

use eyre::{ensure, Result};
use zerocopy::big_endian::{I32, I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::codec;
use crate::config::{
    BLOCK_HEADER_SIZE, DB_HEADER_SIZE, DB_SIGNATURE, FIRST_RECORD_ID, FREE_BLOCK_ID,
};
use crate::error::RmsError;

/// Who may open a store from another suite and whether they may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    Private,
    Any,
    AnyReadOnly,
}

impl AuthMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(AuthMode::Private),
            1 => Some(AuthMode::Any),
            2 => Some(AuthMode::AnyReadOnly),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            AuthMode::Private => 0,
            AuthMode::Any => 1,
            AuthMode::AnyReadOnly => 2,
        }
    }

    /// Folds the public `(mode, writable)` pair into the stored mode.
    pub fn with_writable(self, writable: bool) -> Self {
        match (self, writable) {
            (AuthMode::Any, false) => AuthMode::AnyReadOnly,
            (AuthMode::AnyReadOnly, true) => AuthMode::Any,
            (mode, _) => mode,
        }
    }

    pub fn is_shared(self) -> bool {
        !matches!(self, AuthMode::Private)
    }

    pub fn allows_foreign_writes(self) -> bool {
        matches!(self, AuthMode::Any)
    }
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct DbHeader {
    signature: [u8; 8],
    auth_mode: U32,
    next_id: I32,
    num_live: U32,
    version: U32,
    last_modified: I64,
    data_size: U32,
    free_size: U32,
}

const _: () = assert!(std::mem::size_of::<DbHeader>() == DB_HEADER_SIZE);

impl DbHeader {
    pub fn new(last_modified: i64) -> Self {
        Self {
            signature: *DB_SIGNATURE,
            auth_mode: U32::new(AuthMode::Private.to_raw()),
            next_id: I32::new(FIRST_RECORD_ID),
            num_live: U32::new(0),
            version: U32::new(0),
            last_modified: I64::new(last_modified),
            data_size: U32::new(0),
            free_size: U32::new(0),
        }
    }

    /// Parses and validates a header read from a store file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= DB_HEADER_SIZE,
            "buffer too small for DbHeader: {} < {}",
            bytes.len(),
            DB_HEADER_SIZE
        );

        let header = Self::read_from_bytes(&bytes[..DB_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse DbHeader: {:?}", e))?;

        if &header.signature != DB_SIGNATURE {
            return Err(RmsError::StoreCorrupt("invalid record store signature".into()).into());
        }

        if header.free_size.get() > header.data_size.get() {
            return Err(RmsError::StoreCorrupt(format!(
                "free size {} exceeds data size {}",
                header.free_size.get(),
                header.data_size.get()
            ))
            .into());
        }

        Ok(header)
    }

    zerocopy_accessors! {
        auth_mode: u32,
        next_id: i32,
        num_live: u32,
        version: u32,
        last_modified: i64,
        data_size: u32,
        free_size: u32,
    }

    pub fn mode(&self) -> AuthMode {
        AuthMode::from_raw(self.auth_mode()).unwrap_or(AuthMode::Private)
    }

    /// Total file size implied by this header.
    pub fn file_size(&self) -> u32 {
        DB_HEADER_SIZE as u32 + self.data_size()
    }

    /// Advances the version and stamps the modification time.
    pub fn touch(&mut self, now_ms: i64) -> u32 {
        let version = self.version().wrapping_add(1);
        self.set_version(version);
        self.set_last_modified(now_ms);
        version
    }
}

/// Header in front of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub record_id: i32,
    pub data_len: u32,
}

impl BlockHeader {
    pub fn new(record_id: i32, data_len: u32) -> Self {
        Self { record_id, data_len }
    }

    pub fn free(data_len: u32) -> Self {
        Self {
            record_id: FREE_BLOCK_ID,
            data_len,
        }
    }

    pub fn is_free(&self) -> bool {
        self.record_id < 0
    }

    pub fn block_size(&self) -> u32 {
        codec::block_size(self.data_len)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let record_id = codec::get_int(buf, 0)?;
        let data_len = codec::get_int(buf, 4)?;
        ensure!(
            data_len >= 0,
            "negative data length {} in block header of record {}",
            data_len,
            record_id
        );
        Ok(Self {
            record_id,
            data_len: data_len as u32,
        })
    }

    pub fn encode(&self) -> Result<[u8; BLOCK_HEADER_SIZE]> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        codec::put_int(self.record_id, &mut buf, 0)?;
        codec::put_int(self.data_len as i32, &mut buf, 4)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RS2_NEXT_ID, RS5_LAST_MODIFIED, RS6_DATA_SIZE};

    #[test]
    fn db_header_size_is_40() {
        assert_eq!(std::mem::size_of::<DbHeader>(), 40);
    }

    #[test]
    fn new_header_starts_at_first_record_id() {
        let header = DbHeader::new(1234);

        assert_eq!(header.next_id(), 1);
        assert_eq!(header.num_live(), 0);
        assert_eq!(header.version(), 0);
        assert_eq!(header.last_modified(), 1234);
        assert_eq!(header.mode(), AuthMode::Private);
        assert_eq!(&header.as_bytes()[..8], b"midp-rms");
    }

    #[test]
    fn fields_land_at_fixed_offsets() {
        let mut header = DbHeader::new(0);
        header.set_next_id(0x0a0b_0c0d);
        header.set_data_size(0x0102_0304);
        header.set_last_modified(0x1122_3344_5566_7788);

        let bytes = header.as_bytes();

        assert_eq!(&bytes[RS2_NEXT_ID..RS2_NEXT_ID + 4], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&bytes[RS6_DATA_SIZE..RS6_DATA_SIZE + 4], &[1, 2, 3, 4]);
        assert_eq!(bytes[RS5_LAST_MODIFIED], 0x11);
    }

    #[test]
    fn header_rejects_invalid_signature() {
        let mut bytes = [0u8; 40];
        bytes[..8].copy_from_slice(b"not-rms!");

        let err = DbHeader::from_bytes(&bytes).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RmsError>(),
            Some(RmsError::StoreCorrupt(_))
        ));
    }

    #[test]
    fn header_rejects_short_buffer() {
        let header = DbHeader::new(0);

        assert!(DbHeader::from_bytes(&header.as_bytes()[..39]).is_err());
    }

    #[test]
    fn touch_bumps_version() {
        let mut header = DbHeader::new(0);

        assert_eq!(header.touch(50), 1);
        assert_eq!(header.touch(60), 2);
        assert_eq!(header.last_modified(), 60);
    }

    #[test]
    fn block_header_encodes_free_sentinel() {
        let header = BlockHeader::free(16);

        let bytes = header.encode().unwrap();

        assert_eq!(&bytes[..4], &[0xff; 4]);
        let decoded = BlockHeader::decode(&bytes).unwrap();
        assert!(decoded.is_free());
        assert_eq!(decoded.block_size(), 24);
    }

    #[test]
    fn block_header_rejects_negative_length() {
        let mut bytes = [0u8; 8];
        bytes[4..].copy_from_slice(&(-5i32).to_be_bytes());

        assert!(BlockHeader::decode(&bytes).is_err());
    }

    #[test]
    fn auth_mode_folds_writable_flag() {
        assert_eq!(AuthMode::Any.with_writable(false), AuthMode::AnyReadOnly);
        assert_eq!(AuthMode::Any.with_writable(true), AuthMode::Any);
        assert_eq!(AuthMode::Private.with_writable(false), AuthMode::Private);
        assert_eq!(AuthMode::from_raw(2), Some(AuthMode::AnyReadOnly));
        assert_eq!(AuthMode::from_raw(9), None);
    }
}
