//! # Binary Codec
//!
//! Stateless helpers for the big-endian integers used by block headers and
//! for the padded size of a block. The 40-byte store header goes through the
//! zerocopy structs in `headers`; raw block headers read during scans go
//! through these functions.
//!
//! ## Block Size
//!
//! ```text
//! block_size(len) = BLOCK_HEADER_SIZE + len rounded up to BLOCK_ALIGNMENT
//!
//! len = 0   -> 8
//! len = 1   -> 16
//! len = 8   -> 16
//! len = 10  -> 24
//! ```
//!
//! Every accessor bounds-checks its slice and reports a format error instead
//! of panicking on malformed input.

use eyre::{ensure, Result};

use crate::config::{BLOCK_ALIGNMENT, BLOCK_HEADER_SIZE};

pub fn get_int(buf: &[u8], offset: usize) -> Result<i32> {
    ensure!(
        offset + 4 <= buf.len(),
        "int32 at offset {} out of bounds (len={})",
        offset,
        buf.len()
    );
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    Ok(i32::from_be_bytes(bytes))
}

pub fn put_int(value: i32, buf: &mut [u8], offset: usize) -> Result<()> {
    ensure!(
        offset + 4 <= buf.len(),
        "int32 at offset {} out of bounds (len={})",
        offset,
        buf.len()
    );
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

pub fn get_long(buf: &[u8], offset: usize) -> Result<i64> {
    ensure!(
        offset + 8 <= buf.len(),
        "int64 at offset {} out of bounds (len={})",
        offset,
        buf.len()
    );
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    Ok(i64::from_be_bytes(bytes))
}

pub fn put_long(value: i64, buf: &mut [u8], offset: usize) -> Result<()> {
    ensure!(
        offset + 8 <= buf.len(),
        "int64 at offset {} out of bounds (len={})",
        offset,
        buf.len()
    );
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Number of padding bytes that follow a payload of `data_len` bytes.
#[inline]
pub fn padding(data_len: u32) -> u32 {
    let rem = data_len % BLOCK_ALIGNMENT as u32;
    if rem == 0 {
        0
    } else {
        BLOCK_ALIGNMENT as u32 - rem
    }
}

/// Total on-disk size of a block holding `data_len` payload bytes.
#[inline]
pub fn block_size(data_len: u32) -> u32 {
    data_len + padding(data_len) + BLOCK_HEADER_SIZE as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_pads_to_alignment() {
        assert_eq!(block_size(0), 8);
        assert_eq!(block_size(1), 16);
        assert_eq!(block_size(8), 16);
        assert_eq!(block_size(10), 24);
        assert_eq!(block_size(4000), 4008);
    }

    #[test]
    fn int_is_big_endian() {
        let mut buf = [0u8; 8];

        put_int(0x0102_0304, &mut buf, 2).unwrap();

        assert_eq!(&buf[2..6], &[1, 2, 3, 4]);
        assert_eq!(get_int(&buf, 2).unwrap(), 0x0102_0304);
    }

    #[test]
    fn negative_int_survives_encoding() {
        let mut buf = [0u8; 4];

        put_int(-1, &mut buf, 0).unwrap();

        assert_eq!(buf, [0xff; 4]);
        assert_eq!(get_int(&buf, 0).unwrap(), -1);
    }

    #[test]
    fn long_is_big_endian() {
        let mut buf = [0u8; 8];

        put_long(1_700_000_000_123, &mut buf, 0).unwrap();

        assert_eq!(buf[0], 0);
        assert_eq!(get_long(&buf, 0).unwrap(), 1_700_000_000_123);
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let mut buf = [0u8; 6];

        assert!(get_int(&buf, 3).is_err());
        assert!(put_int(1, &mut buf, 4).is_err());
        assert!(get_long(&buf, 0).is_err());
    }
}
