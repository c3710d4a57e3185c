//! Pure (de)serialization of the three fixed-layout structures that make up a BGZF block:
//! the gzip header, the "BC" extra subfield, and the gzip tailer.
//!
//! None of the functions here allocate; callers own the byte spans.
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::BgzfError;

/// Size in bytes of the fixed gzip header (magic, mtime, flags, os, extra_len).
pub(crate) const HEADER_SIZE: usize = 12;
/// Size in bytes of the "BC" extra subfield.
pub(crate) const SUBFIELD_SIZE: usize = 6;
/// Size in bytes of the gzip tailer (crc32 + isize).
pub(crate) const TAILER_SIZE: usize = 8;

const MAGIC_0: u8 = 0x1f;
const MAGIC_1: u8 = 0x8b;
const COMPRESSION_METHOD: u8 = 0x08;
const FEXTRA: u8 = 0x04;
const DEFAULT_MTIME: u32 = 0;
const DEFAULT_OS: u8 = 0xff;
const SUBFIELD_ID1: u8 = b'B';
const SUBFIELD_ID2: u8 = b'C';
const SUBFIELD_LEN: u16 = 2;

/// Write the 12-byte gzip header into `out`.
///
/// # Panics
/// Panics if `out` is shorter than [`HEADER_SIZE`].
pub(crate) fn write_block_header(out: &mut [u8]) {
    assert!(out.len() >= HEADER_SIZE);
    out[0] = MAGIC_0;
    out[1] = MAGIC_1;
    out[2] = COMPRESSION_METHOD;
    out[3] = FEXTRA;
    LittleEndian::write_u32(&mut out[4..8], DEFAULT_MTIME);
    out[8] = 0; // extra flags
    out[9] = DEFAULT_OS;
    LittleEndian::write_u16(&mut out[10..12], (SUBFIELD_SIZE) as u16);
}

/// Write the 6-byte "BC" subfield into `out`, with a placeholder `block_size` of 0.
///
/// The caller patches `block_size` in with [`patch_block_size`] once the deflated length
/// of the block is known.
///
/// # Panics
/// Panics if `out` is shorter than [`SUBFIELD_SIZE`].
pub(crate) fn write_bc_subfield(out: &mut [u8]) {
    assert!(out.len() >= SUBFIELD_SIZE);
    out[0] = SUBFIELD_ID1;
    out[1] = SUBFIELD_ID2;
    LittleEndian::write_u16(&mut out[2..4], SUBFIELD_LEN);
    LittleEndian::write_u16(&mut out[4..6], 0);
}

/// Patch the `block_size` field of an already-written BC subfield.
///
/// `total_block_len` is the full length of the block (header + subfield + deflated + tailer).
///
/// # Panics
/// Panics if `out` is shorter than [`SUBFIELD_SIZE`].
pub(crate) fn patch_block_size(out: &mut [u8], total_block_len: usize) {
    assert!(out.len() >= SUBFIELD_SIZE);
    LittleEndian::write_u16(&mut out[4..6], (total_block_len - 1) as u16);
}

/// Write the 8-byte tailer (crc32, inflated size) into `out`.
///
/// # Panics
/// Panics if `out` is shorter than [`TAILER_SIZE`].
pub(crate) fn write_block_tailer(out: &mut [u8], crc: u32, inflated_size: u32) {
    assert!(out.len() >= TAILER_SIZE);
    let mut cursor = &mut out[..TAILER_SIZE];
    cursor.write_u32::<LittleEndian>(crc).unwrap();
    cursor.write_u32::<LittleEndian>(inflated_size).unwrap();
}

/// Validate the 12-byte gzip header and the 6-byte BC subfield that immediately follows it.
///
/// `buf` must contain at least `HEADER_SIZE + SUBFIELD_SIZE` bytes.
pub(crate) fn parse_block_header(buf: &[u8]) -> Result<(), BgzfError> {
    if buf.len() < HEADER_SIZE + SUBFIELD_SIZE {
        return Err(BgzfError::InsufficientBytes {
            needed: HEADER_SIZE + SUBFIELD_SIZE,
            available: buf.len(),
        });
    }
    if buf[0] != MAGIC_0 || buf[1] != MAGIC_1 {
        return Err(BgzfError::MalformedHeader("bad gzip magic bytes"));
    }
    if buf[2] != COMPRESSION_METHOD {
        return Err(BgzfError::MalformedHeader("unsupported compression method"));
    }
    if buf[3] & FEXTRA != FEXTRA {
        return Err(BgzfError::MalformedHeader("FEXTRA flag not set"));
    }
    if buf[HEADER_SIZE] != SUBFIELD_ID1 || buf[HEADER_SIZE + 1] != SUBFIELD_ID2 {
        return Err(BgzfError::MalformedHeader("missing BC subfield identifier"));
    }
    let subfield_len = LittleEndian::read_u16(&buf[HEADER_SIZE + 2..HEADER_SIZE + 4]);
    if subfield_len != SUBFIELD_LEN {
        return Err(BgzfError::MalformedHeader("unexpected BC subfield length"));
    }
    let total_len = LittleEndian::read_u16(&buf[HEADER_SIZE + 4..HEADER_SIZE + 6]) as usize + 1;
    if total_len < HEADER_SIZE + SUBFIELD_SIZE + TAILER_SIZE {
        return Err(BgzfError::MalformedHeader("declared block_size too small to hold a complete block"));
    }
    Ok(())
}

/// Read the declared total block length (`block_size + 1` already accounted for) out of an
/// already-[validated](parse_block_header) header+subfield span.
pub(crate) fn read_total_block_len(buf: &[u8]) -> usize {
    LittleEndian::read_u16(&buf[HEADER_SIZE + 4..HEADER_SIZE + 6]) as usize + 1
}

/// Read the crc32 and inflated size out of an 8-byte tailer.
pub(crate) fn parse_block_tailer(buf: &[u8]) -> Result<(u32, u32), BgzfError> {
    if buf.len() < TAILER_SIZE {
        return Err(BgzfError::InsufficientBytes { needed: TAILER_SIZE, available: buf.len() });
    }
    let crc = LittleEndian::read_u32(&buf[0..4]);
    let isize = LittleEndian::read_u32(&buf[4..8]);
    Ok((crc, isize))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut buf = [0u8; HEADER_SIZE + SUBFIELD_SIZE];
        write_block_header(&mut buf[..HEADER_SIZE]);
        write_bc_subfield(&mut buf[HEADER_SIZE..]);
        patch_block_size(&mut buf[HEADER_SIZE..], 100);
        parse_block_header(&buf).unwrap();
        assert_eq!(read_total_block_len(&buf), 100);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = [0u8; HEADER_SIZE + SUBFIELD_SIZE];
        write_block_header(&mut buf[..HEADER_SIZE]);
        write_bc_subfield(&mut buf[HEADER_SIZE..]);
        buf[0] = 0;
        assert!(matches!(parse_block_header(&buf), Err(BgzfError::MalformedHeader(_))));
    }

    #[test]
    fn rejects_short_buffer() {
        let buf = [0u8; 4];
        assert!(matches!(parse_block_header(&buf), Err(BgzfError::InsufficientBytes { .. })));
    }

    #[test]
    fn rejects_block_size_too_small_to_hold_a_complete_block() {
        let mut buf = [0u8; HEADER_SIZE + SUBFIELD_SIZE];
        write_block_header(&mut buf[..HEADER_SIZE]);
        write_bc_subfield(&mut buf[HEADER_SIZE..]);
        patch_block_size(&mut buf[HEADER_SIZE..], HEADER_SIZE + SUBFIELD_SIZE + TAILER_SIZE - 1);
        assert!(matches!(parse_block_header(&buf), Err(BgzfError::MalformedHeader(_))));
    }

    #[test]
    fn tailer_round_trips() {
        let mut buf = [0u8; TAILER_SIZE];
        write_block_tailer(&mut buf, 0xdead_beef, 1234);
        let (crc, isize) = parse_block_tailer(&buf).unwrap();
        assert_eq!(crc, 0xdead_beef);
        assert_eq!(isize, 1234);
    }
}
