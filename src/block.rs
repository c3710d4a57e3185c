//! The Block Codec: pure, allocation-free (on the steady-state path) inflate/compress of a
//! single BGZF block, plus thin owned wrappers for one-block-at-a-time callers.
use libdeflater::Crc;

use crate::framing::{
    self, parse_block_header, parse_block_tailer, patch_block_size, read_total_block_len,
    write_bc_subfield, write_block_header, write_block_tailer, HEADER_SIZE, SUBFIELD_SIZE,
    TAILER_SIZE,
};
use crate::{BgzfError, BgzfResult, CompressionLevel, BLOCK_METADATA_SIZE};

/// Inflate one BGZF block's deflated payload `src` into `dst`, verifying the declared
/// `inflated_size` and `expected_crc` against what inflate actually produces.
///
/// `dst` must be at least `inflated_size` bytes long; only `dst[..inflated_size]` is written.
///
/// This function performs no allocation beyond what `decompressor` itself may need to grow
/// into on first use, holds no lock, and is safe to call concurrently from multiple threads
/// provided each call's `src`/`dst` are disjoint from every other concurrent call's.
pub fn inflate_block_with(
    decompressor: &mut libdeflater::Decompressor,
    src: &[u8],
    dst: &mut [u8],
    inflated_size: usize,
    expected_crc: u32,
) -> BgzfResult<()> {
    let dst = &mut dst[..inflated_size];
    if !src.is_empty() {
        let actual = decompressor.deflate_decompress(src, dst)?;
        if actual != inflated_size {
            return Err(BgzfError::BlockSizeMismatch { expected: inflated_size, actual });
        }
    }
    let mut crc = Crc::new();
    crc.update(dst);
    if crc.sum() != expected_crc {
        return Err(BgzfError::CrcMismatch { expected: expected_crc, found: crc.sum() });
    }
    Ok(())
}

/// Convenience entry point that builds a fresh [`libdeflater::Decompressor`] for the call.
/// The batch engine instead reuses a thread-local decompressor via [`inflate_block_with`].
pub fn inflate_block(
    src: &[u8],
    dst: &mut [u8],
    inflated_size: usize,
    expected_crc: u32,
) -> BgzfResult<()> {
    let mut decompressor = libdeflater::Decompressor::new();
    inflate_block_with(&mut decompressor, src, dst, inflated_size, expected_crc)
}

/// Compress `input` (at most [`crate::BLOCK_DATA_INFLATED_SIZE`] bytes) into a single complete
/// BGZF block written to `out`, returning the total block length.
///
/// `out` must be at least `input.len() + `[`BLOCK_METADATA_SIZE`]` bytes long, plus whatever
/// slack `level` may need in the rare case deflate expands small or incompressible input; see
/// [`crate::MIN_OUTPUT_BUFFER_SIZE`] for the size that is always sufficient for a full-size
/// chunk.
pub fn compress_block_with(
    compressor: &mut libdeflater::Compressor,
    input: &[u8],
    out: &mut [u8],
) -> BgzfResult<usize> {
    write_block_header(&mut out[..HEADER_SIZE]);
    write_bc_subfield(&mut out[HEADER_SIZE..HEADER_SIZE + SUBFIELD_SIZE]);

    let payload_start = HEADER_SIZE + SUBFIELD_SIZE;
    let deflated_len = compressor
        .deflate_compress(input, &mut out[payload_start..])
        .map_err(BgzfError::LibDeflaterCompress)?;

    let tailer_start = payload_start + deflated_len;
    let total_len = tailer_start + TAILER_SIZE;
    if total_len > out.len() {
        return Err(BgzfError::BlockSizeExceeded(total_len, out.len()));
    }

    let mut crc = Crc::new();
    crc.update(input);
    write_block_tailer(&mut out[tailer_start..tailer_start + TAILER_SIZE], crc.sum(), input.len() as u32);
    patch_block_size(&mut out[HEADER_SIZE..HEADER_SIZE + SUBFIELD_SIZE], total_len);

    Ok(total_len)
}

/// Convenience entry point that builds a fresh [`libdeflater::Compressor`] for the call.
/// The batch engine instead reuses a thread-local compressor via [`compress_block_with`].
pub fn compress_block(input: &[u8], out: &mut [u8], level: CompressionLevel) -> BgzfResult<usize> {
    let mut compressor = libdeflater::Compressor::new(level.inner());
    compress_block_with(&mut compressor, input, out)
}

/// Owned, reusable compressor for callers working one block at a time.
///
/// # Example
///
/// ```rust
/// use bgzf_parallel::{Compressor, CompressionLevel};
///
/// let mut compressor = Compressor::new(2.try_into().unwrap());
/// let input = &[b'A'; 100];
/// let mut output_buffer = vec![];
/// compressor.compress(input, &mut output_buffer).unwrap();
/// assert!(input.len() > output_buffer.len());
/// ```
pub struct Compressor {
    inner: libdeflater::Compressor,
}

impl Compressor {
    /// Create a new [`Compressor`] with the given [`CompressionLevel`].
    pub fn new(level: CompressionLevel) -> Self {
        Self { inner: libdeflater::Compressor::new(level.inner()) }
    }

    /// Compress a block of bytes, growing `buffer` to fit the complete framed block.
    pub fn compress(&mut self, input: &[u8], buffer: &mut Vec<u8>) -> BgzfResult<()> {
        let extra = std::cmp::max(128, input.len() / 10);
        buffer.resize(input.len() + BLOCK_METADATA_SIZE + extra, 0);
        let written = compress_block_with(&mut self.inner, input, buffer)?;
        buffer.truncate(written);
        Ok(())
    }

    /// Append the BGZF end-of-stream terminator block.
    pub fn append_eof(bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(crate::BGZF_EOF);
    }
}

/// Owned, reusable decompressor for callers working one block at a time.
pub struct Decompressor {
    inner: libdeflater::Decompressor,
}

impl Decompressor {
    /// Create a new [`Decompressor`].
    pub fn new() -> Self {
        Self { inner: libdeflater::Decompressor::new() }
    }

    /// Parse and inflate one block, starting at the beginning of `block` (header onward).
    /// Returns the inflated bytes and the number of bytes of `block` the block occupied.
    pub fn decompress_one(&mut self, block: &[u8]) -> BgzfResult<(Vec<u8>, usize)> {
        parse_block_header(block)?;
        let total_len = read_total_block_len(block);
        if block.len() < total_len {
            return Err(BgzfError::InsufficientBytes { needed: total_len, available: block.len() });
        }
        let payload_start = HEADER_SIZE + SUBFIELD_SIZE;
        let tailer_start = total_len - TAILER_SIZE;
        let (crc, inflated_size) = parse_block_tailer(&block[tailer_start..total_len])?;
        let mut dst = vec![0u8; inflated_size as usize];
        inflate_block_with(
            &mut self.inner,
            &block[payload_start..tailer_start],
            &mut dst,
            inflated_size as usize,
            crc,
        )?;
        Ok((dst, total_len))
    }
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}
