//! This library provides BGZF (Blocked GZip Format) readers and writers that inflate and
//! deflate in batches of up to [`BLOCK_BATCH_SIZE`] blocks at a time, fanning each batch out
//! across a small `rayon` thread pool instead of working one block at a time.
//!
//! BGZF is a multi-gzip format that adds an extra field to the header indicating how large the
//! complete block (with header and footer) is, which makes the stream splittable into
//! independently (de)compressible blocks.
//!
//! # Examples
//!
//! ```rust
//! use bgzf_parallel::{Reader, Writer};
//! use std::error::Error;
//! use std::io;
//!
//! /// Contrived example that decompresses stdin and compresses to stdout using 4 threads.
//! fn main() -> Result<(), Box<dyn Error>> {
//!     let mut reader = Reader::new(io::stdin());
//!     let mut writer = Writer::builder(io::stdout()).num_threads(4).build(2.try_into()?);
//!     let total_bytes = io::copy(&mut reader, &mut writer)?;
//!     writer.finish()?;
//!     eprintln!("{} uncompressed bytes", total_bytes);
//!     Ok(())
//! }
//! ```
#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate, clippy::missing_errors_doc, clippy::missing_panics_doc)]

mod asyncio;
mod batch;
mod block;
mod framing;
mod reader;
mod writer;

pub use asyncio::{AsyncReader, AsyncReaderBuilder, AsyncWriter, AsyncWriterBuilder};
pub use batch::{deflate_to_buffers, inflate_parts, BlockDescriptor};
pub use block::{compress_block, inflate_block, Compressor, Decompressor};
pub use reader::Reader;
pub use writer::{Writer, WriterBuilder};

use std::io;

use libdeflater::CompressionLvl;
use thiserror::Error;

/// The maximum uncompressed size of a single BGZF block's payload.
pub const BLOCK_DATA_INFLATED_SIZE: usize = 65280;

/// Bytes of fixed framing overhead per block: 12 (header) + 6 (BC subfield) + 8 (tailer).
pub const BLOCK_METADATA_SIZE: usize = 26;

/// The maximum number of blocks processed in a single parallel batch call.
pub const BLOCK_BATCH_SIZE: usize = 300;

/// 128 KB default accumulator buffer size, same as pigz/the teacher default.
pub const BUFSIZE: usize = 128 * 1024;

/// The minimum capacity a single deflate output buffer must have to guarantee
/// `compress_block` never overflows it: the payload cap plus framing overhead.
pub const MIN_OUTPUT_BUFFER_SIZE: usize = BLOCK_DATA_INFLATED_SIZE + BLOCK_METADATA_SIZE;

pub(crate) static BGZF_EOF: &[u8] = &[
    0x1f, 0x8b, // ID1, ID2
    0x08, // CM = DEFLATE
    0x04, // FLG = FEXTRA
    0x00, 0x00, 0x00, 0x00, // MTIME = 0
    0x00, // XFL = 0
    0xff, // OS = 255 (unknown)
    0x06, 0x00, // XLEN = 6
    0x42, 0x43, // SI1, SI2
    0x02, 0x00, // SLEN = 2
    0x1b, 0x00, // BSIZE = 27
    0x03, 0x00, // CDATA
    0x00, 0x00, 0x00, 0x00, // CRC32 = 0x00000000
    0x00, 0x00, 0x00, 0x00, // ISIZE = 0
];

pub(crate) type BgzfResult<T> = Result<T, BgzfError>;

/// Errors produced while framing, inflating, or deflating BGZF blocks.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BgzfError {
    /// The gzip magic bytes, compression method, FEXTRA flag, or BC subfield identifiers
    /// did not match what a BGZF block requires.
    #[error("Invalid block header: {0}")]
    MalformedHeader(&'static str),
    /// The raw stream ended before a complete block (header, subfield, deflated payload, or
    /// tailer) could be read.
    #[error("Truncated BGZF stream: needed {needed} bytes, had {available}")]
    InsufficientBytes { needed: usize, available: usize },
    /// Inflate produced a different number of bytes than the block declared.
    #[error("Inflated size mismatch: expected {expected}, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },
    /// The CRC-32 of the inflated bytes did not match the block's declared checksum.
    #[error("Invalid checksum, found {found}, expected {expected}")]
    CrcMismatch { expected: u32, found: u32 },
    /// A batch-engine call received more descriptors than [`BLOCK_BATCH_SIZE`] allows.
    #[error("Batch of {0} blocks exceeds the maximum of {BLOCK_BATCH_SIZE}")]
    BatchTooLarge(usize),
    /// A batch-engine call received a different number of sources and destinations.
    #[error("Batch shape mismatch: {sources} sources, {dests} destinations")]
    BatchShapeMismatch { sources: usize, dests: usize },
    /// The deflated size of a compressed block exceeded what a destination buffer can hold.
    #[error("Compressed block size ({0}) exceeds max allowed: ({1})")]
    BlockSizeExceeded(usize, usize),
    /// An invalid compression level (outside `1..=12`) was requested.
    #[error("Invalid compression level: {0}")]
    CompressionLevel(u8),
    /// The per-call `rayon` thread pool could not be built.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// The underlying `libdeflater` compressor failed.
    #[error("libdeflater compression error: {0:?}")]
    LibDeflaterCompress(libdeflater::CompressionError),
    /// The underlying `libdeflater` decompressor failed.
    #[error(transparent)]
    LibDeflaterDecompress(#[from] libdeflater::DecompressionError),
    /// An I/O error occurred reading from or writing to the underlying stream.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Level of compression to use, wrapping [`libdeflater::CompressionLvl`].
///
/// Valid values are 1-12. See the [libdeflate](https://github.com/ebiggers/libdeflate#compression-levels)
/// documentation for what each level trades off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(CompressionLvl);

impl CompressionLevel {
    /// Create a new [`CompressionLevel`] instance.
    ///
    /// Valid levels are 1-12.
    #[allow(clippy::cast_lossless)]
    pub fn new(level: u8) -> BgzfResult<Self> {
        Ok(Self(CompressionLvl::new(level as i32).map_err(|_e| BgzfError::CompressionLevel(level))?))
    }

    /// The library's default level: maximum compression, as the BGZF format specifies.
    pub fn best() -> Self {
        Self(CompressionLvl::best())
    }

    pub(crate) fn inner(self) -> CompressionLvl {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::best()
    }
}

impl TryFrom<u8> for CompressionLevel {
    type Error = BgzfError;

    /// Try to convert a `u8` to a compression level.
    ///
    /// # Example
    /// ```rust
    /// use bgzf_parallel::CompressionLevel;
    ///
    /// let level: CompressionLevel = 2.try_into().unwrap();
    /// assert_eq!(level, CompressionLevel::new(2).unwrap());
    /// ```
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CompressionLevel> for u8 {
    fn from(level: CompressionLevel) -> Self {
        let inner: i32 = level.inner().into();
        inner as u8
    }
}
