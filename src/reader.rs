//! A BGZF reader that frames and inflates in batches of up to [`BLOCK_BATCH_SIZE`] blocks.
use std::collections::VecDeque;
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use bytes::{Buf, Bytes, BytesMut};

use crate::batch::{build_pool, inflate_parts, BlockDescriptor};
use crate::framing::{parse_block_header, parse_block_tailer, read_total_block_len, HEADER_SIZE, SUBFIELD_SIZE, TAILER_SIZE};
use crate::{BgzfError, BgzfResult, BLOCK_BATCH_SIZE};

/// A single framed-but-not-yet-inflated block, read off the raw stream.
struct PendingBlock {
    /// Deflated payload only (header/subfield/tailer stripped).
    deflated: BytesMut,
    inflated_size: u32,
    crc: u32,
}

/// A BGZF reader.
///
/// # Example
///
/// ```rust
/// use bgzf_parallel::{Reader, Compressor, CompressionLevel};
/// use std::error::Error;
/// use std::io::Read;
///
/// fn main() -> Result<(), Box<dyn Error>> {
///     let mut compressor = Compressor::new(CompressionLevel::new(2)?);
///     let input = &[b'A'; 100];
///     let mut compressed_data = vec![];
///     compressor.compress(input, &mut compressed_data)?;
///
///     let mut reader = Reader::new(compressed_data.as_slice());
///     let mut decompressed_data = vec![];
///     let _bytes_read = reader.read_to_end(&mut decompressed_data)?;
///     assert_eq!(decompressed_data, input);
///     Ok(())
/// }
/// ```
pub struct Reader<R>
where
    R: Read,
{
    /// Already-inflated blocks, in file order, waiting to be served through `Read`.
    ready: VecDeque<Bytes>,
    header_buffer: Vec<u8>,
    num_threads: usize,
    /// The `rayon` pool this reader's batches run on, built lazily on the first `refill` and
    /// then cached for the reader's lifetime so worker threads (and the thread-local
    /// `Decompressor` each one caches) are spawned once, not once per batch.
    pool: Option<rayon::ThreadPool>,
    reader: R,
    /// Set once a framing or batch error has been observed; the reader refuses to continue.
    poisoned: bool,
    /// A framing error observed after some blocks of the same `refill` call had already been
    /// framed and inflated. Held back until `self.ready` has been drained, so bytes from
    /// those preceding complete blocks are delivered before the error is surfaced.
    pending_error: Option<BgzfError>,
}

impl<R> Reader<R>
where
    R: Read,
{
    /// Create a reader that fans each batch out across [`num_cpus::get`] worker threads, to
    /// match the default the [`crate::Writer`] uses for compression.
    pub fn new(reader: R) -> Self {
        Self::with_threads(reader, num_cpus::get())
    }

    /// Create a reader that fans each batch of up to [`BLOCK_BATCH_SIZE`] blocks out across
    /// `num_threads` worker threads.
    pub fn with_threads(reader: R, num_threads: usize) -> Self {
        Self {
            ready: VecDeque::new(),
            header_buffer: vec![0; HEADER_SIZE + SUBFIELD_SIZE],
            num_threads: num_threads.max(1),
            pool: None,
            reader,
            poisoned: false,
            pending_error: None,
        }
    }

    /// Frame and inflate the next batch of up to [`BLOCK_BATCH_SIZE`] blocks from the raw
    /// stream, appending the results to `self.ready`. Returns `Ok(0)` if the stream was
    /// already at a block boundary with no more bytes (EOF).
    ///
    /// If a later block in the batch fails to frame (truncation, a bad magic byte, ...), the
    /// blocks already framed earlier in the same call are still inflated and delivered; the
    /// framing error is held in `self.pending_error` and only returned once `self.ready` has
    /// been drained by the caller. A failure *inflating* an already-framed block (CRC or size
    /// mismatch) is not held back this way: per the format's batch semantics that failure
    /// aborts the whole batch immediately, since the batch was already fully framed.
    fn refill(&mut self) -> BgzfResult<usize> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }

        let mut pending: Vec<PendingBlock> = Vec::with_capacity(BLOCK_BATCH_SIZE);
        let mut framing_error: Option<BgzfError> = None;

        'framing: while pending.len() < BLOCK_BATCH_SIZE {
            self.header_buffer.fill(0);
            let mut read_so_far = 0;
            while read_so_far < self.header_buffer.len() {
                match self.reader.read(&mut self.header_buffer[read_so_far..]) {
                    Ok(0) => break,
                    Ok(n) => read_so_far += n,
                    Err(e) => {
                        framing_error = Some(e.into());
                        break 'framing;
                    }
                }
            }
            if read_so_far == 0 {
                // Clean EOF at a block boundary.
                break;
            }
            if read_so_far < self.header_buffer.len() {
                framing_error = Some(BgzfError::InsufficientBytes {
                    needed: self.header_buffer.len(),
                    available: read_so_far,
                });
                break;
            }

            if let Err(e) = parse_block_header(&self.header_buffer) {
                framing_error = Some(e);
                break;
            }
            let total_len = read_total_block_len(&self.header_buffer);
            let remainder_len = total_len - self.header_buffer.len();
            let mut remainder = BytesMut::zeroed(remainder_len);
            let mut remainder_read = 0;
            while remainder_read < remainder_len {
                match self.reader.read(&mut remainder[remainder_read..]) {
                    Ok(0) => {
                        framing_error = Some(BgzfError::InsufficientBytes {
                            needed: remainder_len,
                            available: remainder_read,
                        });
                        break 'framing;
                    }
                    Ok(n) => remainder_read += n,
                    Err(e) => {
                        framing_error = Some(e.into());
                        break 'framing;
                    }
                }
            }

            let tailer_start = remainder_len - TAILER_SIZE;
            let (crc, inflated_size) = match parse_block_tailer(&remainder[tailer_start..]) {
                Ok(v) => v,
                Err(e) => {
                    framing_error = Some(e);
                    break;
                }
            };
            let deflated = remainder.split_to(tailer_start);

            pending.push(PendingBlock { deflated, inflated_size, crc });
        }

        if pending.is_empty() {
            return match framing_error {
                Some(e) => Err(e),
                None => Ok(0),
            };
        }

        let descriptors: Vec<BlockDescriptor<'_>> = pending
            .iter()
            .map(|p| BlockDescriptor { deflated: &p.deflated[..], inflated_size: p.inflated_size, crc: p.crc })
            .collect();
        let mut dst_storage: Vec<Vec<u8>> =
            pending.iter().map(|p| vec![0u8; p.inflated_size as usize]).collect();
        let mut dst_parts: Vec<&mut [u8]> = dst_storage.iter_mut().map(|v| v.as_mut_slice()).collect();

        if self.pool.is_none() {
            self.pool = Some(build_pool(self.num_threads)?);
        }
        let pool = self.pool.as_ref().unwrap();
        let results = inflate_parts(&descriptors, &mut dst_parts, pool)?;
        for r in results {
            if let Err(e) = r {
                return Err(e);
            }
        }

        let mut total = 0;
        for buf in dst_storage {
            total += buf.len();
            self.ready.push_back(Bytes::from(buf));
        }

        // Blocks framed before the failing one were successfully inflated and are now queued
        // in `self.ready`; defer the framing error until they have been served.
        if let Some(e) = framing_error {
            self.pending_error = Some(e);
        }
        Ok(total)
    }
}

impl Reader<File> {
    /// Create a BGZF reader from a [`Path`].
    pub fn from_path<P>(path: P) -> io::Result<Self>
    where
        P: AsRef<Path>,
    {
        File::open(path).map(Self::new)
    }
}

impl<R> Read for Reader<R>
where
    R: Read,
{
    /// Attempt to read `buf.len()` bytes from the inflated stream into `buf`.
    ///
    /// - `Ok(0)` means that EOF has been reached or `buf.len() == 0`.
    /// - `Ok(n < buf.len())` means that EOF has been reached.
    /// - `Err(..)` means that an error occurred; the reader will not yield any more bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(io::Error::new(io::ErrorKind::Other, "reader previously failed"));
        }
        let mut total_copied = 0;
        while total_copied < buf.len() {
            if self.ready.is_empty() {
                match self.refill() {
                    Ok(0) => break, // EOF
                    Ok(_) => {}
                    Err(e) => {
                        self.poisoned = true;
                        return Err(io::Error::new(io::ErrorKind::Other, e));
                    }
                }
            }
            let Some(front) = self.ready.front_mut() else { break };
            let remaining_needed = buf.len() - total_copied;
            let take = std::cmp::min(front.remaining(), remaining_needed);
            front.copy_to_slice(&mut buf[total_copied..total_copied + take]);
            total_copied += take;
            if !front.has_remaining() {
                self.ready.pop_front();
            }
        }
        Ok(total_copied)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;
    use crate::{CompressionLevel, Writer};

    fn write_bgzf(input: &[u8], num_threads: usize) -> Vec<u8> {
        let mut out = vec![];
        let mut writer = Writer::builder(&mut out).num_threads(num_threads).build(CompressionLevel::best());
        writer.write_all(input).unwrap();
        writer.finish().unwrap();
        out
    }

    #[test]
    fn reads_empty_stream_as_eof() {
        let data = write_bgzf(b"", 1);
        let mut reader = Reader::new(&data[..]);
        let mut out = vec![];
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn reads_multi_block_stream() {
        let input: Vec<u8> = (0..1_000_000u32).map(|i| (i % 256) as u8).collect();
        let data = write_bgzf(&input, 4);
        let mut reader = Reader::with_threads(&data[..], 4);
        let mut out = vec![];
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn truncated_stream_is_insufficient_bytes() {
        // Truncating only the terminator block leaves every data block intact, so all of
        // `input` must be delivered before the reader observes the truncation.
        let input = vec![b'q'; 200_000];
        let mut data = write_bgzf(&input, 2);
        data.pop();
        let mut reader = Reader::new(&data[..]);
        let mut out = vec![];
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(out, input, "bytes from preceding complete blocks must still be delivered");
    }

    #[test]
    fn small_reads_never_interleave_blocks() {
        let input: Vec<u8> = (0..300_000u32).map(|i| (i % 200) as u8).collect();
        let data = write_bgzf(&input, 3);
        let mut reader = Reader::with_threads(&data[..], 3);
        let mut out = vec![];
        let mut buf = [0u8; 17];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, input);
    }
}
