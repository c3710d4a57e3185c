//! The Batch Engine: marshal up to [`crate::BLOCK_BATCH_SIZE`] blocks into a `rayon`
//! thread pool and run the Block Codec across them in parallel.
use std::cell::RefCell;

use rayon::prelude::*;

use crate::block::{compress_block_with, inflate_block_with};
use crate::{BgzfError, BgzfResult, CompressionLevel, BLOCK_BATCH_SIZE, BLOCK_DATA_INFLATED_SIZE};

thread_local! {
    static DECOMPRESSOR: RefCell<libdeflater::Decompressor> =
        RefCell::new(libdeflater::Decompressor::new());
    static COMPRESSOR: RefCell<Option<(CompressionLevel, libdeflater::Compressor)>> =
        const { RefCell::new(None) };
}

/// Run `f` with this worker thread's cached decompressor, creating it on first use.
fn with_thread_local_decompressor<T>(f: impl FnOnce(&mut libdeflater::Decompressor) -> T) -> T {
    DECOMPRESSOR.with(|cell| f(&mut cell.borrow_mut()))
}

/// Run `f` with this worker thread's cached compressor for `level`, rebuilding it only if
/// the requested level differs from what is cached.
fn with_thread_local_compressor<T>(
    level: CompressionLevel,
    f: impl FnOnce(&mut libdeflater::Compressor) -> T,
) -> T {
    COMPRESSOR.with(|cell| {
        let mut slot = cell.borrow_mut();
        let needs_rebuild = !matches!(&*slot, Some((cached_level, _)) if *cached_level == level);
        if needs_rebuild {
            *slot = Some((level, libdeflater::Compressor::new(level.inner())));
        }
        let (_, compressor) = slot.as_mut().unwrap();
        f(compressor)
    })
}

/// A single block's worth of inflation input: the deflated payload, the declared inflated
/// size, and the declared CRC-32. Valid only while `deflated` is alive.
#[derive(Debug, Clone, Copy)]
pub struct BlockDescriptor<'a> {
    pub deflated: &'a [u8],
    pub inflated_size: u32,
    pub crc: u32,
}

/// Build the `rayon` thread pool a [`crate::Reader`]/[`crate::Writer`] instance caches and
/// reuses across every batch call it makes, so worker threads (and the thread-local codec
/// state they carry, see `with_thread_local_decompressor`/`with_thread_local_compressor`) are
/// spawned once per instance rather than once per batch.
pub(crate) fn build_pool(num_threads: usize) -> BgzfResult<rayon::ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new().num_threads(num_threads).build()?)
}

/// Inflate a batch of up to [`BLOCK_BATCH_SIZE`] blocks in parallel on `pool`.
///
/// `blocks` and `dst_parts` must have the same length, at most `BLOCK_BATCH_SIZE`. Each
/// `dst_parts[i]` must be at least `blocks[i].inflated_size` bytes long.
///
/// Every block is attempted regardless of whether an earlier one failed; the returned `Vec`
/// carries one `BgzfResult<()>` per input block, in order. The outer `Result` only reports
/// precondition failures (`BatchShapeMismatch`, `BatchTooLarge`) caught before any work is
/// scheduled on `pool`.
pub fn inflate_parts(
    blocks: &[BlockDescriptor<'_>],
    dst_parts: &mut [&mut [u8]],
    pool: &rayon::ThreadPool,
) -> BgzfResult<Vec<BgzfResult<()>>> {
    if blocks.len() != dst_parts.len() {
        return Err(BgzfError::BatchShapeMismatch { sources: blocks.len(), dests: dst_parts.len() });
    }
    if blocks.len() > BLOCK_BATCH_SIZE {
        return Err(BgzfError::BatchTooLarge(blocks.len()));
    }

    let results = pool.install(|| {
        blocks
            .par_iter()
            .zip(dst_parts.par_iter_mut())
            .map(|(descriptor, dst)| {
                with_thread_local_decompressor(|decompressor| {
                    inflate_block_with(
                        decompressor,
                        descriptor.deflated,
                        dst,
                        descriptor.inflated_size as usize,
                        descriptor.crc,
                    )
                })
            })
            .collect::<Vec<_>>()
    });
    Ok(results)
}

/// Split `input` into up to `deflated_buffers.len()` chunks of at most
/// [`BLOCK_DATA_INFLATED_SIZE`] bytes each, and compress them all in parallel on `pool`.
///
/// `deflated_buffers` are preallocated output spans per §4.3.2; each must already be at least
/// [`crate::MIN_OUTPUT_BUFFER_SIZE`] bytes long (callers working a batch at a time, like
/// [`crate::Writer`], size their pool once up front). Any buffer still short of that is grown
/// here, but sequentially, before `pool.install` is entered — growing a `Vec` inside the
/// parallel region itself would be an allocation inside the fan-out.
///
/// Returns the emitted size of each block, in chunk order; `deflated_buffers[i][..size]` is
/// the complete framed block for chunk `i`. Any per-chunk compression failure aborts the
/// whole call — the first error encountered (by chunk index) is returned.
pub fn deflate_to_buffers(
    input: &[u8],
    deflated_buffers: &mut [Vec<u8>],
    level: CompressionLevel,
    pool: &rayon::ThreadPool,
) -> BgzfResult<Vec<usize>> {
    if input.is_empty() {
        return Ok(vec![]);
    }

    let number_of_chunks =
        std::cmp::min(input.len().div_ceil(BLOCK_DATA_INFLATED_SIZE), deflated_buffers.len());
    let chunks: Vec<&[u8]> = (0..number_of_chunks)
        .map(|i| {
            let start = i * BLOCK_DATA_INFLATED_SIZE;
            let end = std::cmp::min(start + BLOCK_DATA_INFLATED_SIZE, input.len());
            &input[start..end]
        })
        .collect();

    for buffer in deflated_buffers[..number_of_chunks].iter_mut() {
        if buffer.len() < crate::MIN_OUTPUT_BUFFER_SIZE {
            buffer.resize(crate::MIN_OUTPUT_BUFFER_SIZE, 0);
        }
    }

    let results: Vec<BgzfResult<usize>> = pool.install(|| {
        chunks
            .par_iter()
            .zip(deflated_buffers[..number_of_chunks].par_iter_mut())
            .map(|(chunk, buffer)| {
                with_thread_local_compressor(level, |compressor| {
                    compress_block_with(compressor, chunk, buffer)
                })
            })
            .collect()
    });

    results.into_iter().collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::compress_block;

    #[test]
    fn deflate_to_buffers_chunks_and_sizes() {
        let input = vec![7u8; BLOCK_DATA_INFLATED_SIZE * 3 + 123];
        let mut buffers = vec![vec![]; 10];
        let level = CompressionLevel::new(6).unwrap();
        let pool = build_pool(2).unwrap();
        let sizes = deflate_to_buffers(&input, &mut buffers, level, &pool).unwrap();
        assert_eq!(sizes.len(), 4);
        for size in &sizes {
            assert!(*size <= crate::MIN_OUTPUT_BUFFER_SIZE);
        }
    }

    #[test]
    fn deflate_to_buffers_empty_input_is_zero_chunks() {
        let mut buffers = vec![vec![]; 4];
        let level = CompressionLevel::new(6).unwrap();
        let pool = build_pool(2).unwrap();
        let sizes = deflate_to_buffers(&[], &mut buffers, level, &pool).unwrap();
        assert!(sizes.is_empty());
    }

    #[test]
    fn inflate_parts_rejects_shape_mismatch() {
        let blocks = vec![BlockDescriptor { deflated: &[], inflated_size: 0, crc: 0 }];
        let mut d0 = [0u8; 0];
        let mut dests: Vec<&mut [u8]> = vec![&mut d0, &mut []];
        let pool = build_pool(1).unwrap();
        let err = inflate_parts(&blocks, &mut dests, &pool).unwrap_err();
        assert!(matches!(err, BgzfError::BatchShapeMismatch { .. }));
    }

    #[test]
    fn inflate_parts_rejects_oversized_batch() {
        let blocks = vec![BlockDescriptor { deflated: &[], inflated_size: 0, crc: 0 }; BLOCK_BATCH_SIZE + 1];
        let mut dests: Vec<&mut [u8]> = blocks.iter().map(|_| &mut [][..]).collect();
        let pool = build_pool(1).unwrap();
        let err = inflate_parts(&blocks, &mut dests, &pool).unwrap_err();
        assert!(matches!(err, BgzfError::BatchTooLarge(_)));
    }

    #[test]
    fn inflate_parts_round_trips_a_batch() {
        let level = CompressionLevel::new(6).unwrap();
        let payloads: Vec<Vec<u8>> =
            (0..16).map(|i| vec![(i % 251) as u8; 1000 + i * 7]).collect();
        let mut deflated = vec![];
        let mut offsets = vec![];
        for p in &payloads {
            let mut out = vec![0u8; p.len() + crate::BLOCK_METADATA_SIZE + 128];
            let len = compress_block(p, &mut out, level).unwrap();
            offsets.push((deflated.len(), len));
            deflated.extend_from_slice(&out[..len]);
        }

        let descriptors: Vec<BlockDescriptor<'_>> = payloads
            .iter()
            .zip(&offsets)
            .map(|(p, (start, len))| {
                let block = &deflated[*start..*start + *len];
                let payload_start = crate::framing::HEADER_SIZE + crate::framing::SUBFIELD_SIZE;
                let tailer_start = len - crate::framing::TAILER_SIZE;
                BlockDescriptor {
                    deflated: &block[payload_start..tailer_start],
                    inflated_size: p.len() as u32,
                    crc: {
                        let mut c = libdeflater::Crc::new();
                        c.update(p);
                        c.sum()
                    },
                }
            })
            .collect();

        let mut dst_storage: Vec<Vec<u8>> =
            payloads.iter().map(|p| vec![0u8; p.len()]).collect();
        let mut dst_parts: Vec<&mut [u8]> = dst_storage.iter_mut().map(|v| v.as_mut_slice()).collect();

        let pool = build_pool(4).unwrap();
        let results = inflate_parts(&descriptors, &mut dst_parts, &pool).unwrap();
        for r in &results {
            r.as_ref().unwrap();
        }
        for (got, want) in dst_storage.iter().zip(&payloads) {
            assert_eq!(got, want);
        }
    }
}
