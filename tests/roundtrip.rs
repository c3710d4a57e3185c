//! End-to-end scenarios for the BGZF reader/writer pair, driven only through the public API.
//!
//! Covers: an empty stream, a single sub-block, an exact chunk-boundary block, a multi-block
//! stream read back with several worker threads, truncation, and a corrupted checksum.
use std::io::{Read, Write};

use bgzf_parallel::{CompressionLevel, Decompressor, Reader, Writer, BLOCK_DATA_INFLATED_SIZE};

fn write_bgzf(input: &[u8], num_threads: usize) -> Vec<u8> {
    let mut out = vec![];
    let mut writer = Writer::builder(&mut out).num_threads(num_threads).build(CompressionLevel::best());
    writer.write_all(input).unwrap();
    writer.finish().unwrap();
    out
}

fn read_bgzf(data: &[u8], num_threads: usize) -> std::io::Result<Vec<u8>> {
    let mut reader = Reader::with_threads(data, num_threads);
    let mut out = vec![];
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// Like [`read_bgzf`], but returns whatever bytes were delivered before a failure alongside
/// the error, instead of discarding them. `Read::read_to_end` leaves already-read bytes in
/// `buf` even when a later `read` call errors.
fn read_bgzf_until_error(data: &[u8], num_threads: usize) -> (Vec<u8>, std::io::Error) {
    let mut reader = Reader::with_threads(data, num_threads);
    let mut out = vec![];
    let err = reader.read_to_end(&mut out).unwrap_err();
    (out, err)
}

/// Walk a BGZF stream block by block using the public one-block-at-a-time [`Decompressor`],
/// returning the byte offset and total on-wire length of every block, including the final
/// empty terminator.
fn block_offsets(data: &[u8]) -> Vec<(usize, usize)> {
    let mut decompressor = Decompressor::new();
    let mut offsets = vec![];
    let mut pos = 0;
    while pos < data.len() {
        let (_bytes, consumed) = decompressor.decompress_one(&data[pos..]).unwrap();
        offsets.push((pos, consumed));
        pos += consumed;
    }
    offsets
}

#[test]
fn s1_empty_stream_is_eof() {
    let data = write_bgzf(b"", 1);
    let decoded = read_bgzf(&data, 1).unwrap();
    assert!(decoded.is_empty());

    let offsets = block_offsets(&data);
    assert_eq!(offsets.len(), 1, "only the terminator block should be present");
}

#[test]
fn s2_single_sub_block_round_trips() {
    let input = vec![b'a'; 1024];
    let data = write_bgzf(&input, 1);
    let decoded = read_bgzf(&data, 1).unwrap();
    assert_eq!(decoded, input);

    let offsets = block_offsets(&data);
    assert_eq!(offsets.len(), 2, "one data block plus the terminator");
}

#[test]
fn s3_exact_chunk_boundary_round_trips() {
    let input: Vec<u8> = (0..BLOCK_DATA_INFLATED_SIZE).map(|i| (i % 256) as u8).collect();
    let data = write_bgzf(&input, 1);
    let decoded = read_bgzf(&data, 1).unwrap();
    assert_eq!(decoded, input);

    let offsets = block_offsets(&data);
    assert_eq!(offsets.len(), 2, "exactly one full data block plus the terminator");
}

#[test]
fn s4_multi_block_stream_round_trips_with_four_threads() {
    let input: Vec<u8> = (0..1_000_000u32).map(|i| (i % 256) as u8).collect();
    let data = write_bgzf(&input, 4);
    let decoded = read_bgzf(&data, 4).unwrap();
    assert_eq!(decoded, input);

    let offsets = block_offsets(&data);
    let expected_data_blocks = input.len().div_ceil(BLOCK_DATA_INFLATED_SIZE);
    assert_eq!(offsets.len(), expected_data_blocks + 1);
}

#[test]
fn s5_truncated_stream_fails_with_insufficient_bytes() {
    let input = vec![b'q'; 200_000];
    let mut data = write_bgzf(&input, 2);
    data.pop(); // truncate only the terminator block; every data block stays intact

    let (decoded, err) = read_bgzf_until_error(&data, 1);
    assert_eq!(err.kind(), std::io::ErrorKind::Other);
    assert_eq!(
        decoded, input,
        "bytes from the preceding complete blocks must be delivered before the failure"
    );
}

#[test]
fn s6_corrupted_crc_in_second_block_fails_with_crc_mismatch() {
    let input: Vec<u8> = (0..1_000_000u32).map(|i| (i % 256) as u8).collect();
    let mut data = write_bgzf(&input, 1);

    let offsets = block_offsets(&data);
    assert!(offsets.len() >= 3, "need at least two data blocks plus a terminator");
    let (second_block_start, second_block_len) = offsets[1];
    let crc_start = second_block_start + second_block_len - 8;
    data[crc_start] ^= 0xff;

    let err = read_bgzf(&data, 1).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::Other);
    assert!(err.to_string().contains("checksum"));
}

#[test]
fn order_is_preserved_across_worker_threads() {
    // Distinct, non-repeating content per chunk makes a block swap or reorder detectable.
    let chunks: Vec<Vec<u8>> =
        (0u8..20).map(|i| vec![i; BLOCK_DATA_INFLATED_SIZE]).collect();
    let input: Vec<u8> = chunks.concat();

    let data = write_bgzf(&input, 6);
    let decoded = read_bgzf(&data, 6).unwrap();
    assert_eq!(decoded, input);
}

#[test]
fn reading_is_insensitive_to_caller_buffer_size() {
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

#[test]
fn writer_thread_count_does_not_change_decoded_output() {
    let input: Vec<u8> = (0..2_000_000u32).map(|i| (i % 256) as u8).collect();
    let baseline = read_bgzf(&write_bgzf(&input, 1), 1).unwrap();
    for num_threads in [2, 4, 8] {
        let decoded = read_bgzf(&write_bgzf(&input, num_threads), num_threads).unwrap();
        assert_eq!(decoded, baseline);
    }
}
