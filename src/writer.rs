//! A BGZF writer that chunks input into [`BLOCK_DATA_INFLATED_SIZE`]-byte units and deflates
//! batches of up to [`BLOCK_BATCH_SIZE`] of them in parallel.
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
};

use bytes::BytesMut;

use crate::batch::{build_pool, deflate_to_buffers};
use crate::{
    CompressionLevel, BGZF_EOF, BLOCK_BATCH_SIZE, BLOCK_DATA_INFLATED_SIZE, BUFSIZE,
    MIN_OUTPUT_BUFFER_SIZE,
};

/// Builder for [`Writer`], mirroring the teacher's plain constructors plus a thread count.
pub struct WriterBuilder<W>
where
    W: Write,
{
    writer: W,
    num_threads: usize,
}

impl<W> WriterBuilder<W>
where
    W: Write,
{
    /// Set the number of worker threads used to deflate each batch. Defaults to
    /// [`num_cpus::get`].
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Finish building the [`Writer`] with the given compression level.
    ///
    /// `output_pool` is sized to [`MIN_OUTPUT_BUFFER_SIZE`] per block up front, per SPEC_FULL.md
    /// §4.5's "preallocated and reused across batches" — the batch engine must never need to
    /// grow a buffer once inside its parallel region.
    pub fn build(self, level: CompressionLevel) -> Writer<W> {
        Writer {
            uncompressed_buffer: BytesMut::with_capacity(BUFSIZE),
            output_pool: vec![vec![0u8; MIN_OUTPUT_BUFFER_SIZE]; BLOCK_BATCH_SIZE],
            level,
            num_threads: self.num_threads,
            pool: None,
            writer: self.writer,
            finished: false,
        }
    }
}

/// A BGZF writer.
///
/// # Example
///
/// ```rust
/// use bgzf_parallel::{CompressionLevel, Writer};
/// use std::error::Error;
/// use std::io::Write;
///
/// fn main() -> Result<(), Box<dyn Error>> {
///     let mut destination = vec![];
///     let mut writer = Writer::new(&mut destination, 2.try_into()?);
///     let input = &[b'A'; 100];
///     writer.write_all(input)?;
///     writer.finish()?;
///
///     assert!(destination.len() < input.len());
///     Ok(())
/// }
/// ```
pub struct Writer<W>
where
    W: Write,
{
    /// Bytes accumulated but not yet deflated.
    uncompressed_buffer: BytesMut,
    /// Per-block output buffers, allocated once and reused across batches.
    output_pool: Vec<Vec<u8>>,
    level: CompressionLevel,
    num_threads: usize,
    /// The `rayon` pool this writer's batches run on, built lazily on the first `flush_batch`
    /// and then cached for the writer's lifetime, so worker threads (and the thread-local
    /// `Compressor` each one caches) are spawned once, not once per batch.
    pool: Option<rayon::ThreadPool>,
    writer: W,
    finished: bool,
}

impl<W> Writer<W>
where
    W: Write,
{
    /// Create a new [`Writer`] with a single worker thread.
    pub fn new(writer: W, level: CompressionLevel) -> Self {
        Self::builder(writer).build(level)
    }

    /// Start building a [`Writer`], to configure thread count.
    pub fn builder(writer: W) -> WriterBuilder<W> {
        WriterBuilder { writer, num_threads: num_cpus::get() }
    }

    /// Deflate and emit a batch covering the first `take` bytes of the accumulator. `take`
    /// must be at most `BLOCK_BATCH_SIZE * BLOCK_DATA_INFLATED_SIZE`.
    fn flush_batch(&mut self, take: usize) -> io::Result<()> {
        let prefix = self.uncompressed_buffer.split_to(take).freeze();
        let number_of_chunks = take.div_ceil(BLOCK_DATA_INFLATED_SIZE).max(1).min(BLOCK_BATCH_SIZE);
        if self.pool.is_none() {
            self.pool = Some(build_pool(self.num_threads).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?);
        }
        let pool = self.pool.as_ref().unwrap();
        let sizes = deflate_to_buffers(&prefix, &mut self.output_pool[..number_of_chunks], self.level, pool)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        for (buffer, size) in self.output_pool.iter().zip(&sizes) {
            self.writer.write_all(&buffer[..*size])?;
        }
        Ok(())
    }

    /// Drain the accumulator completely, deflating as many batches as needed. Does not write
    /// the end-of-stream terminator.
    fn drain(&mut self) -> io::Result<()> {
        const BATCH_CAP: usize = BLOCK_BATCH_SIZE * BLOCK_DATA_INFLATED_SIZE;
        while !self.uncompressed_buffer.is_empty() {
            let take = std::cmp::min(self.uncompressed_buffer.len(), BATCH_CAP);
            self.flush_batch(take)?;
        }
        Ok(())
    }

    /// Flush remaining buffered bytes, append the BGZF end-of-stream terminator, and flush the
    /// underlying sink. Must be called (directly, or implicitly via `Drop`) to produce a valid
    /// BGZF stream.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.drain()?;
        self.writer.write_all(BGZF_EOF)?;
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }
}

impl Writer<File> {
    /// Create a BGZF writer from a [`Path`].
    pub fn from_path<P>(path: P, level: CompressionLevel) -> io::Result<Self>
    where
        P: AsRef<Path>,
    {
        File::create(path).map(|f| Self::new(f, level))
    }
}

impl<W> Write for Writer<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        const BATCH_CAP: usize = BLOCK_BATCH_SIZE * BLOCK_DATA_INFLATED_SIZE;
        self.uncompressed_buffer.extend_from_slice(buf);
        while self.uncompressed_buffer.len() >= BATCH_CAP {
            self.flush_batch(BATCH_CAP)?;
        }
        Ok(buf.len())
    }

    /// Flush this output stream, deflating and emitting all buffered bytes. Unlike `finish`,
    /// this does not write the end-of-stream terminator, so more data may still be written
    /// afterwards.
    fn flush(&mut self) -> io::Result<()> {
        self.drain()?;
        self.writer.flush()
    }
}

impl<W> Drop for Writer<W>
where
    W: Write,
{
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish();
        }
    }
}
