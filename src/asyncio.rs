//! Background-threaded wrappers around [`crate::Reader`]/[`crate::Writer`] that overlap a
//! caller's I/O with this crate's own batch (de)compression, at the cost of one extra thread
//! and a bounded channel of buffered chunks.
use std::io::{self, Read, Write};
use std::thread::JoinHandle;

use bytes::{Buf, Bytes};
use flume::{Receiver, Sender};

use crate::{CompressionLevel, Reader, Writer, BUFSIZE};

/// Builder for [`AsyncWriter`].
pub struct AsyncWriterBuilder {
    num_threads: usize,
    channel_capacity: usize,
}

impl AsyncWriterBuilder {
    /// Create a builder with the library defaults: [`num_cpus::get`] worker threads for the
    /// inner batch writer, and a channel capacity of 2 buffered chunks (one batch of
    /// double-buffering headroom).
    pub fn new() -> Self {
        Self { num_threads: num_cpus::get(), channel_capacity: 2 }
    }

    /// Set the number of worker threads the inner [`Writer`] uses to deflate each batch.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Set how many chunks may be buffered in the channel to the background thread before
    /// `write` blocks.
    pub fn channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity.max(1);
        self
    }

    /// Spawn the background thread and return the configured [`AsyncWriter`].
    pub fn build<W>(self, writer: W, level: CompressionLevel) -> AsyncWriter<W>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = flume::bounded(self.channel_capacity);
        let num_threads = self.num_threads;
        let handle = std::thread::spawn(move || -> io::Result<()> {
            let mut inner = Writer::builder(writer).num_threads(num_threads).build(level);
            while let Ok(chunk) = rx.recv() {
                inner.write_all(&chunk)?;
            }
            inner.finish()
        });
        AsyncWriter { tx: Some(tx), handle: Some(handle), finished: false }
    }
}

impl Default for AsyncWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`Writer`] running on a background thread, so that callers can keep filling the next
/// chunk while the previous one is still being deflated and written out.
///
/// `finish` (or `Drop`) must run to completion for the stream to be valid; both join the
/// background thread and surface any I/O or framing error it encountered.
pub struct AsyncWriter<W>
where
    W: Write + Send + 'static,
{
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<io::Result<()>>>,
    finished: bool,
}

impl<W> AsyncWriter<W>
where
    W: Write + Send + 'static,
{
    /// Create an [`AsyncWriter`] with the default background thread count and channel depth.
    pub fn new(writer: W, level: CompressionLevel) -> Self {
        AsyncWriterBuilder::new().build(writer, level)
    }

    /// Start building an [`AsyncWriter`], to configure thread count or channel depth.
    pub fn builder() -> AsyncWriterBuilder {
        AsyncWriterBuilder::new()
    }

    /// Send remaining buffered bytes to the background thread, signal end of stream, and wait
    /// for it to finish writing the terminator block. Safe to call more than once.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        drop(self.tx.take());
        let result = match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => Ok(()),
        };
        self.finished = true;
        result
    }
}

impl<W> Write for AsyncWriter<W>
where
    W: Write + Send + 'static,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::Other, "write after finish"));
        };
        tx.send(buf.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W> Drop for AsyncWriter<W>
where
    W: Write + Send + 'static,
{
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish();
        }
    }
}

/// Builder for [`AsyncReader`].
pub struct AsyncReaderBuilder {
    num_threads: usize,
    channel_capacity: usize,
}

impl AsyncReaderBuilder {
    /// Create a builder with the library defaults: [`num_cpus::get`] worker threads for the
    /// inner batch reader, and a channel capacity of 4 read-ahead chunks.
    pub fn new() -> Self {
        Self { num_threads: num_cpus::get(), channel_capacity: 4 }
    }

    /// Set the number of worker threads the inner [`Reader`] uses to inflate each batch.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Set how many inflated chunks may be read ahead and buffered in the channel.
    pub fn channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity.max(1);
        self
    }

    /// Spawn the background thread and return the configured [`AsyncReader`].
    pub fn build<R>(self, reader: R) -> AsyncReader<R>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx): (Sender<io::Result<Bytes>>, Receiver<io::Result<Bytes>>) =
            flume::bounded(self.channel_capacity);
        let num_threads = self.num_threads;
        let handle = std::thread::spawn(move || {
            let mut inner = Reader::with_threads(reader, num_threads);
            let mut buf = vec![0u8; BUFSIZE];
            loop {
                match inner.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });
        AsyncReader { rx, handle: Some(handle), current: Bytes::new(), poisoned: false }
    }
}

impl Default for AsyncReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`Reader`] running on a background thread, so the inflated stream is read ahead of the
/// caller's own consumption.
pub struct AsyncReader<R>
where
    R: Read + Send + 'static,
{
    rx: Receiver<io::Result<Bytes>>,
    handle: Option<JoinHandle<()>>,
    current: Bytes,
    poisoned: bool,
}

impl<R> AsyncReader<R>
where
    R: Read + Send + 'static,
{
    /// Create an [`AsyncReader`] with the default background thread count and channel depth.
    pub fn new(reader: R) -> Self {
        AsyncReaderBuilder::new().build(reader)
    }

    /// Start building an [`AsyncReader`], to configure thread count or channel depth.
    pub fn builder() -> AsyncReaderBuilder {
        AsyncReaderBuilder::new()
    }
}

impl<R> Read for AsyncReader<R>
where
    R: Read + Send + 'static,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(io::Error::new(io::ErrorKind::Other, "reader previously failed"));
        }
        if !self.current.has_remaining() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => self.current = chunk,
                Ok(Err(e)) => {
                    self.poisoned = true;
                    return Err(e);
                }
                Err(_) => return Ok(0), // background thread exited: clean EOF.
            }
        }
        let take = std::cmp::min(self.current.remaining(), buf.len());
        self.current.copy_to_slice(&mut buf[..take]);
        Ok(take)
    }
}

impl<R> Drop for AsyncReader<R>
where
    R: Read + Send + 'static,
{
    fn drop(&mut self) {
        // Dropping `rx` unblocks a background thread waiting to send; join to avoid leaking it.
        drop(std::mem::replace(&mut self.current, Bytes::new()));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
