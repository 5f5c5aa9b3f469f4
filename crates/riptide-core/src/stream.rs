//! Input stream abstraction.
//!
//! The hasher consumes an ordered, finite sequence of byte chunks whose total
//! length is declared up front. [`ChunkStream`] is the single-consumer
//! contract; [`MemoryStream`] and [`ReaderStream`] adapt the two common
//! producers (in-memory buffers and tokio readers).

use std::future::Future;
use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{HashError, Result};

/// An asynchronous byte source.
///
/// Produces chunks of arbitrary size in input order, then `None` at EOF.
/// Implementations surface their own failures as `io::Error`; the hasher
/// passes them through unchanged.
pub trait ChunkStream: Send {
    /// Fetch the next chunk, or `None` at end of stream.
    ///
    /// Must be cancel-safe: the hasher polls this inside a `select!` loop and
    /// may drop an in-flight call to service a worker reply, then issue a
    /// fresh one. A dropped call must not lose bytes. Both provided adapters
    /// satisfy this.
    fn next_chunk(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;
}

/// Stream over an in-memory buffer, split at a fixed granularity.
#[derive(Debug)]
pub struct MemoryStream {
    data: Bytes,
    chunk_size: usize,
    pos: usize,
}

impl MemoryStream {
    /// Default chunk granularity (64 KiB).
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    /// Stream `data` in chunks of [`Self::DEFAULT_CHUNK_SIZE`].
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_chunk_size(data, Self::DEFAULT_CHUNK_SIZE)
    }

    /// Stream `data` in chunks of `chunk_size` bytes.
    #[must_use]
    pub fn with_chunk_size(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be at least 1");
        Self {
            data: data.into(),
            chunk_size,
            pos: 0,
        }
    }
}

impl ChunkStream for MemoryStream {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = usize::min(self.pos + self.chunk_size, self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(Some(chunk))
    }
}

/// Stream over any tokio [`AsyncRead`], e.g. a file or socket.
#[derive(Debug)]
pub struct ReaderStream<R> {
    reader: R,
    read_size: usize,
}

impl<R: AsyncRead + Unpin + Send> ReaderStream<R> {
    /// Default read-buffer size (256 KiB).
    pub const DEFAULT_READ_SIZE: usize = 256 * 1024;

    /// Wrap `reader` with the default read-buffer size.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self::with_read_size(reader, Self::DEFAULT_READ_SIZE)
    }

    /// Wrap `reader`, reading up to `read_size` bytes per chunk.
    #[must_use]
    pub fn with_read_size(reader: R, read_size: usize) -> Self {
        assert!(read_size > 0, "read_size must be at least 1");
        Self { reader, read_size }
    }
}

impl<R: AsyncRead + Unpin + Send> ChunkStream for ReaderStream<R> {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; self.read_size];
        let n = self.reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

/// Drain a stream that must deliver exactly `total_size` bytes.
///
/// Used by the small-input and single-leaf shortcuts, which hash the whole
/// input in one shot.
///
/// # Errors
///
/// Fails with [`HashError::Stream`] when the stream errors, ends early, or
/// delivers more than `total_size` bytes.
pub(crate) async fn drain<S: ChunkStream>(stream: &mut S, total_size: u64) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(usize::try_from(total_size).unwrap_or(0));
    while let Some(chunk) = stream.next_chunk().await? {
        if data.len() as u64 + chunk.len() as u64 > total_size {
            return Err(HashError::Stream(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream delivered more than the declared {total_size} bytes"),
            )));
        }
        data.extend_from_slice(&chunk);
    }
    if (data.len() as u64) < total_size {
        return Err(HashError::Stream(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "stream ended after {} of {total_size} declared bytes",
                data.len()
            ),
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_stream_chunking() {
        let mut stream = MemoryStream::with_chunk_size(vec![7u8; 10], 4);
        let mut sizes = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_memory_stream_empty() {
        let mut stream = MemoryStream::new(Vec::new());
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_stream() {
        let data = vec![3u8; 1000];
        let mut stream = ReaderStream::with_read_size(&data[..], 300);
        let mut total = 0;
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            total += chunk.len();
        }
        assert_eq!(total, 1000);
    }

    #[tokio::test]
    async fn test_drain_exact() {
        let mut stream = MemoryStream::with_chunk_size(vec![1u8; 100], 7);
        let data = drain(&mut stream, 100).await.unwrap();
        assert_eq!(data, vec![1u8; 100]);
    }

    #[tokio::test]
    async fn test_drain_short_stream_fails() {
        let mut stream = MemoryStream::new(vec![1u8; 50]);
        let err = drain(&mut stream, 100).await.unwrap_err();
        assert!(matches!(err, HashError::Stream(_)));
    }

    #[tokio::test]
    async fn test_drain_long_stream_fails() {
        let mut stream = MemoryStream::new(vec![1u8; 150]);
        let err = drain(&mut stream, 100).await.unwrap_err();
        assert!(matches!(err, HashError::Stream(_)));
    }
}
