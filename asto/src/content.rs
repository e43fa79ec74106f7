//! Lazy byte-stream bodies
//!
//! [`Content`] wraps a producer of [`Bytes`] chunks plus an optional declared
//! size. Nothing is pulled from the producer until a consumer polls the
//! stream, so handing a never-ending producer to a storage does not block the
//! caller. A `Content` is consumed by value and can be drained only once.
//!
//! # Example
//!
//! ```
//! use asto::Content;
//!
//! # futures::executor::block_on(async {
//! let content = Content::from("42");
//! assert_eq!(content.size(), Some(2));
//! assert_eq!(content.parse::<u32>().await.unwrap(), 42);
//! # });
//! ```

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ContentError;

/// Chunk size used by [`Content::from_reader`]
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on buffer space reserved up front from a declared size
const MAX_PREALLOC: usize = 1024 * 1024;

/// Single-consumption stream of byte chunks
pub struct Content {
    size: Option<u64>,
    chunks: BoxStream<'static, io::Result<Bytes>>,
}

impl Content {
    /// Content with no bytes
    #[must_use]
    pub fn empty() -> Self {
        Self {
            size: Some(0),
            chunks: stream::empty().boxed(),
        }
    }

    /// Wrap a chunk producer
    ///
    /// `size` is the declared total length, `None` when unknown. The
    /// producer is not polled here.
    pub fn from_stream<S>(chunks: S, size: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            size,
            chunks: chunks.boxed(),
        }
    }

    /// Adapt an async reader; chunks are read on demand
    pub fn from_reader<R>(reader: R, size: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunks = stream::try_unfold(reader, |mut reader| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let n = reader.read_buf(&mut buf).await?;
            let next = if n == 0 {
                None
            } else {
                Some((buf.freeze(), reader))
            };
            Ok::<_, io::Error>(next)
        });
        Self::from_stream(chunks, size)
    }

    /// Declared size, if known
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Drain and concatenate every chunk
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Io`] if the producer fails.
    pub async fn bytes(mut self) -> Result<Bytes, ContentError> {
        let first = match self.chunks.next().await {
            None => return Ok(Bytes::new()),
            Some(chunk) => chunk?,
        };
        // Single-chunk bodies are returned without copying
        let second = match self.chunks.next().await {
            None => return Ok(first),
            Some(chunk) => chunk?,
        };
        // The declared size is a hint from the producer, not a bound
        let received = first.len() + second.len();
        let capacity = self
            .size
            .and_then(|s| usize::try_from(s).ok())
            .map_or(received, |s| s.min(MAX_PREALLOC).max(received));
        let mut buf = BytesMut::with_capacity(capacity);
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);
        while let Some(chunk) = self.chunks.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Drain as UTF-8 text
    ///
    /// # Errors
    ///
    /// [`ContentError::Decode`] if the bytes are not valid UTF-8.
    pub async fn string(self) -> Result<String, ContentError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| ContentError::Decode(e.to_string()))
    }

    /// Drain as text and parse it
    ///
    /// # Errors
    ///
    /// [`ContentError::Decode`] if the text does not parse as `T`.
    pub async fn parse<T>(self) -> Result<T, ContentError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let text = self.string().await?;
        text.trim()
            .parse::<T>()
            .map_err(|e| ContentError::Decode(format!("'{text}': {e}")))
    }

    /// Drain and count bytes without keeping them
    ///
    /// # Errors
    ///
    /// [`ContentError::Io`] if the producer fails.
    pub async fn measure(mut self) -> Result<u64, ContentError> {
        let mut total = 0u64;
        while let Some(chunk) = self.chunks.next().await {
            total += chunk?.len() as u64;
        }
        Ok(total)
    }
}

impl Stream for Content {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Content {
    fn from(bytes: Bytes) -> Self {
        let size = Some(bytes.len() as u64);
        Self {
            size,
            chunks: stream::once(async move { Ok(bytes) }).boxed(),
        }
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Content {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from(Bytes::from_static(bytes))
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::from(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::from(Bytes::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn chunked(parts: &[&'static str]) -> Content {
        let chunks: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        Content::from_stream(stream::iter(chunks), None)
    }

    #[tokio::test]
    async fn test_bytes_concatenates_in_order() {
        let content = chunked(&["he", "llo", " ", "world"]);
        assert_eq!(content.size(), None);
        assert_eq!(&content.bytes().await.unwrap()[..], b"hello world");
    }

    #[tokio::test]
    async fn test_bytes_ignores_oversized_declared_size() {
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ];
        let content = Content::from_stream(stream::iter(chunks), Some(u64::MAX / 2));
        assert_eq!(&content.bytes().await.unwrap()[..], b"ab");
    }

    #[tokio::test]
    async fn test_from_bytes_has_known_size() {
        let content = Content::from(vec![1u8, 2, 3]);
        assert_eq!(content.size(), Some(3));
        assert_eq!(&content.bytes().await.unwrap()[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty() {
        let content = Content::empty();
        assert_eq!(content.size(), Some(0));
        assert!(content.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parse_integer() {
        assert_eq!(chunked(&["1", "23"]).parse::<i64>().await.unwrap(), 123);
    }

    #[tokio::test]
    async fn test_parse_rejects_non_numeric() {
        let err = Content::from("abc").parse::<i64>().await.unwrap_err();
        assert!(matches!(err, ContentError::Decode(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_string_rejects_invalid_utf8() {
        let err = Content::from(vec![0xff, 0xfe]).string().await.unwrap_err();
        assert!(matches!(err, ContentError::Decode(_)));
    }

    #[tokio::test]
    async fn test_producer_error_surfaces() {
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let err = Content::from_stream(stream::iter(chunks), None)
            .bytes()
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Io(_)));
    }

    #[tokio::test]
    async fn test_measure_counts_all_chunks() {
        let content = chunked(&["abc", "de", ""]);
        assert_eq!(content.measure().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_producer_is_lazy() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let chunks = stream::repeat_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"x"))
        })
        .take(3);

        let content = Content::from_stream(chunks, Some(3));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
        assert_eq!(content.measure().await.unwrap(), 3);
        assert_eq!(polled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_from_reader_streams_in_chunks() {
        let data = vec![7u8; READ_CHUNK_SIZE * 2 + 10];
        let content = Content::from_reader(io::Cursor::new(data.clone()), None);
        let chunks: Vec<Bytes> = content.map(|c| c.unwrap()).collect().await;
        assert!(chunks.len() >= 3);
        assert_eq!(chunks.concat(), data);
    }
}
