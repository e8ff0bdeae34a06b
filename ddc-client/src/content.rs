//! Content sources accepted by the client

use bytes::Bytes;
use ddc_core::error::DdcError;
use ddc_storage::ByteStream;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Bytes to be stored: either fully in memory or arriving as a stream
pub enum Content {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl Content {
    /// Content read from an async reader until EOF
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Content::Stream(
            ReaderStream::new(reader)
                .map_err(DdcError::from)
                .boxed(),
        )
    }

    /// Size if known up front
    pub fn size_hint(&self) -> Option<usize> {
        match self {
            Content::Bytes(bytes) => Some(bytes.len()),
            Content::Stream(_) => None,
        }
    }

    /// Convert into a stream of buffers
    pub fn into_stream(self) -> ByteStream {
        match self {
            Content::Bytes(bytes) if bytes.is_empty() => stream::empty().boxed(),
            Content::Bytes(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Content::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Content::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Content::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Content {
    fn from(bytes: Bytes) -> Self {
        Content::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Content {
    fn from(data: Vec<u8>) -> Self {
        Content::Bytes(Bytes::from(data))
    }
}

impl From<String> for Content {
    fn from(data: String) -> Self {
        Content::Bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Content {
    fn from(data: &'static [u8]) -> Self {
        Content::Bytes(Bytes::from_static(data))
    }
}

impl From<&'static str> for Content {
    fn from(data: &'static str) -> Self {
        Content::Bytes(Bytes::from_static(data.as_bytes()))
    }
}

impl From<ByteStream> for Content {
    fn from(stream: ByteStream) -> Self {
        Content::Stream(stream)
    }
}
