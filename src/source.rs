use std::io;
use std::path::Path;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};

use crate::FileHandle;

/// The byte sources a range body can be cut from.
pub enum RangeSource {
    /// Random access: each range is seeked to and read independently.
    File(FileHandle),
    /// Forward only: ranges are cut from a single pass over the stream.
    Stream(BoxStream<'static, io::Result<Bytes>>),
    Bytes(Bytes),
    Text(String),
}

/// Capability class of a [`RangeSource`], which decides the extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Seekable,
    Stream,
    Memory,
}

impl RangeSource {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        RangeSource::Stream(stream.boxed())
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            RangeSource::File(_) => SourceKind::Seekable,
            RangeSource::Stream(_) => SourceKind::Stream,
            RangeSource::Bytes(_) | RangeSource::Text(_) => SourceKind::Memory,
        }
    }

    /// Full content, available for in-memory sources only.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RangeSource::Bytes(bytes) => Some(bytes),
            RangeSource::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for RangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeSource::File(handle) => f.debug_tuple("File").field(handle).finish(),
            RangeSource::Stream(_) => f.write_str("Stream"),
            RangeSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RangeSource::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
        }
    }
}

impl From<FileHandle> for RangeSource {
    fn from(handle: FileHandle) -> Self {
        RangeSource::File(handle)
    }
}

impl From<tokio::fs::File> for RangeSource {
    fn from(file: tokio::fs::File) -> Self {
        RangeSource::File(FileHandle::new(file))
    }
}

impl From<Bytes> for RangeSource {
    fn from(bytes: Bytes) -> Self {
        RangeSource::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RangeSource {
    fn from(bytes: Vec<u8>) -> Self {
        RangeSource::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for RangeSource {
    fn from(bytes: &'static [u8]) -> Self {
        RangeSource::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for RangeSource {
    fn from(text: String) -> Self {
        RangeSource::Text(text)
    }
}

impl From<&'static str> for RangeSource {
    fn from(text: &'static str) -> Self {
        RangeSource::Text(text.to_string())
    }
}

impl From<axum::body::Body> for RangeSource {
    fn from(body: axum::body::Body) -> Self {
        RangeSource::stream(body.into_data_stream().map_err(io::Error::other))
    }
}

/// Guesses a `Content-Type` from the file extension of `path`.
pub fn guess_content_type(path: impl AsRef<Path>) -> Option<String> {
    mime_guess::from_path(path).first().map(|mime| mime.to_string())
}
