use std::io;

use axum::http::header::InvalidHeaderValue;
use thiserror::Error;

/// Caller errors reported synchronously by [`respond_range`](crate::respond_range),
/// before any body is streamed.
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("at least one byte range is required")]
    NoRanges,

    #[error("byte range {start}-{end} does not fit a resource of {size} bytes")]
    OutOfBounds { start: u64, end: u64, size: u64 },

    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

/// Failures of a byte source while a range is being streamed. Surfaced to the
/// consumer wrapped in an [`io::Error`], see [`SourceError::into_io`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source has been closed")]
    Closed,

    #[error("source ended at byte {position}, range needs bytes up to {end}")]
    Exhausted { position: u64, end: u64 },

    #[error("range starting at {start} precedes the stream position {position}")]
    Unordered { start: u64, position: u64 },
}

impl SourceError {
    pub fn into_io(self) -> io::Error {
        let kind = match self {
            SourceError::Closed => io::ErrorKind::BrokenPipe,
            SourceError::Exhausted { .. } => io::ErrorKind::UnexpectedEof,
            SourceError::Unordered { .. } => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, self)
    }
}

impl From<SourceError> for io::Error {
    fn from(err: SourceError) -> io::Error {
        err.into_io()
    }
}
