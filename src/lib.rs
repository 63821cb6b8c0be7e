//! # axum-byteranges
//!
//! HTTP range requests for [`axum`][1]: resolve `Range` / `If-Range` request
//! headers against an entity, then serve either a single byte range or a
//! `multipart/byteranges` document.
//!
//! Bodies can be cut from four kinds of [`RangeSource`]: a seekable
//! [`FileHandle`] (any [`AsyncRead`](tokio::io::AsyncRead) + [`AsyncSeekStart`]), a forward-only
//! byte stream, a byte buffer, or a string.
//!
//! [`AsyncSeekStart`] is a trait defined by this crate which only allows
//! seeking from the start of a file. It is automatically implemented for any
//! type implementing [`AsyncSeek`].
//!
//! ```no_run
//! use axum::Router;
//! use axum::http::{HeaderMap, StatusCode};
//! use axum::response::{IntoResponse, Response};
//! use axum::routing::get;
//!
//! use axum_byteranges::{FileHandle, RangeOptions, Ranged, guess_content_type};
//!
//! async fn file(headers: HeaderMap) -> Response {
//!     let Ok((handle, meta)) = FileHandle::open("document.txt").await else {
//!         return StatusCode::NOT_FOUND.into_response();
//!     };
//!     let mut options = RangeOptions::default();
//!     options.content_type = guess_content_type("document.txt");
//!     Ranged::new(&headers, handle, meta).options(options).into_response()
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::<()>::new().route("/", get(file));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! [1]: https://docs.rs/axum

mod error;
pub mod etag;
mod file;
mod multipart;
mod options;
mod resolve;
mod respond;
mod source;
mod stream;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{ContentRange, HeaderMap, HeaderMapExt, HeaderValue, LastModified};
use tokio::io::AsyncSeek;
use tracing::warn;

pub use error::{RangeError, SourceError};
pub use file::{FileHandle, SeekRead};
pub use multipart::MultipartStream;
pub use options::{RangeOptions, DEFAULT_BOUNDARY, DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_TYPE};
pub use resolve::{parse_range, resolve, EntityMeta, RangeResolution};
pub use respond::respond_range;
pub use source::{guess_content_type, RangeSource, SourceKind};
pub use stream::{ByteRangeStream, RangedStream};

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// A single byte range, zero-indexed with both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    /// Number of bytes covered, never zero for a valid range.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether `start <= end < size`.
    pub fn fits(&self, size: u64) -> bool {
        self.start <= self.end && self.end < size
    }

    /// `Content-Range` header value for this range of a `size` byte entity.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// The main responder type. Implements [`IntoResponse`].
///
/// Resolves the request's `Range` and `If-Range` headers against the entity
/// and answers with the full entity (200), the requested ranges (206), or
/// [`RangeNotSatisfiable`] (416).
#[derive(Debug)]
pub struct Ranged {
    request: HeaderMap,
    source: RangeSource,
    entity: EntityMeta,
    options: RangeOptions,
}

impl Ranged {
    pub fn new(request: &HeaderMap, source: impl Into<RangeSource>, entity: EntityMeta) -> Self {
        Ranged {
            request: request.clone(),
            source: source.into(),
            entity,
            options: RangeOptions::default(),
        }
    }

    pub fn options(mut self, options: RangeOptions) -> Self {
        self.options = options;
        self
    }

    /// Responds to the request. Returns [`RangeNotSatisfiable`] error if the
    /// requested range in header was not satisfiable.
    pub fn try_respond(self) -> Result<Response, RangeNotSatisfiable> {
        let size = self.entity.size;
        let resolution = resolve(&self.request, &self.entity, self.source.as_bytes());
        let validators = self.validators();

        match resolution {
            RangeResolution::Unsatisfiable => Err(RangeNotSatisfiable(ContentRange::unsatisfied_bytes(size))),
            RangeResolution::Satisfiable(None) => Ok(self.full(validators)),
            RangeResolution::Satisfiable(Some(ranges)) => {
                match respond_range(self.source, size, &ranges, validators, &self.options) {
                    Ok(response) => Ok(response),
                    Err(err) => {
                        warn!(error = %err, "failed to build range response");
                        Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
                    }
                }
            }
        }
    }

    /// `ETag` and `Last-Modified` headers for the entity. In-memory sources
    /// get a strong tag, everything else a weak one.
    fn validators(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(mtime) = self.entity.mtime {
            headers.typed_insert(LastModified::from(mtime));
        }
        let tag = match self.source.as_bytes() {
            Some(content) => etag::strong(content),
            None => etag::weak(&self.entity),
        };
        if let Ok(tag) = HeaderValue::from_str(&tag) {
            headers.insert(ETAG, tag);
        }
        headers
    }

    fn full(self, mut headers: HeaderMap) -> Response {
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.entity.size));
        let content_type = HeaderValue::from_str(self.options.content_type_or_default());
        if let Ok(content_type) = content_type {
            headers.entry(CONTENT_TYPE).or_insert(content_type);
        }

        let stream = RangedStream::full(self.source, self.entity.size, &self.options);
        (StatusCode::OK, headers, stream).into_response()
    }
}

impl IntoResponse for Ranged {
    fn into_response(self) -> Response {
        self.try_respond().into_response()
    }
}

/// Error type indicating that the requested range was not satisfiable. Implements [`IntoResponse`].
#[derive(Debug, Clone)]
pub struct RangeNotSatisfiable(pub ContentRange);

impl IntoResponse for RangeNotSatisfiable {
    fn into_response(self) -> Response {
        let status = StatusCode::RANGE_NOT_SATISFIABLE;
        let header = TypedHeader(self.0);
        (status, header, ()).into_response()
    }
}
