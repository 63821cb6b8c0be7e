use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tracing::{trace, warn};

use crate::error::SourceError;
use crate::file::{CloseGuard, FileCursor};
use crate::{ByteRange, RangeOptions, RangeSource};

/// Response body for a single byte range, or for the whole entity.
/// Implements [`Stream`], [`Body`], and [`IntoResponse`].
pub struct RangedStream {
    length: u64,
    inner: Inner,
}

enum Inner {
    Memory(Option<io::Result<Bytes>>),
    File {
        cursor: FileCursor,
        // dropped with the cursor: closes the source on completion,
        // failure, or cancellation
        _guard: CloseGuard,
    },
    Stream(ByteRangeStream<BoxStream<'static, io::Result<Bytes>>>),
    Done,
}

impl RangedStream {
    /// Streams exactly `range` out of `source`. The range must already have
    /// been validated against the source's size.
    pub fn new(source: RangeSource, range: ByteRange, options: &RangeOptions) -> Self {
        let inner = match source {
            RangeSource::Bytes(bytes) => Inner::Memory(Some(slice_range(&bytes, range))),
            RangeSource::Text(text) => Inner::Memory(Some(slice_range(&Bytes::from(text), range))),
            RangeSource::File(handle) => {
                trace!(?range, chunk_size = options.read_size(), "seeking file source");
                let cursor = FileCursor::new(handle.clone(), range, options.read_size());
                Inner::File { cursor, _guard: CloseGuard::new(handle, options.auto_close) }
            }
            RangeSource::Stream(stream) => {
                trace!(?range, "trimming forward-only source");
                Inner::Stream(ByteRangeStream::new(stream, range))
            }
        };

        RangedStream { length: range.len(), inner }
    }

    /// Streams the entire entity of `size` bytes.
    pub fn full(source: RangeSource, size: u64, options: &RangeOptions) -> Self {
        if size == 0 {
            if let RangeSource::File(handle) = source {
                if options.auto_close {
                    handle.close();
                }
            }
            return RangedStream { length: 0, inner: Inner::Done };
        }
        RangedStream::new(source, ByteRange::new(0, size - 1), options)
    }

    /// Exact number of bytes this body yields.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl std::fmt::Debug for RangedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedStream")
            .field("length", &self.length)
            .finish()
    }
}

impl IntoResponse for RangedStream {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl Body for RangedStream {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length)
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, Inner::Done | Inner::Memory(None))
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl Stream for RangedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.get_mut();

        let item = match &mut this.inner {
            Inner::Memory(slice) => slice.take(),
            Inner::File { cursor, .. } => match cursor.poll_chunk(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(item) => item,
            },
            Inner::Stream(stream) => match Pin::new(stream).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(item) => item,
            },
            Inner::Done => None,
        };

        match &item {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "range body failed");
                this.inner = Inner::Done;
            }
            None => this.inner = Inner::Done,
        }
        Poll::Ready(item)
    }
}

/// Cuts `range` out of an in-memory buffer, failing like an exhausted source
/// when the buffer is shorter than the range requires.
pub(crate) fn slice_range(bytes: &Bytes, range: ByteRange) -> io::Result<Bytes> {
    let len = bytes.len() as u64;
    if range.end >= len {
        return Err(SourceError::Exhausted { position: len, end: range.end }.into());
    }
    Ok(bytes.slice(range.start as usize..=range.end as usize))
}

/// Trims a forward-only byte stream down to one inclusive range.
///
/// Chunks before `range.start` are dropped, the chunk crossing `range.end` is
/// truncated, and the upstream is not polled again once the range is complete.
#[pin_project]
pub struct ByteRangeStream<S> {
    range: ByteRange,
    seen: u64,
    done: bool,
    #[pin]
    stream: S,
}

impl<S> ByteRangeStream<S> {
    pub fn new(stream: S, range: ByteRange) -> Self {
        ByteRangeStream { range, seen: 0, done: false, stream }
    }
}

impl<S: Stream<Item = io::Result<Bytes>>> Stream for ByteRangeStream<S> {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();
        let ByteRange { start, end } = *this.range;

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            let chunk = match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => chunk,
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    if *this.seen <= end {
                        let err = SourceError::Exhausted { position: *this.seen, end };
                        return Poll::Ready(Some(Err(err.into())));
                    }
                    return Poll::Ready(None);
                }
            };

            let chunk_start = *this.seen;
            let chunk_end = chunk_start + chunk.len() as u64;
            *this.seen = chunk_end;

            if chunk_end <= start {
                continue;
            }
            if chunk_end > end {
                *this.done = true;
            }

            let from = start.saturating_sub(chunk_start) as usize;
            let to = (std::cmp::min(chunk_end, end + 1) - chunk_start) as usize;
            if from < to {
                return Poll::Ready(Some(Ok(chunk.slice(from..to))));
            }
        }
    }
}
