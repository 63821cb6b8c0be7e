use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use tracing::{trace, warn};

use crate::error::SourceError;
use crate::file::{CloseGuard, FileCursor};
use crate::stream::slice_range;
use crate::{ByteRange, RangeOptions, RangeSource};

/// `multipart/byteranges` response body for several byte ranges.
/// Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// Parts are emitted sorted by range start, one complete part per item. The
/// exact body length is known before anything is read, see
/// [`content_length`](MultipartStream::content_length).
pub struct MultipartStream {
    ranges: VecDeque<ByteRange>,
    total_size: u64,
    boundary: String,
    content_type: String,
    content_length: u64,
    current: Option<Part>,
    source: Option<PartSource>,
}

/// A part whose preamble has been written and whose bytes are being read.
struct Part {
    buffer: BytesMut,
    range: ByteRange,
    // range bytes copied so far, for stream sources
    filled: u64,
    cursor: Option<FileCursor>,
}

enum PartSource {
    Memory(Bytes),
    File {
        guard: CloseGuard,
        chunk_size: usize,
    },
    Stream(StreamWindow),
}

impl MultipartStream {
    /// Produces one part per range, sorted by start. Ranges are expected to
    /// have been validated against `total_size`; any that do not fit are
    /// left out of the body.
    pub fn new(source: RangeSource, ranges: &[ByteRange], total_size: u64, options: &RangeOptions) -> Self {
        let mut sorted: Vec<ByteRange> = ranges.iter().copied().filter(|range| range.fits(total_size)).collect();
        if sorted.len() < ranges.len() {
            warn!(dropped = ranges.len() - sorted.len(), total_size, "skipping ranges outside the entity");
        }
        sorted.sort_by_key(|range| range.start);

        let boundary = options.boundary.clone();
        let content_type = options.content_type_or_default().to_string();

        let content_length = sorted
            .iter()
            .map(|range| preamble(&boundary, &content_type, range, total_size).len() as u64 + range.len())
            .sum::<u64>()
            + postscript(&boundary).len() as u64;

        let source = match source {
            RangeSource::Bytes(bytes) => PartSource::Memory(bytes),
            RangeSource::Text(text) => PartSource::Memory(Bytes::from(text)),
            RangeSource::File(handle) => PartSource::File {
                guard: CloseGuard::new(handle, options.auto_close),
                chunk_size: options.read_size(),
            },
            RangeSource::Stream(stream) => PartSource::Stream(StreamWindow::new(stream)),
        };

        trace!(parts = sorted.len(), content_length, "multipart body prepared");

        MultipartStream {
            ranges: sorted.into(),
            total_size,
            boundary,
            content_type,
            content_length,
            current: None,
            source: Some(source),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Exact byte length of the complete multipart body.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Value for the response `Content-Type` header.
    pub fn multipart_content_type(&self) -> String {
        format!("multipart/byteranges; boundary={}", self.boundary)
    }

    /// Ranges not yet emitted, in emission order.
    pub fn ranges(&self) -> impl Iterator<Item = &ByteRange> {
        self.current.iter().map(|part| &part.range).chain(self.ranges.iter())
    }

    fn start_part(&self, range: ByteRange) -> Part {
        let preamble = preamble(&self.boundary, &self.content_type, &range, self.total_size);
        let capacity = preamble.len() + usize::try_from(range.len()).unwrap_or(0);
        let mut buffer = BytesMut::with_capacity(capacity);
        buffer.extend_from_slice(preamble.as_bytes());

        let cursor = match &self.source {
            Some(PartSource::File { guard, chunk_size }) => {
                Some(FileCursor::new(guard.handle().clone(), range, *chunk_size))
            }
            _ => None,
        };

        Part { buffer, range, filled: 0, cursor }
    }

    /// Drops the source, closing it if this body owns it.
    fn finish(&mut self) {
        self.ranges.clear();
        self.current = None;
        self.source = None;
    }
}

fn preamble(boundary: &str, content_type: &str, range: &ByteRange, total_size: u64) -> String {
    format!(
        "\r\n--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: {}-{}/{total_size}\r\n\r\n",
        range.start, range.end,
    )
}

fn postscript(boundary: &str) -> String {
    format!("\r\n--{boundary}--\r\n")
}

impl std::fmt::Debug for MultipartStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartStream")
            .field("boundary", &self.boundary)
            .field("content_length", &self.content_length)
            .field("pending", &self.ranges.len())
            .finish()
    }
}

impl IntoResponse for MultipartStream {
    fn into_response(self) -> Response {
        let content_type = HeaderValue::from_str(&self.multipart_content_type());
        let content_length = HeaderValue::from(self.content_length);
        let mut response = Response::new(axum::body::Body::new(self));
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        let headers = response.headers_mut();
        match content_type {
            Ok(content_type) => { headers.insert(CONTENT_TYPE, content_type); }
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
        headers.insert(CONTENT_LENGTH, content_length);
        response
    }
}

impl Body for MultipartStream {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.content_length)
    }

    fn is_end_stream(&self) -> bool {
        self.source.is_none()
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl Stream for MultipartStream {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.get_mut();

        loop {
            let Some(mut part) = this.current.take() else {
                if this.source.is_none() {
                    return Poll::Ready(None);
                }
                match this.ranges.pop_front() {
                    Some(range) => {
                        this.current = Some(this.start_part(range));
                    }
                    None => {
                        // all parts are out: close the document and release the source
                        let postscript = postscript(&this.boundary);
                        this.finish();
                        return Poll::Ready(Some(Ok(Bytes::from(postscript))));
                    }
                }
                continue;
            };

            let keep_from = this.ranges.front().map(|next| next.start);
            let filled = match (&mut part.cursor, this.source.as_mut()) {
                (Some(cursor), _) => loop {
                    match cursor.poll_chunk(cx) {
                        Poll::Pending => break Poll::Pending,
                        Poll::Ready(Some(Ok(chunk))) => part.buffer.extend_from_slice(&chunk),
                        Poll::Ready(Some(Err(e))) => break Poll::Ready(Err(e)),
                        Poll::Ready(None) => break Poll::Ready(Ok(())),
                    }
                },
                (None, Some(PartSource::Memory(bytes))) => {
                    Poll::Ready(slice_range(bytes, part.range).map(|slice| part.buffer.extend_from_slice(&slice)))
                }
                (None, Some(PartSource::Stream(window))) => {
                    window.poll_range(cx, part.range, keep_from, &mut part.filled, &mut part.buffer)
                }
                (None, _) => Poll::Ready(Err(SourceError::Closed.into())),
            };

            match filled {
                Poll::Pending => {
                    this.current = Some(part);
                    return Poll::Pending;
                }
                Poll::Ready(Ok(())) => {
                    trace!(range = ?part.range, len = part.buffer.len(), "multipart part ready");
                    return Poll::Ready(Some(Ok(part.buffer.freeze())));
                }
                Poll::Ready(Err(e)) => {
                    warn!(range = ?part.range, error = %e, "multipart body failed");
                    this.finish();
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }
    }
}

/// Single forward pass over a stream source. Bytes are copied into the part
/// as they arrive; only bytes a later part may still need (from the next
/// pending range's start onward) are retained.
struct StreamWindow {
    stream: BoxStream<'static, io::Result<Bytes>>,
    buffer: BytesMut,
    // stream offset of buffer[0]
    offset: u64,
}

impl StreamWindow {
    fn new(stream: BoxStream<'static, io::Result<Bytes>>) -> Self {
        StreamWindow { stream, buffer: BytesMut::new(), offset: 0 }
    }

    fn poll_range(
        &mut self,
        cx: &mut Context<'_>,
        range: ByteRange,
        keep_from: Option<u64>,
        filled: &mut u64,
        out: &mut BytesMut,
    ) -> Poll<io::Result<()>> {
        loop {
            let next = range.start + *filled;
            let keep = keep_from.map_or(next, |start| start.min(next));
            if self.offset < keep {
                let skip = std::cmp::min(keep - self.offset, self.buffer.len() as u64);
                self.buffer.advance(skip as usize);
                self.offset += skip;
            }
            if next > range.end {
                return Poll::Ready(Ok(()));
            }
            if self.offset > next {
                let err = SourceError::Unordered { start: next, position: self.offset };
                return Poll::Ready(Err(err.into()));
            }

            let buffered_end = self.offset + self.buffer.len() as u64;
            if buffered_end > next {
                let from = (next - self.offset) as usize;
                let to = (std::cmp::min(buffered_end, range.end + 1) - self.offset) as usize;
                out.extend_from_slice(&self.buffer[from..to]);
                *filled += (to - from) as u64;
                continue;
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(None) => {
                    let err = SourceError::Exhausted { position: buffered_end, end: range.end };
                    return Poll::Ready(Err(err.into()));
                }
            }
        }
    }
}
