use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::RangeError;
use crate::{ByteRange, MultipartStream, RangeOptions, RangeSource, RangedStream};

/// Builds a 206 response for already validated `ranges` of an entity of
/// `size` bytes, starting from the `headers` supplied by the caller.
///
/// One range produces a plain body with `Content-Range`; several produce a
/// `multipart/byteranges` body whose content type replaces any existing one.
pub fn respond_range(
    source: RangeSource,
    size: u64,
    ranges: &[ByteRange],
    mut headers: HeaderMap,
    options: &RangeOptions,
) -> Result<Response, RangeError> {
    let first = *ranges.first().ok_or(RangeError::NoRanges)?;
    if let Some(range) = ranges.iter().find(|range| !range.fits(size)) {
        return Err(RangeError::OutOfBounds { start: range.start, end: range.end, size });
    }

    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if ranges.len() == 1 {
        headers.insert(CONTENT_RANGE, HeaderValue::from_str(&first.content_range(size))?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(first.len()));
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(options.content_type_or_default())?);
        }

        debug!(range = ?first, size, kind = ?source.kind(), "single range response");
        let stream = RangedStream::new(source, first, options);
        return Ok((StatusCode::PARTIAL_CONTENT, headers, stream).into_response());
    }

    let multipart_type = HeaderValue::from_str(&format!("multipart/byteranges; boundary={}", options.boundary))?;
    debug!(parts = ranges.len(), size, kind = ?source.kind(), "multipart range response");
    let stream = MultipartStream::new(source, ranges, size, options);
    headers.insert(CONTENT_TYPE, multipart_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(stream.content_length()));
    Ok((StatusCode::PARTIAL_CONTENT, headers, stream).into_response())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;
    use axum::body::to_bytes;

    use super::*;
    use crate::FileHandle;

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|value| value.to_str().ok())
    }

    #[tokio::test]
    async fn test_single_range_from_zero_buffer() {
        let response = respond_range(
            vec![0u8; 65_000].into(),
            65_000,
            &[ByteRange::new(0, 499)],
            HeaderMap::new(),
            &RangeOptions::default(),
        )
        .unwrap();

        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!(Some("Partial Content"), response.status().canonical_reason());
        assert_eq!(Some("500"), header(&response, "content-length"));
        assert_eq!(Some("bytes 0-499/65000"), header(&response, "content-range"));
        assert_eq!(Some("bytes"), header(&response, "accept-ranges"));
        assert_eq!(Some("application/octet-stream"), header(&response, "content-type"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(vec![0u8; 500], body.to_vec());
    }

    #[tokio::test]
    async fn test_single_range_keeps_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let options = RangeOptions::default().content_type("application/x-ignored");
        let response = respond_range("0123456789".into(), 10, &[ByteRange::new(2, 4)], headers, &options).unwrap();

        assert_eq!(Some("text/plain"), header(&response, "content-type"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&b"234"[..], &body[..]);
    }

    #[tokio::test]
    async fn test_multiple_ranges_override_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let options = RangeOptions::default().boundary("xyz");
        let ranges = [ByteRange::new(6, 8), ByteRange::new(0, 1)];
        let response = respond_range("0123456789".into(), 10, &ranges, headers, &options).unwrap();

        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!(Some("multipart/byteranges; boundary=xyz"), header(&response, "content-type"));
        assert_eq!(None, header(&response, "content-range"));
        let length: usize = header(&response, "content-length").unwrap().parse().unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(length, body.len());
        let expected = "\r\n--xyz\r\nContent-Type: application/octet-stream\r\nContent-Range: 0-1/10\r\n\r\n01\
                        \r\n--xyz\r\nContent-Type: application/octet-stream\r\nContent-Range: 6-8/10\r\n\r\n678\
                        \r\n--xyz--\r\n";
        assert_eq!(expected, std::str::from_utf8(&body).unwrap());
    }

    #[test]
    fn test_no_ranges_is_error() {
        let result = respond_range("abc".into(), 3, &[], HeaderMap::new(), &RangeOptions::default());
        assert_matches!(result, Err(RangeError::NoRanges));
    }

    #[test]
    fn test_out_of_bounds_is_error() {
        let handle = FileHandle::new(Cursor::new(b"abc".to_vec()));
        let ranges = [ByteRange::new(0, 0), ByteRange::new(1, 3)];
        let result = respond_range(handle.clone().into(), 3, &ranges, HeaderMap::new(), &RangeOptions::default());
        assert_matches!(result, Err(RangeError::OutOfBounds { start: 1, end: 3, size: 3 }));
    }

    #[tokio::test]
    async fn test_file_single_range() {
        let (handle, meta) = FileHandle::open("test/fixture.txt").await.unwrap();
        let response = respond_range(
            handle.clone().into(),
            meta.size,
            &[ByteRange::new(0, 29)],
            HeaderMap::new(),
            &RangeOptions::default(),
        )
        .unwrap();

        assert_eq!(Some("bytes 0-29/54"), header(&response, "content-range"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&b"Hello world this is a file to "[..], &body[..]);
        assert!(handle.is_closed());
    }
}
