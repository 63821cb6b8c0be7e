use std::io;
use std::net::SocketAddr;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};

use axum_byteranges::{EntityMeta, FileHandle, RangeOptions, RangeSource, Ranged};

const FIXTURE: &str = "Hello world this is a file to test range requests on!\n";

async fn fixture(headers: HeaderMap) -> Response {
    match FileHandle::open("test/fixture.txt").await {
        Ok((handle, meta)) => Ranged::new(&headers, handle, meta).into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn streamed(headers: HeaderMap) -> Response {
    let chunks: Vec<io::Result<Bytes>> = FIXTURE
        .as_bytes()
        .chunks(5)
        .map(|chunk| Ok(Bytes::from_static(chunk)))
        .collect();
    let source = RangeSource::stream(futures::stream::iter(chunks));
    let options = RangeOptions::default().boundary("stream-boundary");
    Ranged::new(&headers, source, EntityMeta::new(FIXTURE.len() as u64))
        .options(options)
        .into_response()
}

async fn serve() -> SocketAddr {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let app = Router::new()
        .route("/fixture", get(fixture))
        .route("/stream", get(streamed));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn get_range(addr: SocketAddr, path: &str, range: Option<&str>) -> reqwest::Response {
    let mut request = reqwest::Client::new().get(format!("http://{addr}{path}"));
    if let Some(range) = range {
        request = request.header(RANGE, range);
    }
    request.send().await.unwrap()
}

fn header(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn test_full_file() {
    let addr = serve().await;
    let response = get_range(addr, "/fixture", None).await;

    assert_eq!(reqwest::StatusCode::OK, response.status());
    assert_eq!(Some("54".to_string()), header(&response, CONTENT_LENGTH));
    assert_eq!(FIXTURE, response.text().await.unwrap());
}

#[tokio::test]
async fn test_single_range_file() {
    let addr = serve().await;
    let response = get_range(addr, "/fixture", Some("bytes=6-10")).await;

    assert_eq!(reqwest::StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(Some("bytes 6-10/54".to_string()), header(&response, CONTENT_RANGE));
    assert_eq!(Some("5".to_string()), header(&response, CONTENT_LENGTH));
    assert_eq!("world", response.text().await.unwrap());
}

#[tokio::test]
async fn test_unsatisfiable_file() {
    let addr = serve().await;
    let response = get_range(addr, "/fixture", Some("bytes=60-70")).await;

    assert_eq!(reqwest::StatusCode::RANGE_NOT_SATISFIABLE, response.status());
    assert_eq!(Some("bytes */54".to_string()), header(&response, CONTENT_RANGE));
}

#[tokio::test]
async fn test_multiple_ranges_stream() {
    let addr = serve().await;
    let response = get_range(addr, "/stream", Some("bytes=12-15, 0-4")).await;

    assert_eq!(reqwest::StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(
        Some("multipart/byteranges; boundary=stream-boundary".to_string()),
        header(&response, CONTENT_TYPE),
    );
    let length: usize = header(&response, CONTENT_LENGTH).unwrap().parse().unwrap();
    let body = response.text().await.unwrap();
    assert_eq!(length, body.len());

    let expected = "\r\n--stream-boundary\r\nContent-Type: application/octet-stream\r\nContent-Range: 0-4/54\r\n\r\nHello\
                    \r\n--stream-boundary\r\nContent-Type: application/octet-stream\r\nContent-Range: 12-15/54\r\n\r\nthis\
                    \r\n--stream-boundary--\r\n";
    assert_eq!(expected, body);
}
