use serde::Deserialize;

/// Default number of bytes requested from a seekable source per read.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Boundary token used for `multipart/byteranges` bodies unless overridden.
pub const DEFAULT_BOUNDARY: &str = "RANGE_BOUNDARY";

/// Content type announced for range bodies when none is configured.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Tunables shared by the single-range and multipart producers.
///
/// Deserializable so it can live in an application's config file; missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RangeOptions {
    /// Maximum bytes per read from a seekable source.
    pub chunk_size: usize,
    /// Multipart boundary token.
    pub boundary: String,
    /// Content type of the underlying entity, used for the single-range
    /// `Content-Type` header and for every multipart part.
    pub content_type: Option<String>,
    /// Close a [`FileHandle`](crate::FileHandle) source once the body is
    /// drained, fails, or is dropped.
    pub auto_close: bool,
}

impl Default for RangeOptions {
    fn default() -> Self {
        RangeOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            boundary: DEFAULT_BOUNDARY.to_string(),
            content_type: None,
            auto_close: true,
        }
    }
}

impl RangeOptions {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = auto_close;
        self
    }

    pub(crate) fn read_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    pub(crate) fn content_type_or_default(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}
