use std::io;
use std::mem;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::trace;

use crate::error::SourceError;
use crate::{AsyncSeekStart, ByteRange, EntityMeta};

/// Object-safe union of [`AsyncRead`] and [`AsyncSeekStart`].
pub trait SeekRead: AsyncRead + AsyncSeekStart + Send {}

impl<T: AsyncRead + AsyncSeekStart + Send> SeekRead for T {}

type Slot = Option<Pin<Box<dyn SeekRead>>>;

/// Shared, closable handle to a seekable source.
///
/// Clones refer to the same underlying file and the same file position, so
/// only one range body should read through a handle at a time.
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FileHandle {
    pub fn new<F: AsyncRead + AsyncSeekStart + Send + 'static>(file: F) -> Self {
        FileHandle { inner: Arc::new(Mutex::new(Some(Box::pin(file)))) }
    }

    /// Opens `path` and reads its size and modification time.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<(FileHandle, EntityMeta)> {
        let file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;
        let mut meta = EntityMeta::new(metadata.len());
        if let Ok(mtime) = metadata.modified() {
            meta = meta.with_mtime(mtime);
        }
        Ok((FileHandle::new(file), meta))
    }

    /// Drops the underlying file. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_seek(&self, position: u64) -> io::Result<()> {
        match self.lock().as_mut() {
            Some(file) => AsyncSeekStart::start_seek(file.as_mut(), position),
            None => Err(SourceError::Closed.into()),
        }
    }

    fn poll_seek(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.lock().as_mut() {
            Some(file) => AsyncSeekStart::poll_complete(file.as_mut(), cx),
            None => Poll::Ready(Err(SourceError::Closed.into())),
        }
    }

    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.lock().as_mut() {
            Some(file) => AsyncRead::poll_read(file.as_mut(), cx, buf),
            None => Poll::Ready(Err(SourceError::Closed.into())),
        }
    }
}

impl From<tokio::fs::File> for FileHandle {
    fn from(file: tokio::fs::File) -> Self {
        FileHandle::new(file)
    }
}

/// Closes the handle when dropped, if the body owns closing it.
pub(crate) struct CloseGuard {
    handle: FileHandle,
    auto_close: bool,
}

impl CloseGuard {
    pub(crate) fn new(handle: FileHandle, auto_close: bool) -> Self {
        CloseGuard { handle, auto_close }
    }

    pub(crate) fn handle(&self) -> &FileHandle {
        &self.handle
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if self.auto_close && self.handle.close() {
            trace!("closed range source");
        }
    }
}

/// Reads one inclusive range from a [`FileHandle`]: seek, then bounded
/// chunked reads pulled on demand.
pub(crate) struct FileCursor {
    handle: FileHandle,
    state: CursorState,
    remaining: u64,
    end: u64,
    chunk_size: usize,
}

#[derive(Debug)]
enum CursorState {
    Seek { start: u64 },
    Seeking,
    Reading { buffer: BytesMut },
}

impl FileCursor {
    pub(crate) fn new(handle: FileHandle, range: ByteRange, chunk_size: usize) -> Self {
        FileCursor {
            handle,
            state: CursorState::Seek { start: range.start },
            remaining: range.len(),
            end: range.end,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Next chunk of the range, `None` once all of it has been read.
    pub(crate) fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        loop {
            match &mut self.state {
                CursorState::Seek { start } => {
                    self.handle.start_seek(*start)?;
                    self.state = CursorState::Seeking;
                }

                CursorState::Seeking => match self.handle.poll_seek(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e))),
                    Poll::Ready(Ok(())) => {
                        let buffer = allocate_buffer(self.chunk_size, self.remaining);
                        self.state = CursorState::Reading { buffer };
                    }
                },

                CursorState::Reading { buffer } => {
                    if self.remaining == 0 {
                        return Poll::Ready(None);
                    }

                    let uninit = buffer.spare_capacity_mut();
                    let nbytes = std::cmp::min(
                        uninit.len(),
                        usize::try_from(self.remaining).unwrap_or(usize::MAX),
                    );
                    let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

                    match self.handle.poll_read(cx, &mut read_buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e))),
                        Poll::Ready(Ok(())) => {}
                    }

                    let n = read_buf.filled().len();
                    if n == 0 {
                        let position = self.end + 1 - self.remaining;
                        let err = SourceError::Exhausted { position, end: self.end };
                        return Poll::Ready(Some(Err(err.into())));
                    }

                    // SAFETY: poll_read has initialised `n` more bytes of the
                    // spare capacity, and `buffer.len()` is 0 here
                    unsafe { buffer.set_len(buffer.len() + n); }

                    // n <= remaining due to the cmp::min above
                    self.remaining -= n as u64;
                    let chunk = mem::replace(buffer, allocate_buffer(self.chunk_size, self.remaining));
                    return Poll::Ready(Some(Ok(chunk.freeze())));
                }
            }
        }
    }
}

fn allocate_buffer(chunk_size: usize, remaining: u64) -> BytesMut {
    let len = std::cmp::min(chunk_size, usize::try_from(remaining).unwrap_or(usize::MAX));
    BytesMut::with_capacity(len)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use futures::future::poll_fn;

    use super::*;

    async fn drain(cursor: &mut FileCursor) -> io::Result<Vec<Vec<u8>>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = poll_fn(|cx| cursor.poll_chunk(cx)).await {
            chunks.push(chunk?.to_vec());
        }
        Ok(chunks)
    }

    #[tokio::test]
    async fn test_open_reads_metadata() {
        let (handle, meta) = FileHandle::open("test/fixture.txt").await.unwrap();
        assert_eq!(54, meta.size);
        assert!(meta.mtime.is_some());
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_cursor_reads_in_chunks() {
        let handle = FileHandle::new(Cursor::new(b"0123456789ABCDEF".to_vec()));
        let mut cursor = FileCursor::new(handle, ByteRange::new(2, 12), 4);
        let chunks = drain(&mut cursor).await.unwrap();
        assert_eq!(vec![b"2345".to_vec(), b"6789".to_vec(), b"ABC".to_vec()], chunks);
    }

    #[tokio::test]
    async fn test_cursor_short_source_is_error() {
        let handle = FileHandle::new(Cursor::new(b"0123".to_vec()));
        let mut cursor = FileCursor::new(handle, ByteRange::new(2, 9), 64);
        let err = drain(&mut cursor).await.unwrap_err();
        assert_eq!(io::ErrorKind::UnexpectedEof, err.kind());
    }

    #[tokio::test]
    async fn test_closed_handle_is_error() {
        let handle = FileHandle::new(Cursor::new(b"0123".to_vec()));
        assert!(handle.close());
        assert!(!handle.close());
        let mut cursor = FileCursor::new(handle, ByteRange::new(0, 1), 64);
        let err = drain(&mut cursor).await.unwrap_err();
        assert_eq!(io::ErrorKind::BrokenPipe, err.kind());
    }

    #[test]
    fn test_close_guard() {
        let handle = FileHandle::new(Cursor::new(Vec::new()));
        drop(CloseGuard::new(handle.clone(), false));
        assert!(!handle.is_closed());
        drop(CloseGuard::new(handle.clone(), true));
        assert!(handle.is_closed());
    }
}
