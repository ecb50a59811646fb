use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, ReadBuf};

/// Reader adapter that keeps a copy of every byte read through it.
///
/// The whole object ends up buffered in memory, which is what lets the
/// server stream it to peers without reading it back from disk.
pub struct TeeReader<R> {
    inner: R,
    copy: BytesMut,
}

impl<R> TeeReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            copy: BytesMut::new(),
        }
    }

    /// Bytes seen so far.
    pub fn copied(&self) -> &[u8] {
        &self.copy
    }

    pub fn into_copy(self) -> BytesMut {
        self.copy
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TeeReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.copy.extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}
