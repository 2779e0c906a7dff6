//! Trailer-aware reader for streamed directory archives.
//!
//! A directory pulled out of the guest is compressed on the fly, so the
//! sender cannot announce a length. It marks the end of the archive by
//! appending the gzip magic bytes instead; the reader stops at the first
//! read boundary where the stream ends with that trailer and hides the
//! trailer from the consumer.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Trailer appended by the sender: rfc1952 {ID1, ID2, CM}.
pub const ARCHIVE_TRAILER: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Source-path prefix that asks the guest to stream a packed archive.
pub const ARCHIVE_PREFIX: &str = "/archive:";

/// Check if a guest source path denotes an archive stream.
///
/// True for the `/archive:/` endpoint and for any directory path (one whose
/// path part, before any query string, ends with a separator).
pub fn is_archive_source(src: &str) -> bool {
    if src.starts_with("/archive:/") {
        return true;
    }
    let path = src.split('?').next().unwrap_or(src);
    path.ends_with('/') || path.ends_with('\\')
}

/// Build the archive-stream source path for a guest directory.
pub fn archive_source(dir: &str) -> String {
    let mut src = if dir.starts_with(ARCHIVE_PREFIX) {
        dir.to_string()
    } else {
        format!("{ARCHIVE_PREFIX}{dir}")
    };
    if !src.ends_with('/') {
        src.push('/');
    }
    src
}

/// Reader that truncates a stream at the archive trailer.
///
/// The stream ends at the first read boundary where the bytes received so
/// far end with [`ARCHIVE_TRAILER`]; those bytes are dropped. The last two
/// bytes of each read are held back until the next read shows whether they
/// begin the trailer. The gzip header at offset zero is the archive's own
/// magic, not the trailer, and never ends the stream.
pub struct ArchiveReader<R> {
    inner: R,
    carry: Vec<u8>,
    scratch: Vec<u8>,
    released: u64,
    eof: bool,
    finished: bool,
}

impl<R> ArchiveReader<R> {
    /// Wrap a raw download stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            carry: Vec::with_capacity(ARCHIVE_TRAILER.len()),
            scratch: Vec::new(),
            released: 0,
            eof: false,
            finished: false,
        }
    }

    /// Check if the trailer has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Unwrap the underlying reader.
    ///
    /// Bytes held back from the last read are discarded.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ArchiveReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let trailer_len = ARCHIVE_TRAILER.len();

        loop {
            if this.finished || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                let n = this.carry.len().min(buf.remaining());
                buf.put_slice(&this.carry[..n]);
                this.carry.drain(..n);
                this.released += n as u64;
                return Poll::Ready(Ok(()));
            }

            let want = buf.remaining();
            this.scratch.resize(want, 0);
            let mut chunk = ReadBuf::new(&mut this.scratch[..want]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk))?;
            let read = chunk.filled().len();
            if read == 0 {
                this.eof = true;
                continue;
            }

            let mut window = std::mem::take(&mut this.carry);
            window.extend_from_slice(&this.scratch[..read]);

            // Offset zero is the archive's own gzip header.
            if window.len() >= trailer_len
                && window[window.len() - trailer_len..] == ARCHIVE_TRAILER
                && this.released + (window.len() - trailer_len) as u64 > 0
            {
                let kept = window.len() - trailer_len;
                buf.put_slice(&window[..kept]);
                this.released += kept as u64;
                this.finished = true;
                tracing::trace!(length = this.released, "Archive trailer reached");
                return Poll::Ready(Ok(()));
            }

            let emit = window.len() - window.len().min(trailer_len - 1);
            this.carry = window.split_off(emit);
            if emit > 0 {
                buf.put_slice(&window);
                this.released += emit as u64;
                return Poll::Ready(Ok(()));
            }
        }
    }
}
