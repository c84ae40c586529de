//! poll adapter between the non-blocking tls stream and the h2 session.

use std::{
    cell::Cell,
    io::{self, Read, Write},
    net::TcpStream,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use openssl::ssl::{ErrorCode, ShutdownResult, SslStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Readiness the session is blocked on, mirrored out of the i/o adapter so
/// the event loop knows what to wait for before polling again.
#[derive(Default)]
pub(super) struct Want {
    read: Cell<bool>,
    write: Cell<bool>,
}

impl Want {
    pub(super) fn clear(&self) {
        self.read.set(false);
        self.write.set(false);
    }

    pub(super) fn wants_write(&self) -> bool {
        self.write.get()
    }
}

pub(super) struct PollIo {
    io: SslStream<TcpStream>,
    want: Rc<Want>,
}

impl PollIo {
    pub(super) fn new(io: SslStream<TcpStream>, want: Rc<Want>) -> Self {
        Self { io, want }
    }
}

impl AsyncRead for PollIo {
    fn poll_read(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.io.read(buf.initialize_unfilled()) {
            Ok(n) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                this.want.read.set(true);
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for PollIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.io.write(buf) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                this.want.write.set(true);
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.io.flush() {
            Ok(()) => Poll::Ready(Ok(())),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                this.want.write.set(true);
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.io.shutdown() {
            Ok(ShutdownResult::Sent | ShutdownResult::Received) => Poll::Ready(Ok(())),
            Err(ref e) if e.code() == ErrorCode::ZERO_RETURN => Poll::Ready(Ok(())),
            Err(ref e) if e.code() == ErrorCode::WANT_READ => {
                this.want.read.set(true);
                Poll::Pending
            }
            Err(ref e) if e.code() == ErrorCode::WANT_WRITE => {
                this.want.write.set(true);
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e
                .into_io_error()
                .unwrap_or_else(io::Error::other))),
        }
    }
}
