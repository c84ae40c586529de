//! http/2 session event loop over tls.
//!
//! The session state machine is the h2 crate; this module drives it with a
//! cooperative poll loop. Futures are polled with a no-op waker and every
//! `Pending` is answered by parking the worker on socket readiness, using
//! the want-read/want-write hints the i/o adapter records.

mod body;
mod io;

use std::{
    future::Future,
    io::Result as IoResult,
    net::TcpStream,
    os::fd::{AsRawFd, RawFd},
    pin::pin,
    rc::Rc,
    task::{Context, Poll, Waker},
    time::Duration,
};

use ::h2::server::{self, SendResponse};
use bytes::Bytes;
use http::{HeaderValue, Request, Response, header};
use openssl::ssl::SslStream;
use tracing::{debug, error, trace};

use crate::{
    config::Config,
    error::Error,
    router,
    uring::{self, Interest},
};

use self::{
    body::BodyCursor,
    io::{PollIo, Want},
};

/// Socket timeouts are widened on entry; an http/2 session is long-lived
/// compared to a one-shot http/1.1 exchange.
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn serve(tls: SslStream<TcpStream>, config: &Config) -> Result<(), Error> {
    let socket = tls.get_ref();
    socket.set_read_timeout(Some(SESSION_TIMEOUT))?;
    socket.set_write_timeout(Some(SESSION_TIMEOUT))?;
    let fd = socket.as_raw_fd();

    let want = Rc::new(Want::default());
    let io = PollIo::new(tls, Rc::clone(&want));
    let mut cx = Context::from_waker(Waker::noop());

    // connection preface and the initial settings exchange.
    let mut handshake = pin!(server::handshake(io));
    let mut connection = loop {
        want.clear();
        match handshake.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(connection)) => break connection,
            Poll::Ready(Err(e)) => return Err(e.into()),
            Poll::Pending => wait(fd, &want)?,
        }
    };

    let mut inflight: Vec<BodyCursor> = Vec::new();
    loop {
        want.clear();
        let mut progress = false;

        loop {
            match connection.poll_accept(&mut cx) {
                Poll::Ready(Some(Ok((request, respond)))) => {
                    accept_stream(request, respond, config, &mut inflight);
                    progress = true;
                }
                Poll::Ready(Some(Err(e))) => {
                    debug!("session ended: {e}");
                    return Ok(());
                }
                // remote closed the connection cleanly.
                Poll::Ready(None) => return Ok(()),
                Poll::Pending => break,
            }
        }

        inflight.retain_mut(|cursor| {
            let (moved, done) = cursor.pump(&mut cx);
            progress |= moved;
            !done
        });

        // queued frames are only flushed by polling the connection again,
        // so another pass is due whenever anything moved.
        if progress {
            continue;
        }
        wait(fd, &want)?;
    }
}

fn wait(fd: RawFd, want: &Want) -> IoResult<()> {
    let interest = if want.wants_write() {
        Interest::Both
    } else {
        Interest::Readable
    };
    uring::with_local(|ring| ring.wait_readable(fd, interest)).map(drop)
}

/// Routes one complete request head and submits the response. The request
/// body, if any, is not consumed. Submit failures are logged and the stream
/// is left for the session to close.
fn accept_stream(
    request: Request<::h2::RecvStream>,
    mut respond: SendResponse<Bytes>,
    config: &Config,
    inflight: &mut Vec<BodyCursor>,
) {
    let (head, _body) = request.into_parts();
    let path = head.uri.path_and_query().map_or("/", |pq| pq.as_str());
    trace!("stream request {} {}", head.method, path);

    let (mut parts, mut body) = router::route_h2(path, config).into_parts();
    if body.is_empty() {
        body = Bytes::from_static(b"\n");
    }
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    match respond.send_response(Response::from_parts(parts, ()), false) {
        Ok(stream) => inflight.push(BodyCursor::new(stream, body)),
        Err(e) => error!("response submit failed: {e}"),
    }
}
