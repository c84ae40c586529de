//! http/1.1 over tls: one request per connection, no keep-alive, request
//! bodies are not consumed.

use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use openssl::ssl::SslStream;
use tracing::trace;

use crate::{BUFFER_SIZE, config::Config, request, response, router};

/// Reads one request head, routes it and returns; the dispatcher shuts the
/// stream down afterwards.
pub(crate) fn serve(stream: &mut SslStream<TcpStream>, config: &Config) -> io::Result<()> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut filled = 0;
    loop {
        let n = stream.read(&mut buf[filled..BUFFER_SIZE - 1])?;
        if n == 0 {
            // peer left before completing a request head.
            return Ok(());
        }
        filled += n;
        if buf[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if filled >= BUFFER_SIZE - 1 {
            // head larger than the read buffer allows.
            return stream.write_all(response::BAD_REQUEST);
        }
    }

    match request::parse(&buf[..filled]) {
        Ok(req) => {
            trace!(
                "request {} {} ({} headers)",
                req.method,
                req.path,
                req.headers().len()
            );
            router::route(&req, &buf[..filled], config, stream)
        }
        Err(_) => stream.write_all(response::BAD_REQUEST),
    }
}
