//! per-connection entry point, run on a worker thread.

use std::{net::TcpStream, sync::Arc, time::Duration};

use openssl::ssl::SslAcceptor;
use tracing::debug;

use crate::{config::Config, error::Error, h1, h2, tls};

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles one accepted client from handshake to close. Failures are logged
/// here and go no further; dropping the stream closes the descriptor.
pub(crate) fn handle_connection(stream: TcpStream, config: Arc<Config>, acceptor: Arc<SslAcceptor>) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = serve(stream, &config, &acceptor) {
        debug!(peer = ?peer, "connection error: {e}");
    }
}

fn serve(stream: TcpStream, config: &Config, acceptor: &SslAcceptor) -> Result<(), Error> {
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_nonblocking(true)?;

    let mut tls = tls::handshake(acceptor, stream)?;

    let is_h2 = tls
        .ssl()
        .selected_alpn_protocol()
        .is_some_and(|proto| proto == b"h2");
    if is_h2 {
        h2::serve(tls, config)
    } else {
        // "http/1.1", no alpn at all, or anything unexpected.
        tls.get_ref().set_nonblocking(false)?;
        h1::serve(&mut tls, config)?;
        // close-notify; a peer that already left is not an error.
        let _ = tls.shutdown();
        Ok(())
    }
}
