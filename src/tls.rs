//! tls context construction and the non-blocking handshake driver.

use std::{net::TcpStream, os::fd::AsRawFd, path::Path};

use openssl::{
    error::ErrorStack,
    ssl::{
        AlpnError, ErrorCode, Ssl, SslAcceptor, SslFiletype, SslMethod, SslSessionCacheMode,
        SslStream, SslVersion, select_next_proto,
    },
};

use crate::{
    error::Error,
    uring::{self, Interest},
};

/// Protocols offered to clients, preference order first, rfc 7301 wire
/// format.
const ALPN_PROTOCOLS: &[u8] = b"\x02h2\x08http/1.1";

/// Builds the process-wide server context: pem certificate and key, alpn
/// with h2 preferred, server-side session cache, nothing below tls 1.2.
pub(crate) fn build_acceptor(cert: &Path, key: &Path) -> Result<SslAcceptor, ErrorStack> {
    let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls_server())?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_certificate_chain_file(cert)?;
    builder.set_private_key_file(key, SslFiletype::PEM)?;
    builder.check_private_key()?;
    builder.set_alpn_select_callback(|_, client| {
        select_next_proto(ALPN_PROTOCOLS, client).ok_or(AlpnError::NOACK)
    });
    builder.set_session_cache_mode(SslSessionCacheMode::SERVER);
    builder.set_session_id_context(b"emme")?;
    Ok(builder.build())
}

/// Drives a non-blocking tls accept to completion, alternating accept calls
/// with readiness waits on the worker's io handle. A stalled peer is cut by
/// the socket timeouts the dispatcher configured.
pub(crate) fn handshake(
    acceptor: &SslAcceptor,
    stream: TcpStream,
) -> Result<SslStream<TcpStream>, Error> {
    let ssl = Ssl::new(acceptor.context())?;
    let mut stream = SslStream::new(ssl, stream)?;
    let fd = stream.get_ref().as_raw_fd();
    loop {
        match stream.accept() {
            Ok(()) => return Ok(stream),
            Err(ref e) if e.code() == ErrorCode::WANT_READ => {
                uring::with_local(|ring| ring.wait_readable(fd, Interest::Readable))?;
            }
            Err(ref e) if e.code() == ErrorCode::WANT_WRITE => {
                uring::with_local(|ring| ring.wait_readable(fd, Interest::Writable))?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn acceptor_from_generated_certificate() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("dev.crt");
        let key_path = dir.path().join("dev.key");
        fs::write(&cert_path, cert.cert.pem()).unwrap();
        fs::write(&key_path, cert.signing_key.serialize_pem()).unwrap();

        build_acceptor(&cert_path, &key_path).unwrap();
    }

    #[test]
    fn acceptor_rejects_missing_files() {
        assert!(build_acceptor(Path::new("/nonexistent.crt"), Path::new("/nonexistent.key")).is_err());
    }
}
