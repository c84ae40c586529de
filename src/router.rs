//! request routing: the built-in welcome page, static file serving and
//! reverse proxy bridging.
//!
//! Routes are scanned in declaration order and the first prefix match wins;
//! overlapping prefixes resolve by position, not by length.

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    net::TcpStream,
    os::fd::AsRawFd,
};

use bytes::Bytes;
use http::{Response, StatusCode, header};
use openssl::ssl::{ErrorCode, SslStream};
use tracing::{debug, warn};

use crate::{
    BUFFER_SIZE,
    config::{Config, Technology, parse_backend},
    request::Request,
    response,
    uring::{self, Interest},
};

/// Composed document path bound; anything longer fails the route.
const MAX_FILE_PATH: usize = 512;

enum Outcome {
    Handled,
    NoMatch,
}

/// http/1.1 entry point. `raw` is everything read from the client so far
/// and is what a matched proxy backend receives verbatim.
pub(crate) fn route(
    req: &Request<'_>,
    raw: &[u8],
    config: &Config,
    stream: &mut SslStream<TcpStream>,
) -> io::Result<()> {
    if req.path == "/" {
        stream.write_all(&response::html_head(response::WELCOME_HTML.len()))?;
        return stream.write_all(response::WELCOME_HTML.as_bytes());
    }
    if let Outcome::Handled = serve_static(req.path, config, stream)? {
        return Ok(());
    }
    if let Outcome::Handled = proxy_request(req.path, raw, config, stream)? {
        return Ok(());
    }
    stream.write_all(response::NOT_FOUND)
}

/// Serves `path` from the first matching static route, streaming the file
/// in buffer-sized chunks. A matched route with a missing file answers 404
/// and ends the routing; an over-long composed path fails this route only.
fn serve_static(
    path: &str,
    config: &Config,
    stream: &mut SslStream<TcpStream>,
) -> io::Result<Outcome> {
    for route in routes(config, Technology::Static) {
        let Some(rest) = path.strip_prefix(route.path.as_str()) else {
            continue;
        };
        let Some(root) = route.document_root.as_deref() else {
            continue;
        };
        let Some(filepath) = document_path(root, rest) else {
            warn!("document path for {path} exceeds {MAX_FILE_PATH} bytes");
            continue;
        };
        let mut file = match File::open(filepath) {
            Ok(file) => file,
            Err(_) => {
                stream.write_all(response::NOT_FOUND)?;
                return Ok(Outcome::Handled);
            }
        };
        let len = file.metadata()?.len();
        stream.write_all(&response::file_head(len))?;
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n])?;
        }
        return Ok(Outcome::Handled);
    }
    Ok(Outcome::NoMatch)
}

/// Connects to the first matching reverse proxy backend, replays the raw
/// request and bridges the two peers until either side closes. A matched
/// route that cannot be parsed or reached degrades to a miss.
fn proxy_request(
    path: &str,
    raw: &[u8],
    config: &Config,
    stream: &mut SslStream<TcpStream>,
) -> io::Result<Outcome> {
    for route in routes(config, Technology::ReverseProxy) {
        if !path.starts_with(route.path.as_str()) {
            continue;
        }
        let Some(addr) = route.backend.as_deref().and_then(parse_backend) else {
            warn!("route {} has an unusable backend", route.path);
            return Ok(Outcome::NoMatch);
        };
        let mut backend = match TcpStream::connect(addr) {
            Ok(backend) => backend,
            Err(e) => {
                debug!("backend {addr} unreachable: {e}");
                return Ok(Outcome::NoMatch);
            }
        };
        backend.write_all(raw)?;
        bridge(stream, &mut backend)?;
        return Ok(Outcome::Handled);
    }
    Ok(Outcome::NoMatch)
}

fn routes(config: &Config, technology: Technology) -> impl Iterator<Item = &crate::config::Route> {
    config
        .routes
        .iter()
        .filter(move |route| route.technology == technology)
}

/// Joins a document root and the path remainder after the matched prefix,
/// inserting the separator the prefix strip consumed. Fails when the result
/// would not fit the path bound.
fn document_path(root: &str, rest: &str) -> Option<String> {
    let filepath = if root.ends_with('/') || rest.starts_with('/') {
        format!("{root}{rest}")
    } else {
        format!("{root}/{rest}")
    };
    (filepath.len() < MAX_FILE_PATH).then_some(filepath)
}

/// Forwards bytes between the tls client and the plain backend until either
/// side closes. Both peers run non-blocking; when neither has data the
/// worker parks on readiness of the pair instead of guessing which side
/// will speak next.
fn bridge(tls: &mut SslStream<TcpStream>, backend: &mut TcpStream) -> io::Result<()> {
    tls.get_ref().set_nonblocking(true)?;
    backend.set_nonblocking(true)?;
    let client_fd = tls.get_ref().as_raw_fd();
    let backend_fd = backend.as_raw_fd();
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        // client to backend. drained first: the tls layer may hold
        // plaintext that no readiness event will ever announce.
        loop {
            match tls.ssl_read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => write_all_plain(backend, &buf[..n])?,
                Err(ref e) if e.code() == ErrorCode::WANT_READ => break,
                Err(ref e) if e.code() == ErrorCode::WANT_WRITE => {
                    uring::with_local(|ring| ring.wait_readable(client_fd, Interest::Writable))?;
                }
                Err(_) => return Ok(()),
            }
        }
        // backend to client.
        loop {
            match backend.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => write_all_tls(tls, &buf[..n])?,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Ok(()),
            }
        }
        uring::with_local(|ring| ring.wait_any(client_fd, backend_fd))?;
    }
}

fn write_all_plain(sock: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    let fd = sock.as_raw_fd();
    while !buf.is_empty() {
        match sock.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                uring::with_local(|ring| ring.wait_readable(fd, Interest::Writable))?;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn write_all_tls(tls: &mut SslStream<TcpStream>, mut buf: &[u8]) -> io::Result<()> {
    let fd = tls.get_ref().as_raw_fd();
    while !buf.is_empty() {
        match tls.ssl_write(buf) {
            Ok(n) => buf = &buf[n..],
            Err(ref e) if e.code() == ErrorCode::WANT_WRITE => {
                uring::with_local(|ring| ring.wait_readable(fd, Interest::Writable))?;
            }
            Err(ref e) if e.code() == ErrorCode::WANT_READ => {
                uring::with_local(|ring| ring.wait_readable(fd, Interest::Readable))?;
            }
            Err(e) => {
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|e| io::Error::other(e)));
            }
        }
    }
    Ok(())
}

/// http/2 entry point: same routing semantics as [`route`], expressed as a
/// response value the session loop submits. Reverse proxy routes answer 502
/// here, raw byte bridging has no per-stream equivalent.
pub(crate) fn route_h2(path: &str, config: &Config) -> Response<Bytes> {
    if path == "/" {
        return h2_response(
            StatusCode::OK,
            Some("text/html"),
            Bytes::from_static(response::WELCOME_HTML.as_bytes()),
        );
    }
    for route in routes(config, Technology::Static) {
        let Some(rest) = path.strip_prefix(route.path.as_str()) else {
            continue;
        };
        let Some(root) = route.document_root.as_deref() else {
            continue;
        };
        let Some(filepath) = document_path(root, rest) else {
            warn!("document path for {path} exceeds {MAX_FILE_PATH} bytes");
            continue;
        };
        return match fs::read(filepath) {
            Ok(body) => h2_response(StatusCode::OK, None, Bytes::from(body)),
            Err(_) => h2_response(StatusCode::NOT_FOUND, None, Bytes::new()),
        };
    }
    for route in routes(config, Technology::ReverseProxy) {
        if path.starts_with(route.path.as_str()) {
            return h2_response(StatusCode::BAD_GATEWAY, None, Bytes::new());
        }
    }
    h2_response(StatusCode::NOT_FOUND, None, Bytes::new())
}

fn h2_response(
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
) -> Response<Bytes> {
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(body)
        .expect("response built from fixed parts")
}

#[cfg(test)]
mod test {
    use std::io::Write as _;

    use super::*;
    use crate::config::Config;

    fn config(routes: &str) -> Config {
        let yaml = format!(
            "server:\n  port: 443\nssl:\n  certificate: c\n  private_key: k\nroutes:\n{routes}"
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn h2_welcome_page() {
        let config = config("  - path: /static/\n    technology: static\n    document_root: /tmp\n");
        let res = route_h2("/", &config);
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html"
        );
        assert!(!res.body().is_empty());
    }

    #[test]
    fn h2_static_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("index.html")).unwrap();
        file.write_all(b"Hello, world!").unwrap();
        let config = config(&format!(
            "  - path: /static/\n    technology: static\n    document_root: {}\n",
            dir.path().display()
        ));

        let res = route_h2("/static/index.html", &config);
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"Hello, world!");

        let res = route_h2("/static/missing.html", &config);
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn h2_declaration_order_wins() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        fs::write(dir_a.path().join("f"), b"first").unwrap();
        fs::write(dir_b.path().join("f"), b"second").unwrap();
        // the second route's prefix is longer but declared later.
        let config = config(&format!(
            "  - path: /a/\n    technology: static\n    document_root: {}\n  - path: /a/deep/\n    technology: static\n    document_root: {}\n",
            dir_a.path().display(),
            dir_b.path().display()
        ));
        // "/a/deep/f" matches "/a/" first, resolving under the first root.
        let res = route_h2("/a/deep/f", &config);
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn h2_proxy_routes_are_bad_gateway() {
        let config =
            config("  - path: /api/\n    technology: reverse_proxy\n    backend: 127.0.0.1:9\n");
        let res = route_h2("/api/ping", &config);
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn h2_miss_is_not_found() {
        let config = config("  - path: /static/\n    technology: static\n    document_root: /tmp\n");
        assert_eq!(route_h2("/other", &config).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn document_path_inserts_the_consumed_separator() {
        assert_eq!(
            document_path("./www", "index.html").unwrap(),
            "./www/index.html"
        );
        assert_eq!(
            document_path("./www/", "index.html").unwrap(),
            "./www/index.html"
        );
        assert_eq!(
            document_path("./www", "/index.html").unwrap(),
            "./www/index.html"
        );
        assert!(document_path("./www", &"a".repeat(600)).is_none());
    }

    #[test]
    fn h2_overlong_path_fails_the_route() {
        let config = config("  - path: /s/\n    technology: static\n    document_root: /tmp\n");
        let long = format!("/s/{}", "a".repeat(600));
        assert_eq!(route_h2(&long, &config).status(), StatusCode::NOT_FOUND);
    }
}
