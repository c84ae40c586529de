//! end to end coverage over a real listener: tls handshake, alpn dispatch,
//! static serving, the welcome page, reverse proxying and http/2.

use std::{
    fs,
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    path::Path,
    pin::Pin,
    thread,
    time::Duration,
};

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tempfile::TempDir;

use emme::{
    config::{Config, LoggingConfig, Route, ServerSection, SslSection, Technology},
    server::Server,
};

fn write_certs(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec![
        "localhost".to_owned(),
        "127.0.0.1".to_owned(),
    ])
    .unwrap();
    let cert_path = dir.join("dev.crt");
    let key_path = dir.join("dev.key");
    fs::write(&cert_path, cert.cert.pem()).unwrap();
    fs::write(&key_path, cert.signing_key.serialize_pem()).unwrap();
    (cert_path, key_path)
}

/// Boots a server on an ephemeral port and leaves it running for the rest
/// of the test process.
fn start_server(dir: &TempDir, routes: Vec<Route>) -> SocketAddr {
    let (certificate, private_key) = write_certs(dir.path());
    let config = Config {
        server: ServerSection {
            port: 0,
            max_connections: 64,
            log_level: None,
        },
        ssl: SslSection {
            certificate,
            private_key,
        },
        logging: LoggingConfig::default(),
        routes,
    };
    let server = Server::bind(config).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || {
        let _ = server.run();
    });
    addr
}

fn static_route(prefix: &str, root: &Path) -> Route {
    Route {
        path: prefix.to_owned(),
        technology: Technology::Static,
        document_root: Some(root.display().to_string()),
        backend: None,
    }
}

fn proxy_route(prefix: &str, backend: SocketAddr) -> Route {
    Route {
        path: prefix.to_owned(),
        technology: Technology::ReverseProxy,
        document_root: None,
        backend: Some(backend.to_string()),
    }
}

fn connect_h1(addr: SocketAddr) -> openssl::ssl::SslStream<TcpStream> {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_alpn_protos(b"\x08http/1.1").unwrap();
    let connector = builder.build();
    let tcp = TcpStream::connect(addr).unwrap();
    tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    connector.connect("localhost", tcp).unwrap()
}

fn h1_roundtrip(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = connect_h1(addr);
    stream.write_all(request).unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    response
}

#[test]
fn serves_static_file() {
    let dir = TempDir::new().unwrap();
    let www = dir.path().join("www");
    fs::create_dir(&www).unwrap();
    fs::write(www.join("index.html"), "Hello, world!").unwrap();
    let addr = start_server(&dir, vec![static_route("/static/", &www)]);

    let response = h1_roundtrip(addr, b"GET /static/index.html HTTP/1.1\r\nHost: x\r\n\r\n");
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK"), "got: {text}");
    assert!(text.contains("Content-Length: 13"));
    assert!(text.ends_with("Hello, world!"));
}

#[test]
fn missing_static_file_is_exactly_404() {
    let dir = TempDir::new().unwrap();
    let www = dir.path().join("www");
    fs::create_dir(&www).unwrap();
    let addr = start_server(&dir, vec![static_route("/static/", &www)]);

    let response = h1_roundtrip(addr, b"GET /static/missing HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(
        response,
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"
    );
}

#[test]
fn root_serves_the_welcome_page() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(&dir, Vec::new());

    let response = h1_roundtrip(addr, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("Content-Type: text/html"));
    assert!(text.contains("High Performance Web Server"));
}

#[test]
fn unrouted_path_is_404() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(&dir, Vec::new());

    let response = h1_roundtrip(addr, b"GET /nowhere HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(
        response,
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"
    );
}

#[test]
fn malformed_request_is_400() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(&dir, Vec::new());

    let response = h1_roundtrip(addr, b"NO-REQUEST-LINE\r\n\r\n");
    assert_eq!(
        response,
        b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n"
    );
}

#[test]
fn no_alpn_still_speaks_http1() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(&dir, Vec::new());

    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();
    let tcp = TcpStream::connect(addr).unwrap();
    tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let mut stream = connector.connect("localhost", tcp).unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200 OK"));
}

#[test]
fn proxy_forwards_bytes_both_ways() {
    let backend = TcpListener::bind("127.0.0.1:0").unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let head = b"GET /api/ping HTTP/1.1\r\n\r\n".to_vec();
    let trailer = b"abc".to_vec();
    let mut expected = head.clone();
    expected.extend_from_slice(&trailer);

    let backend_expected = expected.clone();
    let backend_thread = thread::spawn(move || {
        let (mut conn, _) = backend.accept().unwrap();
        let mut received = vec![0u8; backend_expected.len()];
        conn.read_exact(&mut received).unwrap();
        assert_eq!(received, backend_expected);
        conn.write_all(b"PONG").unwrap();
        // closing ends the bridge.
    });

    let dir = TempDir::new().unwrap();
    let addr = start_server(&dir, vec![proxy_route("/api/", backend_addr)]);

    let mut stream = connect_h1(addr);
    stream.write_all(&head).unwrap();
    // the trailer arrives after routing; the bridge must still carry it.
    thread::sleep(Duration::from_millis(100));
    stream.write_all(&trailer).unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    assert_eq!(response, b"PONG");

    backend_thread.join().unwrap();
}

#[tokio::test]
async fn http2_get_root() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(&dir, Vec::new());

    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_alpn_protos(b"\x02h2").unwrap();
    let connector = builder.build();

    let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
    let ssl = connector
        .configure()
        .unwrap()
        .into_ssl("localhost")
        .unwrap();
    let mut stream = tokio_openssl::SslStream::new(ssl, tcp).unwrap();
    Pin::new(&mut stream).connect().await.unwrap();
    assert_eq!(stream.ssl().selected_alpn_protocol(), Some(&b"h2"[..]));

    let (mut client, connection) = h2::client::handshake(stream).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let request = http::Request::builder()
        .method("GET")
        .uri("https://localhost/")
        .body(())
        .unwrap();
    let (response, _) = client.send_request(request, true).unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(
        response.headers().get(http::header::CONTENT_TYPE).unwrap(),
        "text/html"
    );
    let content_length: usize = response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let mut body = response.into_body();
    let mut collected = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected.len(), content_length);
    assert!(String::from_utf8_lossy(&collected).contains("High Performance Web Server"));
}

#[tokio::test]
async fn http2_serves_static_files() {
    let dir = TempDir::new().unwrap();
    let www = dir.path().join("www");
    fs::create_dir(&www).unwrap();
    fs::write(www.join("data.txt"), "stream me").unwrap();
    let addr = start_server(&dir, vec![static_route("/static/", &www)]);

    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_alpn_protos(b"\x02h2").unwrap();
    let connector = builder.build();

    let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
    let ssl = connector
        .configure()
        .unwrap()
        .into_ssl("localhost")
        .unwrap();
    let mut stream = tokio_openssl::SslStream::new(ssl, tcp).unwrap();
    Pin::new(&mut stream).connect().await.unwrap();

    let (mut client, connection) = h2::client::handshake(stream).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let request = http::Request::builder()
        .method("GET")
        .uri("https://localhost/static/data.txt")
        .body(())
        .unwrap();
    let (response, _) = client.send_request(request, true).unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);

    let mut body = response.into_body();
    let mut collected = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"stream me");
}
