//! http/1.1 response templates and head writers.

pub(crate) const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
pub(crate) const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n";

pub(crate) const WELCOME_HTML: &str = "<html><head><title>High Performance Web Server</title></head>\
<body><h1>Welcome to High Performance Web Server</h1>\
<p>This server is designed to outperform Nginx and Apache by utilizing \
advanced I/O techniques, a modular architecture, and an efficient reverse proxy mechanism.</p>\
</body></html>";

/// `200 OK` head for a raw file body of `len` bytes.
pub(crate) fn file_head(len: u64) -> Vec<u8> {
    let mut head = Vec::with_capacity(64);
    head.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Length: ");
    let mut buf = itoa::Buffer::new();
    head.extend_from_slice(buf.format(len).as_bytes());
    head.extend_from_slice(b"\r\n\r\n");
    head
}

/// `200 OK` head for an html body of `len` bytes.
pub(crate) fn html_head(len: usize) -> Vec<u8> {
    let mut head = Vec::with_capacity(96);
    head.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: ");
    let mut buf = itoa::Buffer::new();
    head.extend_from_slice(buf.format(len).as_bytes());
    head.extend_from_slice(b"\r\n\r\n");
    head
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn templates() {
        assert_eq!(NOT_FOUND, b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(
            BAD_REQUEST,
            b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn file_head_length() {
        assert_eq!(
            file_head(13),
            b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\n"
        );
    }

    #[test]
    fn html_head_length() {
        assert_eq!(
            html_head(5),
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\n"
        );
    }

    #[test]
    fn welcome_page_title() {
        assert!(WELCOME_HTML.contains("High Performance Web Server"));
    }
}
