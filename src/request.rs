//! parsed view over a raw http/1.1 request head.

use httparse::{EMPTY_HEADER, Header, Status};

pub(crate) const MAX_HEADERS: usize = 20;

/// Borrowed request head. Method, path and header values all point into the
/// read buffer the head was parsed from.
pub(crate) struct Request<'b> {
    pub method: &'b str,
    pub path: &'b str,
    pub minor_version: u8,
    headers: [Header<'b>; MAX_HEADERS],
    header_count: usize,
}

impl<'b> Request<'b> {
    pub(crate) fn headers(&self) -> &[Header<'b>] {
        &self.headers[..self.header_count]
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ParseError;

/// Parses a complete request head out of `buf`. A head that is truncated,
/// malformed or missing any of method/path/version is an error; the caller
/// answers with 400.
pub(crate) fn parse(buf: &[u8]) -> Result<Request<'_>, ParseError> {
    let mut headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(buf) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) | Err(_) => return Err(ParseError),
    }
    let (method, path) = match (parsed.method, parsed.path) {
        (Some(method), Some(path)) => (method, path),
        _ => return Err(ParseError),
    };
    let minor_version = parsed.version.unwrap_or(1);
    let header_count = parsed.headers.len();
    let mut copied = [EMPTY_HEADER; MAX_HEADERS];
    copied[..header_count].copy_from_slice(parsed.headers);
    Ok(Request {
        method,
        path,
        minor_version,
        headers: copied,
        header_count,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_request() {
        let req = parse(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.minor_version, 1);
        assert!(req.headers().is_empty());
    }

    #[test]
    fn post_request() {
        let req = parse(b"POST /submit HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/submit");
        assert_eq!(req.minor_version, 0);
    }

    #[test]
    fn headers_are_borrowed() {
        let req = parse(b"GET / HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n").unwrap();
        assert_eq!(req.headers().len(), 2);
        assert_eq!(req.headers()[0].name, "Host");
        assert_eq!(req.headers()[0].value, b"example.com");
        assert_eq!(req.headers()[1].name, "Accept");
        assert_eq!(req.headers()[1].value, b"*/*");
    }

    #[test]
    fn missing_terminator_is_partial() {
        assert!(parse(b"GET / HTTP/1.1\r\nHost: x\r\n").is_err());
    }

    #[test]
    fn malformed_request_line() {
        assert!(parse(b"NOT-A-REQUEST\r\n\r\n").is_err());
        assert!(parse(b"GET\r\n\r\n").is_err());
    }
}
