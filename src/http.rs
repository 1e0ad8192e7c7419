//! Minimal plain-text HTTP client
//!
//! Just enough of HTTP/1.x to issue one request over a [`StreamSocket`]
//! and read the reply back: request preparation with the mandatory
//! defaults filled in, response parsing with case-insensitive header
//! fields, and chunked-transfer-encoding reassembly. No TLS, no keep-alive
//! — the connection is opened per request and drained to end of stream.
//!
//! Consumed by [`resolver::public_address`](crate::resolver::public_address).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use tracing::warn;

use crate::addr::Ipv4Address;
use crate::resolver;
use crate::tcp::StreamSocket;
use crate::SocketError;

/// Failure modes of an HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The host name did not resolve (or the scheme is unsupported).
    #[error("host could not be resolved")]
    UnresolvedHost,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Socket(#[from] SocketError),

    /// The server's reply did not parse as an HTTP response.
    #[error("malformed response")]
    InvalidResponse,
}

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// An HTTP request: method, path, header fields and body.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: String,
    /// Field names are stored lowercase; HTTP headers are
    /// case-insensitive.
    fields: BTreeMap<String, String>,
    body: String,
    version: (u32, u32),
}

impl Request {
    /// Create a request for `uri` (a leading '/' is added if missing).
    pub fn new(uri: &str, method: Method) -> Self {
        let mut request = Self {
            method,
            uri: String::new(),
            fields: BTreeMap::new(),
            body: String::new(),
            version: (1, 0),
        };
        request.set_uri(uri);
        request
    }

    /// Set a header field, replacing any previous value.
    pub fn set_field(&mut self, field: &str, value: &str) {
        self.fields.insert(field.to_ascii_lowercase(), value.to_string());
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn set_uri(&mut self, uri: &str) {
        self.uri = if uri.starts_with('/') {
            uri.to_string()
        } else {
            format!("/{}", uri)
        };
    }

    pub fn set_http_version(&mut self, major: u32, minor: u32) {
        self.version = (major, minor);
    }

    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
    }

    fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(&field.to_ascii_lowercase())
    }

    /// Render the request into its text wire form.
    fn prepare(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "{} {} HTTP/{}.{}\r\n",
            self.method.as_str(),
            self.uri,
            self.version.0,
            self.version.1
        );
        for (field, value) in &self.fields {
            let _ = write!(out, "{}: {}\r\n", field, value);
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// A parsed HTTP response: status, header fields and body.
#[derive(Debug, Clone, Default)]
pub struct Response {
    status: u16,
    fields: BTreeMap<String, String>,
    body: String,
    version: (u32, u32),
}

impl Response {
    /// Numeric status code from the status line.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// A header field value, looked up case-insensitively.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The response body, with any chunked transfer coding undone.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// HTTP version of the response as (major, minor).
    pub fn http_version(&self) -> (u32, u32) {
        self.version
    }

    /// Parse a raw reply as received from the socket.
    fn parse(raw: &[u8]) -> Result<Self, HttpError> {
        let mut response = Response::default();

        let (head, body) = split_head(raw);
        let head = String::from_utf8_lossy(head);
        let mut lines = head.lines();

        let status_line = lines.next().ok_or(HttpError::InvalidResponse)?;
        let mut tokens = status_line.split_whitespace();
        response.version =
            parse_version(tokens.next().ok_or(HttpError::InvalidResponse)?)?;
        response.status = tokens
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or(HttpError::InvalidResponse)?;

        parse_fields(lines, &mut response.fields);

        let chunked = response
            .field("transfer-encoding")
            .is_some_and(|value| value.eq_ignore_ascii_case("chunked"));
        response.body = if chunked {
            let (body, trailers) = decode_chunked(body)?;
            parse_fields(trailers.lines(), &mut response.fields);
            body
        } else {
            String::from_utf8_lossy(body).into_owned()
        };

        Ok(response)
    }
}

/// Split a reply at the blank line separating headers from body.
fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = raw.windows(2).position(|window| window == b"\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, &[])
}

/// Parse an "HTTP/x.y" token.
fn parse_version(token: &str) -> Result<(u32, u32), HttpError> {
    let digits = token
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("http/"))
        .map(|_| &token[5..])
        .ok_or(HttpError::InvalidResponse)?;
    let (major, minor) = digits.split_once('.').ok_or(HttpError::InvalidResponse)?;
    Ok((
        major.parse().map_err(|_| HttpError::InvalidResponse)?,
        minor.parse().map_err(|_| HttpError::InvalidResponse)?,
    ))
}

/// Parse "Field: value" lines into the field map; malformed lines are
/// skipped rather than rejected.
fn parse_fields<'a>(lines: impl Iterator<Item = &'a str>, fields: &mut BTreeMap<String, String>) {
    for line in lines {
        if let Some((field, value)) = line.split_once(':') {
            fields.insert(field.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
}

/// Undo chunked transfer coding; returns the body and any trailer block.
///
/// A truncated final chunk yields the bytes that are present rather than
/// an error, matching the tolerant drain-until-close receive model.
fn decode_chunked(mut rest: &[u8]) -> Result<(String, String), HttpError> {
    let mut body = Vec::new();

    loop {
        let Some((line, after)) = next_line(rest) else {
            // Stream ended before a terminating zero-size chunk.
            rest = &[];
            break;
        };
        rest = after;

        // The chunk size is hex, optionally followed by ";extension".
        let line = String::from_utf8_lossy(line);
        let size_token = line.split(';').next().unwrap_or("").trim();
        if size_token.is_empty() {
            continue;
        }
        let size =
            usize::from_str_radix(size_token, 16).map_err(|_| HttpError::InvalidResponse)?;
        if size == 0 {
            break;
        }

        if rest.len() < size {
            body.extend_from_slice(rest);
            rest = &[];
            break;
        }
        body.extend_from_slice(&rest[..size]);
        rest = &rest[size..];

        // Skip the CRLF that terminates the chunk data.
        if let Some(stripped) = rest.strip_prefix(b"\r\n") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix(b"\n") {
            rest = stripped;
        }
    }

    let trailers = String::from_utf8_lossy(rest).into_owned();
    Ok((String::from_utf8_lossy(&body).into_owned(), trailers))
}

/// Take one line off a byte slice, without its terminator.
fn next_line(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if data.is_empty() {
        return None;
    }
    match data.iter().position(|&byte| byte == b'\n') {
        Some(pos) => {
            let line = &data[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            Some((line, &data[pos + 1..]))
        }
        None => Some((data, &[])),
    }
}

/// A client bound to one host, issuing one request per connection.
pub struct HttpClient {
    host: Option<Ipv4Address>,
    host_name: String,
    port: u16,
    connection: StreamSocket,
}

impl HttpClient {
    /// Create a client for `host`; `port` 0 selects the scheme default.
    pub fn new(host: &str, port: u16) -> Self {
        let mut client = Self {
            host: None,
            host_name: String::new(),
            port: 0,
            connection: StreamSocket::new(),
        };
        client.set_host(host, port);
        client
    }

    /// Change the target host. An `http://` prefix is stripped; `https://`
    /// is not supported and leaves the client without a resolved host.
    pub fn set_host(&mut self, host: &str, port: u16) {
        let (name, default_port) = if let Some(rest) = strip_scheme(host, "http://") {
            (rest, 80)
        } else if strip_scheme(host, "https://").is_some() {
            warn!("https is not supported by this client");
            ("", 0)
        } else {
            (host, 80)
        };

        self.host_name = name.trim_end_matches('/').to_string();
        self.port = if port != 0 { port } else { default_port };
        self.host = if self.host_name.is_empty() {
            None
        } else {
            resolver::resolve(&self.host_name)
        };
    }

    /// Send a request and wait for the complete response.
    ///
    /// Mandatory fields the caller did not set are filled in. The timeout
    /// bounds connection establishment; once connected, the reply is read
    /// until the server closes the connection.
    pub fn send_request(
        &mut self,
        request: &Request,
        timeout: Option<Duration>,
    ) -> Result<Response, HttpError> {
        let host = self.host.ok_or(HttpError::UnresolvedHost)?;

        let mut to_send = request.clone();
        if !to_send.has_field("from") {
            to_send.set_field("from", "user@localhost");
        }
        if !to_send.has_field("user-agent") {
            to_send.set_field("user-agent", concat!("netpack/", env!("CARGO_PKG_VERSION")));
        }
        if !to_send.has_field("host") {
            to_send.set_field("host", &self.host_name);
        }
        if !to_send.has_field("content-length") {
            let length = to_send.body.len().to_string();
            to_send.set_field("content-length", &length);
        }
        if to_send.method == Method::Post && !to_send.has_field("content-type") {
            to_send.set_field("content-type", "application/x-www-form-urlencoded");
        }
        if to_send.version >= (1, 1) && !to_send.has_field("connection") {
            to_send.set_field("connection", "close");
        }

        self.connection.connect(host, self.port, timeout)?;
        let result = self.exchange(&to_send);
        self.connection.disconnect();
        result
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, HttpError> {
        self.connection.send(request.prepare().as_bytes())?;

        // The server signals the end of the response by closing.
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match self.connection.receive(&mut chunk) {
                Ok(received) => raw.extend_from_slice(&chunk[..received]),
                Err(SocketError::Disconnected) => break,
                Err(err) => return Err(err.into()),
            }
        }

        Response::parse(&raw)
    }
}

fn strip_scheme<'a>(host: &'a str, scheme: &str) -> Option<&'a str> {
    host.get(..scheme.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
        .map(|_| &host[scheme.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_prepare() {
        let mut request = Request::new("index.html", Method::Get);
        request.set_field("Host", "example.com");

        let wire = request.prepare();
        assert!(wire.starts_with("GET /index.html HTTP/1.0\r\n"));
        assert!(wire.contains("host: example.com\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_request_with_body() {
        let mut request = Request::new("/submit", Method::Post);
        request.set_body("a=1&b=2");
        let wire = request.prepare();
        assert!(wire.starts_with("POST /submit HTTP/1.0\r\n"));
        assert!(wire.ends_with("\r\n\r\na=1&b=2"));
    }

    #[test]
    fn test_parse_identity_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Test: value\r\n\r\n198.51.100.7\n";
        let response = Response::parse(raw).unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.http_version(), (1, 1));
        assert_eq!(response.field("content-type"), Some("text/plain"));
        // Field lookup is case-insensitive.
        assert_eq!(response.field("X-TEST"), Some("value"));
        assert_eq!(response.body(), "198.51.100.7\n");
    }

    #[test]
    fn test_parse_chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let response = Response::parse(raw).unwrap();
        assert_eq!(response.body(), "Wikipedia");
    }

    #[test]
    fn test_parse_chunked_with_extension_and_trailer() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    6;name=value\r\nchunky\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let response = Response::parse(raw).unwrap();
        assert_eq!(response.body(), "chunky");
        assert_eq!(response.field("x-trailer"), Some("yes"));
    }

    #[test]
    fn test_parse_truncated_chunk_keeps_partial_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nA\r\nhal";
        let response = Response::parse(raw).unwrap();
        assert_eq!(response.body(), "hal");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Response::parse(b"not http at all").is_err());
        assert!(Response::parse(b"HTTP/1.1\r\n\r\n").is_err());
        assert!(Response::parse(b"FTP/1.1 200 OK\r\n\r\n").is_err());
        assert!(Response::parse(b"").is_err());
    }

    #[test]
    fn test_https_host_is_rejected() {
        let client = HttpClient::new("https://example.com", 0);
        assert!(client.host.is_none());
    }

    #[test]
    fn test_scheme_stripping_and_default_port() {
        let client = HttpClient::new("http://127.0.0.1/", 0);
        assert_eq!(client.host_name, "127.0.0.1");
        assert_eq!(client.port, 80);
        assert_eq!(client.host, Some(Ipv4Address::LOCALHOST));

        let client = HttpClient::new("127.0.0.1", 8080);
        assert_eq!(client.port, 8080);
    }
}
