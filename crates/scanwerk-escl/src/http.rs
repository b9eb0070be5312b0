// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 framing for the eSCL server.
//
// One request per connection: the request line, headers, and a
// `Content-Length` body are read; the response is written either with a
// fixed length or with chunked transfer encoding, then the connection is
// closed.

use std::io::{self, Read, Write};

use scanwerk_core::error::{Result, ScanwerkError};

/// Largest accepted request head.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Largest accepted request body (scan tickets are a few KiB).
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_CONFLICT: u16 = 409;
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_SERVICE_UNAVAILABLE: u16 = 503;

/// Standard reason phrase for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        HTTP_OK => "OK",
        HTTP_CREATED => "Created",
        HTTP_BAD_REQUEST => "Bad Request",
        HTTP_NOT_FOUND => "Not Found",
        405 => "Method Not Allowed",
        HTTP_CONFLICT => "Conflict",
        413 => "Payload Too Large",
        HTTP_INTERNAL_SERVER_ERROR => "Internal Server Error",
        HTTP_SERVICE_UNAVAILABLE => "Service Unavailable",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A parsed request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    /// Request path without query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn malformed(message: impl Into<String>) -> ScanwerkError {
    ScanwerkError::Server(message.into())
}

/// Read one request.  `Ok(None)` when the peer closed the connection
/// without sending anything.
pub fn read_request<R: Read>(stream: &mut R) -> Result<Option<HttpRequest>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(malformed("request head too large"));
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(malformed("connection closed inside request head"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed(format!("bad request line '{request_line}'")));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(malformed(format!("unsupported protocol '{version}'")));
    }
    let path = target.split(['?', '#']).next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(malformed(format!("bad header line '{line}'")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let mut request = HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body: Vec::new(),
    };

    let content_length = match request.header("content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| malformed(format!("bad Content-Length '{raw}'")))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(malformed(format!("request body of {content_length} bytes too large")));
    }

    let mut body = buf.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(malformed("connection closed inside request body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    request.body = body;
    Ok(Some(request))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A complete, fixed-length response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let mut response = self.with_header("Content-Type", content_type);
        response.body = body.into();
        response
    }

    pub fn xml(body: String) -> Self {
        Self::new(HTTP_OK).with_body("text/xml", body)
    }

    pub fn html(body: String) -> Self {
        Self::new(HTTP_OK).with_body("text/html; charset=utf-8", body)
    }

    /// Status-only response with a short plain-text body.
    pub fn status_only(status: u16) -> Self {
        Self::new(status).with_body("text/plain", format!("{status} {}\r\n", reason_phrase(status)))
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write_head(out, self.status, &self.headers, Some(self.body.len()))?;
        out.write_all(&self.body)?;
        out.flush()
    }
}

/// Write the status line and headers.  With `content_length` `None` the
/// body is announced as chunked.
pub fn write_head<W: Write>(
    out: &mut W,
    status: u16,
    headers: &[(String, String)],
    content_length: Option<usize>,
) -> io::Result<()> {
    let mut head = format!("HTTP/1.1 {status} {}\r\n", reason_phrase(status));
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    match content_length {
        Some(len) => head.push_str(&format!("Content-Length: {len}\r\n")),
        None => head.push_str("Transfer-Encoding: chunked\r\n"),
    }
    head.push_str("Connection: close\r\n\r\n");
    out.write_all(head.as_bytes())
}

/// Chunked transfer-encoding body writer.  Call [`finish`] to send the
/// terminating chunk.
///
/// [`finish`]: ChunkedWriter::finish
#[derive(Debug)]
pub struct ChunkedWriter<W: Write> {
    inner: W,
    payload_bytes: u64,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, payload_bytes: 0 }
    }

    /// Body bytes written so far, excluding chunk framing.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    /// Write the last chunk and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        write!(self.inner, "{:x}\r\n", buf.len())?;
        self.inner.write_all(buf)?;
        self.inner.write_all(b"\r\n")?;
        self.payload_bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
