//! HTTP/1.1-subset request/response framing.
//!
//! This is the private wire format between the Palioxis client and server,
//! not a general HTTP stack. One request per connection; headers and body
//! are separated by the first empty `\r\n\r\n`; the body is bounded by
//! `Content-Length` when present and by the remaining buffered bytes
//! otherwise.

#![allow(missing_docs)]

use std::io::Read;

use memchr::memmem;

use crate::core::errors::{PalioxisError, Result};

/// Hard cap on a framed request; a DPoP-signed trigger is under 2 KiB.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

/// Response status codes the protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Unauthorized,
    Forbidden,
    MethodNotAllowed,
    InternalServerError,
}

impl Status {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::MethodNotAllowed => 405,
            Self::InternalServerError => 500,
        }
    }

    #[must_use]
    pub const fn phrase(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Internal Server Error",
        }
    }
}

/// A parsed inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub version: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup (first match wins).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body with ASCII whitespace trimmed, for key comparison.
    #[must_use]
    pub fn body_trimmed(&self) -> &[u8] {
        self.body.trim_ascii()
    }
}

/// An outbound response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub message: String,
}

impl Response {
    #[must_use]
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `HTTP/1.1 <code> <phrase>\r\n\r\n<message>`
    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\n\r\n{}",
            self.status.code(),
            self.status.phrase(),
            self.message
        )
        .into_bytes()
    }
}

/// Parse one request out of a raw byte buffer.
pub fn parse_request(raw: &[u8]) -> Result<Request> {
    if raw.len() > MAX_REQUEST_BYTES {
        return Err(malformed("request exceeds size cap"));
    }

    let split = memmem::find(raw, HEADER_DELIMITER)
        .ok_or_else(|| malformed("missing header/body delimiter"))?;
    let header_bytes = &raw[..split];
    let rest = &raw[split + HEADER_DELIMITER.len()..];

    let header_text = std::str::from_utf8(header_bytes)
        .map_err(|_| malformed("headers are not valid UTF-8"))?;
    let mut lines = header_text.split("\r\n");

    let request_line = lines.next().ok_or_else(|| malformed("empty request"))?;
    let (method, path, version) = parse_request_line(request_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(malformed(format!("header line without colon: {line}")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    // Body: bounded by Content-Length when present, otherwise everything
    // after the delimiter.
    let body = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map_or_else(
            || Ok(rest.to_vec()),
            |(_, v)| {
                let length: usize = v
                    .parse()
                    .map_err(|_| malformed(format!("bad Content-Length: {v}")))?;
                if length > rest.len() {
                    return Err(malformed("body shorter than Content-Length"));
                }
                Ok(rest[..length].to_vec())
            },
        )?;

    Ok(Request {
        method,
        path,
        version,
        headers,
        body,
    })
}

/// Read one request off a stream: buffer until the header delimiter appears,
/// then until `Content-Length` is satisfied. EOF before that is malformed.
pub fn read_request<R: Read>(stream: &mut R) -> Result<Request> {
    let mut buf = Vec::with_capacity(2048);
    let mut chunk = [0u8; 2048];

    loop {
        let n = stream
            .read(&mut chunk)
            .map_err(|err| malformed(format!("read: {err}")))?;
        if n == 0 {
            // Peer closed; parse whatever we have.
            return parse_request(&buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(malformed("request exceeds size cap"));
        }

        if let Some(split) = memmem::find(&buf, HEADER_DELIMITER) {
            let have = buf.len() - split - HEADER_DELIMITER.len();
            match declared_content_length(&buf[..split]) {
                Some(needed) if have < needed => {} // keep reading
                _ => return parse_request(&buf),
            }
        }
    }
}

/// Build the one request this protocol sends.
#[must_use]
pub fn render_request(host: &str, port: u16, dpop: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "POST /destroy HTTP/1.1\r\nHost: {host}:{port}\r\nDPoP: {dpop}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Parse the status code out of a raw response, plus the trailing message.
pub fn parse_response(raw: &[u8]) -> Result<(u16, String)> {
    let text = String::from_utf8_lossy(raw);
    let status_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| malformed("empty response"))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(malformed(format!("bad response status line: {status_line}")));
    }
    let code: u16 = parts
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| malformed(format!("bad response status line: {status_line}")))?;

    let message = text
        .split_once("\r\n\r\n")
        .map(|(_, m)| m.trim().to_string())
        .unwrap_or_default();
    Ok((code, message))
}

fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let mut parts = line.split(' ').filter(|p| !p.is_empty());
    let method = parts.next();
    let path = parts.next();
    let version = parts.next();
    match (method, path, version, parts.next()) {
        (Some(method), Some(path), Some(version), None) if version.starts_with("HTTP/") => Ok((
            method.to_string(),
            path.to_string(),
            version.to_string(),
        )),
        _ => Err(malformed(format!("bad request line: {line}"))),
    }
}

fn declared_content_length(header_bytes: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header_bytes).ok()?;
    for line in text.split("\r\n").skip(1) {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("Content-Length")
        {
            return value.trim().parse().ok();
        }
    }
    None
}

fn malformed(details: impl Into<String>) -> PalioxisError {
    PalioxisError::RequestMalformed {
        details: details.into(),
    }
}
