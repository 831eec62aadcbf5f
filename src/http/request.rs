//! HTTP/1.1 request parsing
//!
//! Just enough of HTTP/1.1 for a one-request-per-connection JSON API:
//! request line, headers, an optional `Content-Length` body and
//! url-encoded query/form parameters.

use std::fmt;
use std::io::{self, BufRead, Read};

use crate::error::{Result, WidecolError};

/// Longest accepted request line or header line
pub const MAX_LINE: usize = 8 * 1024;

/// Most header lines accepted
pub const MAX_HEADERS: usize = 100;

/// Largest accepted request body
pub const MAX_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Other(String),
}

impl Method {
    fn parse(raw: &str) -> Self {
        match raw {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

/// Read one line without its CRLF, bounded by [`MAX_LINE`]
///
/// Returns `None` on a clean EOF before any byte.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut raw = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE as u64 + 1)
        .read_until(b'\n', &mut raw)?;
    if read == 0 {
        return Ok(None);
    }
    if raw.last() != Some(&b'\n') {
        if raw.len() > MAX_LINE {
            return Err(WidecolError::Http("line too long".to_string()));
        }
        return Err(WidecolError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        )));
    }
    while matches!(raw.last(), Some(b'\n') | Some(b'\r')) {
        raw.pop();
    }
    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| WidecolError::Http("request is not valid UTF-8".to_string()))
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` escapes; with `plus_as_space`, `+` decodes to a space
///
/// Malformed escapes are kept literally.
pub fn percent_decode(raw: &str, plus_as_space: bool) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' if plus_as_space => out.push(b' '),
            byte => out.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `a=1&b=2` pairs
pub fn parse_params(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (percent_decode(name, true), percent_decode(value, true)),
            None => (percent_decode(pair, true), String::new()),
        })
        .collect()
}

impl Request {
    /// Build a request directly, mainly for handler tests
    pub fn new(method: Method, target: &str) -> Self {
        let (path, params) = match target.split_once('?') {
            Some((path, query)) => (path, parse_params(query)),
            None => (target, Vec::new()),
        };
        Self {
            method,
            path: percent_decode(path, false),
            params,
            headers: Vec::new(),
        }
    }

    /// Read a request from a connection
    ///
    /// A clean EOF before the request line is reported as an
    /// `UnexpectedEof` I/O error. Url-encoded form bodies are merged into
    /// the parameters after the query string ones.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self> {
        let line = read_line(reader)?.ok_or_else(|| {
            WidecolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before a request",
            ))
        })?;

        let mut parts = line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version)) => (method, target, version),
            _ => {
                return Err(WidecolError::Http(format!(
                    "malformed request line '{}'",
                    line
                )))
            }
        };
        if !version.starts_with("HTTP/1.") {
            return Err(WidecolError::Http(format!(
                "unsupported HTTP version '{}'",
                version
            )));
        }

        let mut request = Self::new(Method::parse(method), target);

        loop {
            let line = read_line(reader)?.ok_or_else(|| {
                WidecolError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside headers",
                ))
            })?;
            if line.is_empty() {
                break;
            }
            if request.headers.len() >= MAX_HEADERS {
                return Err(WidecolError::Http("too many headers".to_string()));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| WidecolError::Http(format!("malformed header '{}'", line)))?;
            request
                .headers
                .push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        let length = match request.header("content-length") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| WidecolError::Http(format!("bad Content-Length '{}'", raw)))?,
            None => 0,
        };
        if length > MAX_BODY {
            return Err(WidecolError::Http(format!(
                "body of {} bytes exceeds {} bytes",
                length, MAX_BODY
            )));
        }
        if length > 0 {
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body)?;
            let is_form = request
                .header("content-type")
                .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
                .unwrap_or(false);
            if is_form {
                let form = String::from_utf8_lossy(&body).into_owned();
                request.params.extend(parse_params(&form));
            }
        }

        Ok(request)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First value of a query or form parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
