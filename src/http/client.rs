//! Minimal HTTP client
//!
//! One request per connection, used by the CLI and the integration tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::envelope::Envelope;
use crate::error::{Result, WidecolError};

/// Status code and body of a response
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ClientResponse {
    /// Decode the body as an [`Envelope`]
    pub fn envelope(&self) -> Result<Envelope> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct Client {
    addr: String,
    timeout: Duration,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get(&self, target: &str) -> Result<ClientResponse> {
        self.request("GET", target)
    }

    pub fn request(&self, method: &str, target: &str) -> Result<ClientResponse> {
        let addr = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| WidecolError::Http(format!("cannot resolve {}", self.addr)))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        write!(
            stream,
            "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            method, target, self.addr
        )?;
        stream.flush()?;

        read_response(&mut BufReader::new(stream))
    }
}

fn read_response<R: BufRead>(reader: &mut R) -> Result<ClientResponse> {
    let mut status_line = String::new();
    reader.read_line(&mut status_line)?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            WidecolError::Http(format!("malformed status line '{}'", status_line.trim()))
        })?;

    let mut content_length = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
    }

    let mut body = Vec::new();
    match content_length {
        Some(len) => {
            body.resize(len, 0);
            reader.read_exact(&mut body)?;
        }
        None => {
            reader.read_to_end(&mut body)?;
        }
    }
    Ok(ClientResponse { status, body })
}
