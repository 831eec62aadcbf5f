//! Connection Handler
//!
//! Serves the single request carried by an accepted connection.

use std::io::{self, BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use super::envelope::Envelope;
use super::handler::Handler;
use super::request::{Method, Request};
use super::response::{Response, StatusCode};
use crate::error::{Result, WidecolError};

pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    handler: Arc<Handler>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, handler: Arc<Handler>) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            handler,
            peer_addr,
        })
    }

    /// Configure connection timeouts (0 leaves the timeout unset)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Read one request, answer it and return the fatal error it raised, if any
    pub fn handle(&mut self) -> Result<Option<WidecolError>> {
        let request = match Request::read_from(&mut self.reader) {
            Ok(request) => request,
            Err(WidecolError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Client {} disconnected", self.peer_addr);
                return Ok(None);
            }
            Err(WidecolError::Io(ref e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!("Connection reset by client {}", self.peer_addr);
                return Ok(None);
            }
            Err(WidecolError::Io(ref e))
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                tracing::debug!("Read timeout for client {}", self.peer_addr);
                return Ok(None);
            }
            Err(WidecolError::Http(reason)) => {
                tracing::debug!("Malformed request from {}: {}", self.peer_addr, reason);
                let response =
                    Response::json(StatusCode::BadRequest, Envelope::error(reason).render());
                self.send(&response, true)?;
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                return Err(e);
            }
        };

        let reply = self.handler.handle(&request);
        tracing::debug!(
            "{} {} {} -> {}",
            self.peer_addr,
            request.method(),
            request.path(),
            reply.response.status().code()
        );

        self.send(&reply.response, *request.method() != Method::Head)?;
        Ok(reply.fatal)
    }

    fn send(&mut self, response: &Response, include_body: bool) -> Result<()> {
        if let Err(e) = response.write_to(&mut self.writer, include_body) {
            match e.kind() {
                io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe => {
                    tracing::debug!(
                        "Client {} disconnected before response could be sent: {}",
                        self.peer_addr,
                        e
                    );
                }
                _ => {
                    tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
