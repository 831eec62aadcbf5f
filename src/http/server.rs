//! HTTP Server
//!
//! Accepts connections on a nonblocking listener and dispatches them to a
//! fixed pool of worker threads.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;

use super::connection::Connection;
use super::handler::Handler;
use crate::cluster::{CancelToken, Executor};
use crate::config::{Config, HttpConfig};
use crate::error::{Result, WidecolError};

/// Accept loop poll interval while idle
const ACCEPT_POLL: Duration = Duration::from_millis(20);

pub struct Server {
    config: HttpConfig,
    handler: Arc<Handler>,
    listener: Option<TcpListener>,
    shutdown: CancelToken,
    fatal: Arc<Mutex<Option<WidecolError>>>,
}

impl Server {
    /// Create a server over `executor`
    ///
    /// The server's shutdown token doubles as the cancellation token of
    /// every request, so in-flight store calls stop when it fires.
    pub fn new(config: &Config, executor: Arc<dyn Executor>) -> Self {
        let shutdown = CancelToken::new();
        let handler = Handler::new(executor, config, shutdown.clone());
        Self {
            config: config.http.clone(),
            handler: Arc::new(handler),
            listener: None,
            shutdown,
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    /// Bind the listener without serving yet
    ///
    /// Returns the bound address, which resolves port 0.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {}", addr);
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_handle(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Serve until shut down (blocking)
    ///
    /// Returns the fatal error that stopped the server, if one did.
    pub fn run(&mut self) -> Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                self.bind()?;
                self.listener
                    .take()
                    .ok_or_else(|| WidecolError::Http("listener not bound".to_string()))?
            }
        };

        let workers = self.config.worker_threads.max(1);
        let (sender, receiver) = channel::bounded::<TcpStream>(workers * 4);
        let handles = (0..workers)
            .map(|id| self.spawn_worker(id, receiver.clone()))
            .collect::<Result<Vec<_>>>()?;
        drop(receiver);

        tracing::info!("Serving with {} worker thread(s)", workers);

        while !self.shutdown.is_cancelled() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::trace!("Accepted {}", peer);
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::warn!("Dropping {}: {}", peer, e);
                        continue;
                    }
                    if sender.send(stream).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        tracing::info!("Shutting down, waiting for workers");
        drop(sender);
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("HTTP worker panicked");
            }
        }

        match self.fatal.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn spawn_worker(&self, id: usize, queue: Receiver<TcpStream>) -> Result<JoinHandle<()>> {
        let handler = Arc::clone(&self.handler);
        let shutdown = self.shutdown.clone();
        let fatal = Arc::clone(&self.fatal);
        let read_ms = self.config.read_timeout_ms;
        let write_ms = self.config.write_timeout_ms;

        let handle = thread::Builder::new()
            .name(format!("widecol-http-{}", id))
            .spawn(move || {
                for stream in queue.iter() {
                    let outcome = Connection::new(stream, Arc::clone(&handler)).and_then(|mut conn| {
                        conn.set_timeouts(read_ms, write_ms)?;
                        conn.handle()
                    });
                    match outcome {
                        Ok(None) => {}
                        Ok(Some(error)) => {
                            tracing::error!("Fatal error, stopping server: {}", error);
                            fatal.lock().get_or_insert(error);
                            shutdown.cancel();
                        }
                        Err(e) => tracing::debug!("Connection ended with error: {}", e),
                    }
                }
            })?;
        Ok(handle)
    }
}
