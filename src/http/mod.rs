//! HTTP Module
//!
//! The JSON front-end: `/init`, `/search` and `/find/{id}`.
//!
//! ## Architecture
//! - Single nonblocking acceptor thread
//! - Fixed worker pool fed through a bounded crossbeam channel
//! - One request per connection (`Connection: close`)
//! - Handlers call the store through a shared `Executor`

mod client;
mod connection;
mod envelope;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub use client::{Client, ClientResponse};
pub use connection::Connection;
pub use envelope::{Envelope, EnvelopeKind};
pub use handler::{Handler, Reply};
pub use request::{parse_params, percent_decode, Method, Request};
pub use response::{Response, StatusCode};
pub use router::{route, Route, RouteError};
pub use server::Server;
