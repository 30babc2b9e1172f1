//! Network layer for Polly
//!
//! Inbound HTTP/1.1 serving and upstream forwarding.

mod body;
mod client;
mod handler;
mod http;

pub use body::InboundBody;
pub use client::{Upstream, UpstreamForwarder, UpstreamResponse};
pub use handler::NetworkHandler;
pub use http::{
    headers_to_pairs, HttpHandler, InboundRequest, ProxyResponse, FAILURE_BODY, IDENTITY_ENCODING,
};

/// Redirects followed before an upstream call gives up
pub const MAX_REDIRECTS: usize = 10;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
