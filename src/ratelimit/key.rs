//! Caller key derivation.
//!
//! A key identifies who is being counted. By default it is the client
//! address, taken from the usual reverse-proxy headers before falling back
//! to the socket address.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{request::Parts, HeaderMap, Request};

/// Key used when no client address can be found.
pub const UNKNOWN_KEY: &str = "unknown";

/// Address headers consulted by [`default_key`], highest priority first.
const ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "x-client-ip"];

/// A request-like value that exposes what key derivation needs.
pub trait ClientRequest {
    /// Value of a header, if present and valid UTF-8.
    fn header(&self, name: &str) -> Option<&str>;

    /// Address of the directly connected peer, if known.
    fn remote_addr(&self) -> Option<IpAddr>;
}

/// A custom key derivation function.
pub type KeyGenerator = Arc<dyn Fn(&dyn ClientRequest) -> String + Send + Sync>;

/// Derive the default key for a request.
///
/// Checks `x-forwarded-for` (first comma-separated entry), `x-real-ip` and
/// `x-client-ip` in that order, then the connection address, and finally
/// returns [`UNKNOWN_KEY`]. Blank header values are skipped.
pub fn default_key(request: &dyn ClientRequest) -> String {
    for name in ADDRESS_HEADERS {
        let candidate = request
            .header(name)
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if let Some(address) = candidate {
            return address.to_string();
        }
    }

    request
        .remote_addr()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_KEY.to_string())
}

/// An owned description of a request, for callers outside an HTTP stack.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Request headers
    pub headers: HeaderMap,
    /// Directly connected peer
    pub remote_addr: Option<IpAddr>,
}

impl RequestInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            axum::http::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl ClientRequest for RequestInfo {
    fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }
}

impl<B> ClientRequest for Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        header_str(self.headers(), name)
    }

    fn remote_addr(&self) -> Option<IpAddr> {
        self.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }
}

impl ClientRequest for Parts {
    fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    fn remote_addr(&self) -> Option<IpAddr> {
        self.extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
