//! Captured request/response pairs linked into a redirect chain.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

use crate::request::body::BodySource;

/// A request exactly as it was handed to the transport (minus
/// transport-managed headers such as `Accept-Encoding`).
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub host: Option<String>,
    pub body: BodySource,
    pub version: Version,
}

impl SentRequest {
    /// Host the request was addressed to: the override, else the URL's
    /// `host[:port]`.
    pub fn effective_host(&self) -> String {
        if let Some(host) = self.host.as_ref().filter(|h| !h.is_empty()) {
            return host.clone();
        }
        url_authority(&self.url)
    }
}

/// `host[:port]` of `url`, the port only when it is explicit.
pub fn url_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One completed round trip. `previous` is the exchange whose redirect
/// caused this one.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: SentRequest,
    pub response: CapturedResponse,
    pub previous: Option<Box<Exchange>>,
}

impl Exchange {
    /// Exchanges that led here, oldest first, excluding `self`.
    pub fn history(&self) -> Vec<&Exchange> {
        chain(self.previous.as_deref())
    }
}

/// Walks `last` back through its `previous` links, returning the chain
/// oldest first.
pub fn chain(last: Option<&Exchange>) -> Vec<&Exchange> {
    let mut hops = Vec::new();
    let mut cursor = last;
    while let Some(exchange) = cursor {
        hops.push(exchange);
        cursor = exchange.previous.as_deref();
    }
    hops.reverse();
    hops
}
