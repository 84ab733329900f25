//! Normalized, serializable records of a completed call.
//!
//! A [`NormalizedResponse`] captures the final response, the request that
//! produced it, and the normalized responses of every redirect hop that came
//! before it (oldest first). Raw wire text is rebuilt from the captured
//! messages by [`raw`].

pub mod raw;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

use crate::client::exchange::{Exchange, SentRequest};

/// The request side of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRequest {
    pub method: String,
    pub url: String,
    pub scheme: String,
    pub proto: String,
    pub host: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub raw_headers: String,
    pub cookies: BTreeMap<String, String>,
    pub raw_cookies: String,
    pub raw: String,
}

impl NormalizedRequest {
    pub fn from_sent(request: &SentRequest) -> Self {
        let cookies = raw::request_cookies(&request.headers);
        Self {
            method: request.method.to_string(),
            url: request.url.to_string(),
            scheme: request.url.scheme().to_string(),
            proto: raw::proto(request.version).to_string(),
            host: request.effective_host(),
            body: raw::body_text(request),
            headers: raw::header_map(&request.headers),
            raw_headers: raw::raw_headers(&request.headers),
            cookies: raw::cookie_map(&cookies),
            raw_cookies: raw::raw_cookies(&cookies),
            raw: raw::raw_request(request),
        }
    }
}

/// The final response of a call, or one hop of its redirect history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedResponse {
    pub status_code: u16,
    pub body: Bytes,
    pub body_size: usize,
    pub headers: BTreeMap<String, String>,
    pub raw_headers: String,
    pub cookies: BTreeMap<String, String>,
    pub raw_cookies: String,
    pub proto: String,
    pub url: String,
    pub request: NormalizedRequest,
    /// Empty for hops inside another response's history.
    pub history: Vec<NormalizedResponse>,
}

impl NormalizedResponse {
    /// Normalizes `exchange` and the redirect chain behind it.
    pub fn from_exchange(exchange: &Exchange) -> Self {
        let mut normalized = Self::single(exchange);
        normalized.history = history(exchange.previous.as_deref());
        normalized
    }

    /// Normalizes one exchange without walking its predecessors.
    pub fn single(exchange: &Exchange) -> Self {
        let response = &exchange.response;
        let cookies = raw::response_cookies(&response.headers);
        Self {
            status_code: response.status.as_u16(),
            body: response.body.clone(),
            body_size: response.body.len(),
            headers: raw::header_map(&response.headers),
            raw_headers: raw::raw_headers(&response.headers),
            cookies: raw::cookie_map(&cookies),
            raw_cookies: raw::raw_cookies(&cookies),
            proto: raw::proto(response.version).to_string(),
            url: exchange.request.url.to_string(),
            request: NormalizedRequest::from_sent(&exchange.request),
            history: Vec::new(),
        }
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&raw::canonical_name(name)).map(String::as_str)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }
}

/// Normalized responses of the chain ending at `last`, oldest first.
pub fn history(last: Option<&Exchange>) -> Vec<NormalizedResponse> {
    crate::client::exchange::chain(last)
        .into_iter()
        .map(NormalizedResponse::single)
        .collect()
}
