//! Proxy selection.
//!
//! Per-call proxies are keyed by the scheme of the request URL. When no proxy
//! is registered for a request's scheme, selection falls back to the
//! environment (`HTTP_PROXY`, `HTTPS_PROXY`, `NO_PROXY` and friends) instead
//! of silently going direct.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::{HeaderValue, Uri};
use hyper_util::client::proxy::matcher::Matcher;
use percent_encoding::percent_decode_str;
use url::Url;

/// Proxy endpoint chosen for one destination.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Ready-made `Proxy-Authorization` value when the proxy has credentials.
    pub authorization: Option<HeaderValue>,
}

impl fmt::Debug for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTarget")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl ProxyTarget {
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let authorization = if url.username().is_empty() {
            None
        } else {
            let username = percent_decode_str(url.username()).decode_utf8_lossy();
            let password = url
                .password()
                .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
                .unwrap_or_default();
            basic_authorization(&username, &password)
        };

        Some(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            authorization,
        })
    }

    fn from_uri(uri: &Uri, authorization: Option<HeaderValue>) -> Option<Self> {
        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let host = uri.host()?.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = uri
            .port_u16()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        Some(Self {
            scheme,
            host,
            port,
            authorization,
        })
    }

    /// `host:port` authority, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Builds a `Basic` credential header value.
pub fn basic_authorization(username: &str, password: &str) -> Option<HeaderValue> {
    let encoded = STANDARD.encode(format!("{username}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Scheme-keyed proxy table with environment fallback.
pub struct ProxyPolicy {
    per_scheme: HashMap<String, Url>,
    env: Option<Matcher>,
}

impl fmt::Debug for ProxyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemes: Vec<&String> = self.per_scheme.keys().collect();
        f.debug_struct("ProxyPolicy")
            .field("schemes", &schemes)
            .field("environment", &self.env.is_some())
            .finish()
    }
}

impl ProxyPolicy {
    /// Uses `per_scheme` first, then the process environment.
    pub fn new(per_scheme: HashMap<String, Url>) -> Self {
        Self {
            per_scheme: normalize(per_scheme),
            env: Some(Matcher::from_env()),
        }
    }

    /// Ignores the environment entirely.
    pub fn explicit_only(per_scheme: HashMap<String, Url>) -> Self {
        Self {
            per_scheme: normalize(per_scheme),
            env: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.per_scheme.is_empty() && self.env.is_none()
    }

    /// Chooses the proxy for `dst`, or `None` to connect directly.
    pub fn select(&self, dst: &Uri) -> Option<ProxyTarget> {
        let scheme = dst.scheme_str().unwrap_or("http").to_ascii_lowercase();
        if let Some(url) = self.per_scheme.get(&scheme) {
            return ProxyTarget::from_url(url);
        }

        if dst.host().is_some_and(is_loopback) {
            return None;
        }

        let intercept = self.env.as_ref()?.intercept(dst)?;
        ProxyTarget::from_uri(intercept.uri(), intercept.basic_auth().cloned())
    }
}

fn normalize(per_scheme: HashMap<String, Url>) -> HashMap<String, Url> {
    per_scheme
        .into_iter()
        .map(|(scheme, url)| (scheme.to_ascii_lowercase(), url))
        .collect()
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
