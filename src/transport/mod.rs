//! Connection layer: deadline-enforcing streams, resolvers, the dialer, and
//! the pooled hyper client assembled from them.

pub mod connector;
pub mod deadline;
pub mod dialer;
pub mod resolver;

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::PROXY_AUTHORIZATION;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use thiserror::Error;

use crate::modules::proxy::ProxyPolicy;
use crate::modules::tls::{TLSConfig, TLSPolicy};
use crate::request::options::RequestOptions;

pub use connector::{Conn, Connector, MaybeTlsStream};
pub use deadline::DeadlineStream;
pub use dialer::{ConnectError, ConnectErrorKind, Dialer};
pub use resolver::{CachingResolver, ResolveError, Resolver, StaticResolver, SystemResolver};

/// Pool tuning shared by every transport an engine builds.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub tls_handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 100,
            idle_timeout: Duration::from_secs(90),
            tls_handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Coarse classification of a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportErrorKind {
    #[error("dns")]
    Dns,
    #[error("connect")]
    Connect,
    #[error("tls")]
    Tls,
    #[error("proxy")]
    Proxy,
    #[error("timeout")]
    Timeout,
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("protocol")]
    Protocol,
    #[error("io")]
    Io,
}

impl From<ConnectErrorKind> for TransportErrorKind {
    fn from(kind: ConnectErrorKind) -> Self {
        match kind {
            ConnectErrorKind::Dns => TransportErrorKind::Dns,
            ConnectErrorKind::Connect => TransportErrorKind::Connect,
            ConnectErrorKind::Timeout => TransportErrorKind::Timeout,
            ConnectErrorKind::Tls => TransportErrorKind::Tls,
            ConnectErrorKind::Proxy => TransportErrorKind::Proxy,
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies any error raised while sending a request or reading its
    /// body by walking its source chain.
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        let message = render_chain(err);
        let mut current = Some(err);
        while let Some(cause) = current {
            if let Some(connect) = cause.downcast_ref::<ConnectError>() {
                return Self::new(connect.kind().into(), message);
            }
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                let kind = match io_err.kind() {
                    io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
                    _ => TransportErrorKind::Io,
                };
                return Self::new(kind, message);
            }
            if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
                if hyper_err.is_timeout() {
                    return Self::new(TransportErrorKind::Timeout, message);
                }
                if hyper_err.is_parse() || hyper_err.is_incomplete_message() || hyper_err.is_user() {
                    // Keep walking: an io cause below is more precise.
                    if cause.source().is_none() {
                        return Self::new(TransportErrorKind::Protocol, message);
                    }
                }
            }
            current = cause.source();
        }
        Self::new(TransportErrorKind::Io, message)
    }
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        current = cause.source();
    }
    rendered
}

/// Connection-pooling transport for a single call.
///
/// Owns its pool outright. [`Transport::dispose`] releases idle connections;
/// nothing is cleaned up in the background.
pub struct Transport {
    client: Client<Connector, Full<Bytes>>,
    proxy: Arc<ProxyPolicy>,
    compression: bool,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("proxy", &self.proxy)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn build(
        config: &TransportConfig,
        options: &RequestOptions,
        resolver: Option<Arc<dyn Resolver>>,
    ) -> Result<Self, TransportError> {
        let proxy = Arc::new(ProxyPolicy::new(options.proxies.clone()));
        let tls = TLSPolicy::new(TLSConfig {
            insecure_skip_verify: options.insecure_skip_verify,
            handshake_timeout: config.tls_handshake_timeout,
        })
        .map_err(|err| TransportError::new(TransportErrorKind::Tls, err.to_string()))?;
        let dialer = Dialer::new(resolver, options.timeout);
        let connector = Connector::new(dialer, proxy.clone(), tls);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .http1_title_case_headers(true)
            .build(connector);

        Ok(Self {
            client,
            proxy,
            compression: !options.disable_compression,
        })
    }

    /// Whether the transport negotiates gzip on the caller's behalf.
    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Sends one request and returns the response head with a streaming body.
    pub async fn send(&self, mut request: Request<Full<Bytes>>) -> Result<Response<Incoming>, TransportError> {
        let plain_http = request.uri().scheme_str() == Some("http");
        if plain_http
            && !request.headers().contains_key(PROXY_AUTHORIZATION)
            && let Some(target) = self.proxy.select(request.uri())
            && let Some(auth) = target.authorization
        {
            request.headers_mut().insert(PROXY_AUTHORIZATION, auth);
        }

        self.client
            .request(request)
            .await
            .map_err(|err| TransportError::classify(&err))
    }

    /// Drops the pool, closing every idle connection.
    pub fn dispose(self) {
        log::trace!("disposing transport");
        drop(self.client);
    }
}
