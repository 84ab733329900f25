//! Resolving dialer.
//!
//! Opens TCP connections, substituting a resolver-chosen address for the host
//! name when a resolver is configured, and wraps every connection in a
//! [`DeadlineStream`] seeded with the call timeout.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

use super::deadline::DeadlineStream;
use super::resolver::Resolver;

/// Stage at which establishing a connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectErrorKind {
    #[error("dns")]
    Dns,
    #[error("connect")]
    Connect,
    #[error("timeout")]
    Timeout,
    #[error("tls")]
    Tls,
    #[error("proxy")]
    Proxy,
}

/// Connection-establishment failure.
#[derive(Debug, Error)]
#[error("{kind} error for {target}: {message}")]
pub struct ConnectError {
    kind: ConnectErrorKind,
    target: String,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ConnectErrorKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn from_io(kind: ConnectErrorKind, target: &str, err: io::Error) -> Self {
        let kind = if err.kind() == io::ErrorKind::TimedOut {
            ConnectErrorKind::Timeout
        } else {
            kind
        };
        let message = err.to_string();
        Self::new(kind, target, message).with_source(err)
    }
}

/// Dials `host:port` pairs.
#[derive(Clone)]
pub struct Dialer {
    resolver: Option<Arc<dyn Resolver>>,
    timeout: Duration,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("resolver", &self.resolver.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dialer {
    pub fn new(resolver: Option<Arc<dyn Resolver>>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connects to `host:port`. Resolution and dial failures are both
    /// connection-establishment errors; nothing is retried beyond trying each
    /// system-resolved address once.
    pub async fn dial(&self, host: &str, port: u16) -> Result<DeadlineStream<TcpStream>, ConnectError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let target = format!("{host}:{port}");

        let candidates: Vec<SocketAddr> = if let Ok(ip) = host.parse::<IpAddr>() {
            vec![SocketAddr::new(ip, port)]
        } else if let Some(resolver) = &self.resolver {
            let ip = resolver.resolve_one(host).await.map_err(|err| {
                ConnectError::new(ConnectErrorKind::Dns, &target, err.to_string()).with_source(err)
            })?;
            log::trace!("resolved {host} -> {ip}");
            vec![SocketAddr::new(ip, port)]
        } else {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
                .await
                .map_err(|err| ConnectError::from_io(ConnectErrorKind::Dns, &target, err))?
                .collect();
            if addrs.is_empty() {
                return Err(ConnectError::new(
                    ConnectErrorKind::Dns,
                    &target,
                    "no addresses found",
                ));
            }
            addrs
        };

        let mut last_error = None;
        for addr in candidates {
            match self.connect_addr(addr, &target).await {
                Ok(stream) => return Ok(DeadlineStream::new(stream, self.timeout)),
                Err(err) => {
                    log::debug!("dial {addr} for {target} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ConnectError::new(ConnectErrorKind::Connect, &target, "no candidate addresses")
        }))
    }

    async fn connect_addr(&self, addr: SocketAddr, target: &str) -> Result<TcpStream, ConnectError> {
        let connect = TcpStream::connect(addr);
        let result = if self.timeout.is_zero() {
            connect.await
        } else {
            match tokio::time::timeout(self.timeout, connect).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ConnectError::new(
                        ConnectErrorKind::Timeout,
                        target,
                        format!("connect timed out after {:?}", self.timeout),
                    ));
                }
            }
        };
        let stream =
            result.map_err(|err| ConnectError::from_io(ConnectErrorKind::Connect, target, err))?;

        if let Err(err) = stream.set_nodelay(true) {
            log::trace!("set_nodelay on {addr} failed: {err}");
        }
        Ok(stream)
    }
}
