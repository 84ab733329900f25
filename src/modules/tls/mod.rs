//! TLS verification policy.
//!
//! Wraps a `native-tls` connector configured per call: certificate and host
//! name verification can be switched off for scanning targets with broken
//! certificates, and every handshake is bounded by a timeout.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::native_tls;
use tokio_native_tls::{TlsConnector, TlsStream};

use crate::transport::dialer::{ConnectError, ConnectErrorKind};

#[derive(Debug, Clone)]
pub struct TLSConfig {
    pub insecure_skip_verify: bool,
    pub handshake_timeout: Duration,
}

impl Default for TLSConfig {
    fn default() -> Self {
        Self {
            insecure_skip_verify: false,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Ready-to-use TLS client policy.
#[derive(Clone)]
pub struct TLSPolicy {
    connector: TlsConnector,
    config: TLSConfig,
}

impl fmt::Debug for TLSPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TLSPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TLSPolicy {
    pub fn new(config: TLSConfig) -> Result<Self, native_tls::Error> {
        let mut builder = native_tls::TlsConnector::builder();
        if config.insecure_skip_verify {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let connector = builder.build()?;

        Ok(Self {
            connector: TlsConnector::from(connector),
            config,
        })
    }

    pub fn config(&self) -> &TLSConfig {
        &self.config
    }

    pub fn verifies_certificates(&self) -> bool {
        !self.config.insecure_skip_verify
    }

    /// Runs the client handshake for `domain` over `stream`.
    pub async fn handshake<S>(&self, domain: &str, stream: S) -> Result<TlsStream<S>, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let handshake = self.connector.connect(domain, stream);
        let outcome = if self.config.handshake_timeout.is_zero() {
            handshake.await
        } else {
            match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ConnectError::new(
                        ConnectErrorKind::Timeout,
                        domain,
                        format!(
                            "tls handshake timed out after {:?}",
                            self.config.handshake_timeout
                        ),
                    ));
                }
            }
        };

        outcome.map_err(|err| {
            ConnectError::new(ConnectErrorKind::Tls, domain, err.to_string()).with_source(err)
        })
    }
}
