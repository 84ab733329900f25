//! hyper connector built from the resolving dialer.
//!
//! Every connection the pooled client opens goes through [`Connector`]:
//! resolve and dial (directly or to a proxy), optionally tunnel with
//! `CONNECT`, optionally run a TLS handshake. The deadline-enforcing stream
//! sits at the bottom of all of it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tower_service::Service;

use super::deadline::DeadlineStream;
use super::dialer::{ConnectError, ConnectErrorKind, Dialer};
use crate::modules::proxy::{ProxyPolicy, ProxyTarget};
use crate::modules::tls::TLSPolicy;

const MAX_TUNNEL_RESPONSE: usize = 8 * 1024;

type Stream = DeadlineStream<TcpStream>;

/// Plain or TLS-wrapped connection.
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(Stream),
    Tls(Box<TlsStream<Stream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connection handed to hyper.
#[derive(Debug)]
pub struct Conn {
    io: TokioIo<MaybeTlsStream>,
    proxied: bool,
    secure: bool,
}

impl Conn {
    /// Whether requests on this connection go to a forward proxy in
    /// absolute-form (plain HTTP through a proxy, not a tunnel).
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl Connection for Conn {
    fn connected(&self) -> Connected {
        Connected::new().proxy(self.proxied)
    }
}

impl Read for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Read::poll_read(Pin::new(&mut self.get_mut().io), cx, buf)
    }
}

impl Write for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Write::poll_write(Pin::new(&mut self.get_mut().io), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Write::poll_flush(Pin::new(&mut self.get_mut().io), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Write::poll_shutdown(Pin::new(&mut self.get_mut().io), cx)
    }
}

/// `Service<Uri>` that opens connections for the pooled client.
#[derive(Debug, Clone)]
pub struct Connector {
    dialer: Dialer,
    proxy: Arc<ProxyPolicy>,
    tls: TLSPolicy,
}

impl Connector {
    pub fn new(dialer: Dialer, proxy: Arc<ProxyPolicy>, tls: TLSPolicy) -> Self {
        Self { dialer, proxy, tls }
    }

    pub async fn connect(&self, dst: Uri) -> Result<Conn, ConnectError> {
        let scheme = dst.scheme_str().unwrap_or("http").to_ascii_lowercase();
        let secure = match scheme.as_str() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ConnectError::new(
                    ConnectErrorKind::Connect,
                    dst.to_string(),
                    format!("unsupported scheme {other:?}"),
                ));
            }
        };
        let host = dst
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| ConnectError::new(ConnectErrorKind::Connect, dst.to_string(), "missing host"))?;
        let port = dst.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let proxy = self.proxy.select(&dst);
        let (stream, proxied) = match proxy {
            None => (self.dialer.dial(&host, port).await?, false),
            Some(target) => {
                if target.scheme != "http" {
                    return Err(ConnectError::new(
                        ConnectErrorKind::Proxy,
                        target.to_string(),
                        format!("unsupported proxy scheme {:?}", target.scheme),
                    ));
                }
                log::debug!("connecting to {host}:{port} via proxy {target}");
                let stream = self
                    .dialer
                    .dial(&target.host, target.port)
                    .await
                    .map_err(|err| as_proxy_error(err, &target))?;
                if secure {
                    (tunnel(stream, &host, port, &target).await?, false)
                } else {
                    (stream, true)
                }
            }
        };

        let io = if secure {
            let tls = self.tls.handshake(&host, stream).await?;
            MaybeTlsStream::Tls(Box::new(tls))
        } else {
            MaybeTlsStream::Plain(stream)
        };

        Ok(Conn {
            io: TokioIo::new(io),
            proxied,
            secure,
        })
    }
}

impl Service<Uri> for Connector {
    type Response = Conn;
    type Error = ConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<Conn, ConnectError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move { connector.connect(dst).await })
    }
}

fn as_proxy_error(err: ConnectError, target: &ProxyTarget) -> ConnectError {
    match err.kind() {
        ConnectErrorKind::Timeout => err,
        _ => ConnectError::new(ConnectErrorKind::Proxy, target.to_string(), err.to_string())
            .with_source(err),
    }
}

/// Opens a `CONNECT` tunnel to `host:port` through an already-dialed proxy.
async fn tunnel(
    mut stream: Stream,
    host: &str,
    port: u16,
    proxy: &ProxyTarget,
) -> Result<Stream, ConnectError> {
    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };

    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = proxy.authorization.as_ref().and_then(|v| v.to_str().ok()) {
        request.push_str("Proxy-Authorization: ");
        request.push_str(auth);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    let io_err = |err: io::Error| ConnectError::from_io(ConnectErrorKind::Proxy, &proxy.to_string(), err);
    stream.write_all(request.as_bytes()).await.map_err(io_err)?;
    stream.flush().await.map_err(io_err)?;

    // Byte at a time: anything past the blank line belongs to the tunnel.
    let mut response = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.map_err(io_err)?;
        if n == 0 {
            return Err(ConnectError::new(
                ConnectErrorKind::Proxy,
                proxy.to_string(),
                "proxy closed the connection during CONNECT",
            ));
        }
        response.push(byte[0]);
        if response.ends_with(b"\r\n\r\n") {
            break;
        }
        if response.len() > MAX_TUNNEL_RESPONSE {
            return Err(ConnectError::new(
                ConnectErrorKind::Proxy,
                proxy.to_string(),
                "CONNECT response headers too large",
            ));
        }
    }

    let status_line = response
        .split(|b| *b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or("");
    if status != "200" {
        return Err(ConnectError::new(
            ConnectErrorKind::Proxy,
            proxy.to_string(),
            format!("CONNECT {authority} rejected: {status_line}"),
        ));
    }

    log::trace!("tunnel to {authority} established via {proxy}");
    Ok(stream)
}
