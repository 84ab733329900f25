//! One-shot client orchestration.
//!
//! A [`Client`] owns the transport and cookie jar built for one call, sends
//! the request, follows redirects itself (so every hop is captured), and
//! enforces one total deadline across all hops and body reads.

pub mod cookies;
pub mod decode;
pub mod exchange;
pub mod redirect;

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{ACCEPT_ENCODING, HOST, HeaderValue, REFERER};
use http::{Request, Version};
use http_body_util::BodyExt;
use thiserror::Error;
use url::Url;

use crate::modules::events::{
    EngineEvent, ErrorEvent, EventDispatcher, PostResponseEvent, PreRequestEvent, RedirectEvent,
};
use crate::request::body::BuiltRequest;
use crate::transport::{Transport, TransportError, TransportErrorKind};

pub use cookies::CookieJar;
pub use exchange::{CapturedResponse, Exchange, SentRequest};
pub use redirect::{HopRequest, RedirectPolicy};

/// A failed call, with every exchange completed before the failure.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ClientFailure {
    pub error: TransportError,
    /// Last completed exchange; follow `previous` for the rest.
    pub completed: Option<Box<Exchange>>,
}

impl ClientFailure {
    fn new(error: TransportError, completed: Option<Box<Exchange>>) -> Self {
        Self { error, completed }
    }
}

/// Client for exactly one logical call.
#[derive(Debug)]
pub struct Client {
    transport: Transport,
    jar: CookieJar,
    policy: RedirectPolicy,
    timeout: Duration,
    events: Arc<EventDispatcher>,
}

impl Client {
    pub fn new(
        transport: Transport,
        policy: RedirectPolicy,
        timeout: Duration,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            transport,
            jar: CookieJar::new(),
            policy,
            timeout,
            events,
        }
    }

    /// Executes `request`, following redirects per the policy.
    pub async fn execute(&mut self, request: BuiltRequest) -> Result<Exchange, ClientFailure> {
        // A timeout too large to represent as an instant leaves the call unbounded.
        let deadline = (!self.timeout.is_zero())
            .then(|| tokio::time::Instant::now().checked_add(self.timeout))
            .flatten();
        let caller_referer = request.headers.contains_key(REFERER);

        let mut current = HopRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            host: request.host,
            body: request.body,
        };
        let mut completed: Option<Box<Exchange>> = None;
        let mut redirects = 0usize;

        loop {
            let hop = redirects;
            let mut headers = current.headers.clone();
            self.jar.attach(&current.url, &mut headers);
            let sent = SentRequest {
                method: current.method.clone(),
                url: current.url.clone(),
                headers,
                host: current.host.clone(),
                body: current.body.clone(),
                version: Version::HTTP_11,
            };

            self.events.dispatch(EngineEvent::PreRequest(PreRequestEvent {
                url: sent.url.clone(),
                method: sent.method.clone(),
                headers: sent.headers.clone(),
                hop,
                timestamp: chrono::Utc::now(),
            }));

            let started = Instant::now();
            let response = match self.round_trip(&sent, deadline).await {
                Ok(response) => response,
                Err(err) => {
                    self.report(&sent.url, &err);
                    return Err(ClientFailure::new(err, completed));
                }
            };

            self.events.dispatch(EngineEvent::PostResponse(PostResponseEvent {
                url: sent.url.clone(),
                method: sent.method.clone(),
                status: response.status.as_u16(),
                latency: started.elapsed(),
                hop,
                timestamp: chrono::Utc::now(),
            }));
            self.jar.store_response(&sent.url, &response.headers);

            let exchange = Exchange {
                request: sent,
                response,
                previous: completed.take(),
            };
            if !self.policy.follow {
                return Ok(exchange);
            }

            let next = match redirect::next_hop(
                &current,
                exchange.response.status,
                &exchange.response.headers,
                caller_referer,
            ) {
                Ok(Some(next)) => next,
                Ok(None) => return Ok(exchange),
                Err(err) => {
                    let err = TransportError::new(TransportErrorKind::Protocol, err.to_string());
                    self.report(&exchange.request.url, &err);
                    return Err(ClientFailure::new(err, Some(Box::new(exchange))));
                }
            };

            redirects += 1;
            if redirects > self.policy.max_redirects {
                let err = TransportError::new(
                    TransportErrorKind::TooManyRedirects,
                    format!("stopped after {} redirects", self.policy.max_redirects),
                );
                self.report(&exchange.request.url, &err);
                return Err(ClientFailure::new(err, Some(Box::new(exchange))));
            }

            self.events.dispatch(EngineEvent::Redirect(RedirectEvent {
                from: exchange.request.url.clone(),
                to: next.url.clone(),
                status: exchange.response.status.as_u16(),
                method: next.method.clone(),
                timestamp: chrono::Utc::now(),
            }));

            completed = Some(Box::new(exchange));
            current = next;
        }
    }

    /// Releases the transport's idle connections.
    pub fn dispose(self) {
        self.transport.dispose();
    }

    fn report(&self, url: &Url, err: &TransportError) {
        self.events.dispatch(EngineEvent::Error(ErrorEvent {
            url: url.clone(),
            kind: err.kind.to_string(),
            error: err.message.clone(),
            timestamp: chrono::Utc::now(),
        }));
    }

    async fn round_trip(
        &self,
        sent: &SentRequest,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<CapturedResponse, TransportError> {
        let exchange = self.send_and_read(sent);
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, exchange)
                .await
                .map_err(|_| {
                    TransportError::new(
                        TransportErrorKind::Timeout,
                        format!("request to {} exceeded {:?}", sent.url, self.timeout),
                    )
                })?,
            None => exchange.await,
        }
    }

    async fn send_and_read(&self, sent: &SentRequest) -> Result<CapturedResponse, TransportError> {
        let gzip = decode::wants_gzip(self.transport.compression(), &sent.method, &sent.headers);
        let request = wire_request(sent, gzip)?;

        let response = self.transport.send(request).await?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|err| TransportError::classify(&err))?
            .to_bytes();

        let mut headers = parts.headers;
        let body = if gzip && decode::is_gzip(&headers) {
            decode::decode_gzip(&mut headers, body).map_err(|err| {
                TransportError::new(TransportErrorKind::Protocol, format!("gzip: {err}"))
            })?
        } else {
            body
        };

        Ok(CapturedResponse {
            status: parts.status,
            version: parts.version,
            headers,
            body,
        })
    }
}

/// Converts a captured request into what goes on the wire: absolute URI
/// for the pool, `Host` override, transport-managed `Accept-Encoding`.
fn wire_request(
    sent: &SentRequest,
    gzip: bool,
) -> Result<Request<http_body_util::Full<bytes::Bytes>>, TransportError> {
    let mut url = sent.url.clone();
    url.set_fragment(None);

    let mut builder = Request::builder()
        .method(sent.method.clone())
        .uri(url.as_str())
        .version(Version::HTTP_11);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(sent.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(host) = sent.host.as_ref().filter(|h| !h.is_empty()) {
            let value = HeaderValue::from_str(host).map_err(|_| {
                TransportError::new(TransportErrorKind::Protocol, format!("invalid host override {host:?}"))
            })?;
            headers.insert(HOST, value);
        }
        if gzip {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }
    }

    builder
        .body(sent.body.to_http_body())
        .map_err(|err| TransportError::new(TransportErrorKind::Protocol, err.to_string()))
}
