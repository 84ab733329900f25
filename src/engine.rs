//! High level execution engine.
//!
//! Wires together the body builder, decorator, per-call transport, redirect
//! following client, and normalizer behind a single `execute` call, plus
//! task-based and blocking wrappers around it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Method;
use thiserror::Error;
use tokio::sync::oneshot;
use url::Url;

use crate::client::redirect::DEFAULT_MAX_REDIRECTS;
use crate::client::{Client, ClientFailure, RedirectPolicy};
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler};
use crate::request::body::{BodyError, BodyMode, BuiltRequest};
use crate::request::decorate::{OriginHeader, decorate};
use crate::request::options::RequestOptions;
use crate::request::query::build_url;
use crate::response::{self, NormalizedResponse};
use crate::transport::{Resolver, Transport, TransportConfig, TransportError, TransportErrorKind};

/// Result alias used across the engine surface.
pub type EngineResult<T> = Result<T, EngineError>;

/// High-level error surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("invalid {option} option: {reason}")]
	OptionParse { option: String, reason: String },
	#[error("invalid url {url:?}: {reason}")]
	InvalidUrl { url: String, reason: String },
	#[error("invalid method {0:?}")]
	InvalidMethod(String),
	#[error("body encoding failed: {0}")]
	BodyEncoding(#[from] BodyError),
	#[error("{0}")]
	Transport(Box<TransportFailure>),
	#[error("execution aborted: {0}")]
	Aborted(String),
}

impl EngineError {
	pub(crate) fn option(option: &str, reason: impl fmt::Display) -> Self {
		EngineError::OptionParse {
			option: option.to_string(),
			reason: reason.to_string(),
		}
	}

	/// Classification of a transport failure.
	pub fn transport_kind(&self) -> Option<TransportErrorKind> {
		match self {
			EngineError::Transport(failure) => Some(failure.kind),
			_ => None,
		}
	}

	/// Hops completed before a transport failure, oldest first.
	pub fn history(&self) -> &[NormalizedResponse] {
		match self {
			EngineError::Transport(failure) => &failure.history,
			_ => &[],
		}
	}
}

/// A failed network exchange and every hop that completed before it.
#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct TransportFailure {
	pub kind: TransportErrorKind,
	pub message: String,
	pub history: Vec<NormalizedResponse>,
}

impl From<TransportError> for EngineError {
	fn from(err: TransportError) -> Self {
		EngineError::Transport(Box::new(TransportFailure {
			kind: err.kind,
			message: err.message,
			history: Vec::new(),
		}))
	}
}

impl From<ClientFailure> for EngineError {
	fn from(failure: ClientFailure) -> Self {
		EngineError::Transport(Box::new(TransportFailure {
			kind: failure.error.kind,
			message: failure.error.message,
			history: response::history(failure.completed.as_deref()),
		}))
	}
}

/// Engine-wide settings, fixed once the engine is built.
#[derive(Clone)]
pub struct EngineConfig {
	/// Shared across every call; `None` uses the system resolver.
	pub resolver: Option<Arc<dyn Resolver>>,
	pub transport: TransportConfig,
	/// Stamped on every request before caller headers.
	pub origin_header: Option<OriginHeader>,
	pub max_redirects: usize,
	pub enable_logging: bool,
	pub handlers: Vec<Arc<dyn EventHandler>>,
}

impl fmt::Debug for EngineConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EngineConfig")
			.field("resolver", &self.resolver.is_some())
			.field("transport", &self.transport)
			.field("origin_header", &self.origin_header)
			.field("max_redirects", &self.max_redirects)
			.field("enable_logging", &self.enable_logging)
			.field("handlers", &self.handlers.len())
			.finish()
	}
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			resolver: None,
			transport: TransportConfig::default(),
			origin_header: Some(OriginHeader::default()),
			max_redirects: DEFAULT_MAX_REDIRECTS,
			enable_logging: true,
			handlers: Vec::new(),
		}
	}
}

/// Fluent builder for [`HttpEngine`].
#[derive(Debug, Default)]
pub struct HttpEngineBuilder {
	config: EngineConfig,
}

impl HttpEngineBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
		self.config.resolver = Some(resolver);
		self
	}

	pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
		self.config.transport = config;
		self
	}

	pub fn with_origin_header(mut self, header: OriginHeader) -> Self {
		self.config.origin_header = Some(header);
		self
	}

	pub fn without_origin_header(mut self) -> Self {
		self.config.origin_header = None;
		self
	}

	pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
		self.config.max_redirects = max_redirects;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.config.handlers.push(handler);
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.config.enable_logging = false;
		self
	}

	pub fn build(self) -> HttpEngine {
		HttpEngine::with_config(self.config)
	}
}

/// Executes one fully parameterized HTTP call per `execute`.
///
/// Cheap to clone; clones share the resolver and event handlers. Every call
/// gets its own transport, cookie jar and redirect state.
#[derive(Debug, Clone)]
pub struct HttpEngine {
	config: Arc<EngineConfig>,
	events: Arc<EventDispatcher>,
}

impl Default for HttpEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl HttpEngine {
	/// Construct an engine with default configuration.
	pub fn new() -> Self {
		Self::with_config(EngineConfig::default())
	}

	pub fn builder() -> HttpEngineBuilder {
		HttpEngineBuilder::new()
	}

	fn with_config(config: EngineConfig) -> Self {
		let mut events = EventDispatcher::new();
		if config.enable_logging {
			events.register_handler(Arc::new(LoggingHandler));
		}
		for handler in &config.handlers {
			events.register_handler(handler.clone());
		}

		Self {
			config: Arc::new(config),
			events: Arc::new(events),
		}
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Perform an HTTP GET request.
	pub async fn get(&self, url: &str, options: Option<RequestOptions>) -> EngineResult<NormalizedResponse> {
		self.execute("GET", url, options).await
	}

	pub async fn delete(&self, url: &str, options: Option<RequestOptions>) -> EngineResult<NormalizedResponse> {
		self.execute("DELETE", url, options).await
	}

	/// HEAD responses carry no body; `body_size` is zero.
	pub async fn head(&self, url: &str, options: Option<RequestOptions>) -> EngineResult<NormalizedResponse> {
		self.execute("HEAD", url, options).await
	}

	pub async fn patch(&self, url: &str, options: Option<RequestOptions>) -> EngineResult<NormalizedResponse> {
		self.execute("PATCH", url, options).await
	}

	pub async fn post(&self, url: &str, options: Option<RequestOptions>) -> EngineResult<NormalizedResponse> {
		self.execute("POST", url, options).await
	}

	pub async fn put(&self, url: &str, options: Option<RequestOptions>) -> EngineResult<NormalizedResponse> {
		self.execute("PUT", url, options).await
	}

	pub async fn options(&self, url: &str, options: Option<RequestOptions>) -> EngineResult<NormalizedResponse> {
		self.execute("OPTIONS", url, options).await
	}

	/// Perform one logical call, following redirects unless disabled.
	///
	/// Option and body errors are raised before anything is sent. Upload
	/// streams in `options` are closed before this returns, on every path.
	pub async fn execute(
		&self,
		method: &str,
		url: &str,
		options: Option<RequestOptions>,
	) -> EngineResult<NormalizedResponse> {
		let mut options = options.unwrap_or_default();
		let method = parse_method(method)?;
		let mut url = parse_url(url)?;
		build_url(&mut url, options.raw_query.as_deref(), &options.params);

		let mode = BodyMode::select(&method, &mut options);
		let kind = mode.kind();
		let mut request = BuiltRequest::build(method, url, mode).await?;
		decorate(&mut request, &options, self.config.origin_header.as_ref())
			.map_err(|err| EngineError::option("headers", err))?;
		log::trace!("built {} {} with {:?} body", request.method, request.url, kind);

		let transport = Transport::build(&self.config.transport, &options, self.config.resolver.clone())?;
		let policy = if options.disable_redirect {
			RedirectPolicy::none()
		} else {
			RedirectPolicy::follow(self.config.max_redirects)
		};

		let mut client = Client::new(transport, policy, options.timeout, self.events.clone());
		let outcome = client.execute(request).await;
		client.dispose();

		let exchange = outcome?;
		Ok(NormalizedResponse::from_exchange(&exchange))
	}

	/// Runs [`HttpEngine::execute`] on a tokio task.
	///
	/// The returned future resolves to exactly one result. Must be called
	/// from within a tokio runtime.
	pub fn spawn_execute(
		&self,
		method: impl Into<String>,
		url: impl Into<String>,
		options: Option<RequestOptions>,
	) -> PendingResponse {
		let engine = self.clone();
		let method = method.into();
		let url = url.into();
		let (tx, rx) = oneshot::channel();

		tokio::spawn(async move {
			let result = engine.execute(&method, &url, options).await;
			if tx.send(result).is_err() {
				log::debug!("dropping result for {method} {url}: receiver gone");
			}
		});

		PendingResponse { rx }
	}

	/// Runs [`HttpEngine::execute`] to completion on a private
	/// current-thread runtime.
	///
	/// Panics if called from inside an async context, like any nested
	/// `block_on`.
	pub fn execute_blocking(
		&self,
		method: &str,
		url: &str,
		options: Option<RequestOptions>,
	) -> EngineResult<NormalizedResponse> {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.map_err(|err| EngineError::Aborted(format!("runtime start failed: {err}")))?;
		runtime.block_on(self.execute(method, url, options))
	}
}

/// Result of a call started with [`HttpEngine::spawn_execute`].
#[derive(Debug)]
pub struct PendingResponse {
	rx: oneshot::Receiver<EngineResult<NormalizedResponse>>,
}

impl Future for PendingResponse {
	type Output = EngineResult<NormalizedResponse>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx).poll(cx).map(|received| {
			received.unwrap_or_else(|_| Err(EngineError::Aborted("execution task ended without a result".into())))
		})
	}
}

fn parse_method(method: &str) -> EngineResult<Method> {
	let method = method.trim();
	if method.is_empty() {
		return Ok(Method::GET);
	}
	Method::from_bytes(method.to_ascii_uppercase().as_bytes())
		.map_err(|_| EngineError::InvalidMethod(method.to_string()))
}

fn parse_url(raw: &str) -> EngineResult<Url> {
	let url = Url::parse(raw).map_err(|err| EngineError::InvalidUrl {
		url: raw.to_string(),
		reason: err.to_string(),
	})?;
	match url.scheme() {
		"http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
		"http" | "https" => Err(EngineError::InvalidUrl {
			url: raw.to_string(),
			reason: "missing host".into(),
		}),
		scheme => Err(EngineError::InvalidUrl {
			url: raw.to_string(),
			reason: format!("unsupported scheme {scheme:?}"),
		}),
	}
}
