//! # httpexec-rs
//!
//! A configurable HTTP request execution engine.
//!
//! Given a method, a URL and a bag of per-call options, the engine builds
//! the request body and headers, assembles a fresh transport for the call
//! (pluggable DNS, per-read/write deadlines, proxies, TLS policy), follows
//! redirects itself, and returns a normalized record of the final response
//! together with every hop that led to it.
//!
//! ## Features
//!
//! - Raw, JSON, XML, multipart, single-file and urlencoded bodies
//! - Idle deadlines on every socket read and write, not just connect
//! - Pluggable and caching name resolution
//! - Introspectable redirect history with raw wire-format reconstruction
//! - Per-call cookie jar with public-suffix protection
//!
//! ## Example
//!
//! ```no_run
//! use httpexec_rs::{HttpEngine, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = HttpEngine::new();
//!     let options = RequestOptions::new()
//!         .with_param("q", "rust")
//!         .with_header("Accept", "text/html");
//!     let response = engine.execute("GET", "https://example.com/search", Some(options)).await?;
//!     println!("{} after {} redirects", response.status_code, response.history.len());
//!     println!("{}", response.request.raw);
//!     Ok(())
//! }
//! ```

mod engine;

pub mod client;
pub mod config;
pub mod modules;
pub mod request;
pub mod response;
pub mod transport;

pub use crate::engine::{
    EngineConfig,
    EngineError,
    EngineResult,
    HttpEngine,
    HttpEngineBuilder,
    PendingResponse,
    TransportFailure,
};

pub use crate::config::{OptionsTable, Scalar};

pub use crate::request::{
    BasicAuth,
    BodyError,
    BodyKind,
    DecorateError,
    FileUpload,
    OriginHeader,
    RequestOptions,
};

pub use crate::response::{NormalizedRequest, NormalizedResponse};

pub use crate::transport::{
    CachingResolver,
    ResolveError,
    Resolver,
    StaticResolver,
    SystemResolver,
    TransportConfig,
    TransportErrorKind,
};

pub use crate::modules::{
    EngineEvent,
    ErrorEvent,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    PostResponseEvent,
    PreRequestEvent,
    RedirectEvent,
    TLSConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
