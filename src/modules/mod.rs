//! Cross-cutting services module
//!
//! Event hooks, proxy selection and TLS policy shared by every call.

pub mod events;
pub mod proxy;
pub mod tls;

// Re-export commonly used types
pub use events::{
    EngineEvent, ErrorEvent, EventDispatcher, EventHandler, LoggingHandler, PostResponseEvent,
    PreRequestEvent, RedirectEvent,
};
pub use proxy::{ProxyPolicy, ProxyTarget};
pub use tls::{TLSConfig, TLSPolicy};
