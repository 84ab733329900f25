//! Pluggable host name resolution.
//!
//! The dialer asks a [`Resolver`] for one address per connection attempt. A
//! resolver is shared between concurrent calls, so every implementation here
//! is `Send + Sync` and guards its state internally.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Errors raised while resolving a host name.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid host name: {0:?}")]
    InvalidHost(String),
    #[error("no addresses found for {0}")]
    NoAddresses(String),
    #[error("lookup for {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Maps a host name to its addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Returns every known address for `host`. Never returns an empty list on
    /// success.
    async fn resolve(&self, host: &str) -> ResolveResult<Vec<IpAddr>>;

    /// Picks a single address for `host`, uniformly at random among the
    /// records returned by [`Resolver::resolve`].
    async fn resolve_one(&self, host: &str) -> ResolveResult<IpAddr> {
        let addrs = self.resolve(host).await?;
        addrs
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| ResolveError::NoAddresses(host.to_string()))
    }
}

#[async_trait]
impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    async fn resolve(&self, host: &str) -> ResolveResult<Vec<IpAddr>> {
        (**self).resolve(host).await
    }
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl SystemResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> ResolveResult<Vec<IpAddr>> {
        if host.is_empty() {
            return Err(ResolveError::InvalidHost(host.to_string()));
        }

        let lookup = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                source,
            })?;

        let mut addrs: Vec<IpAddr> = Vec::new();
        for addr in lookup {
            let ip = addr.ip();
            if !addrs.contains(&ip) {
                addrs.push(ip);
            }
        }

        if addrs.is_empty() {
            return Err(ResolveError::NoAddresses(host.to_string()));
        }
        Ok(addrs)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    addrs: Vec<IpAddr>,
    /// `None` when the TTL is too large to represent; the entry never expires.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// Caches another resolver's answers for a fixed TTL.
///
/// Entries live only as long as this object; nothing is persisted. Failed
/// lookups are not cached.
#[derive(Debug)]
pub struct CachingResolver<R> {
    inner: R,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<R: Resolver> CachingResolver<R> {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl(inner: R) -> Self {
        Self::new(inner, Self::DEFAULT_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of cached hosts, expired entries included until next lookup.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the cache. A panic in another holder leaves only whole entries
    /// behind, so a poisoned lock is taken over rather than bypassed.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|poisoned| {
            log::warn!("resolver cache lock was poisoned; recovering");
            self.cache.clear_poison();
            poisoned.into_inner()
        })
    }

    fn cached(&self, key: &str) -> Option<Vec<IpAddr>> {
        let mut cache = self.entries();
        match cache.get(key) {
            Some(entry) if entry.is_fresh() => Some(entry.addrs.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl<R: Resolver> Resolver for CachingResolver<R> {
    async fn resolve(&self, host: &str) -> ResolveResult<Vec<IpAddr>> {
        let key = host.to_ascii_lowercase();
        if let Some(addrs) = self.cached(&key) {
            log::trace!("resolver cache hit for {key}");
            return Ok(addrs);
        }

        let addrs = self.inner.resolve(host).await?;
        self.entries().insert(
            key,
            CacheEntry {
                addrs: addrs.clone(),
                expires_at: Instant::now().checked_add(self.ttl),
            },
        );
        Ok(addrs)
    }
}

/// Fixed host table. Unknown hosts fail with [`ResolveError::NoAddresses`].
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.insert(host, addrs);
        self
    }

    pub fn insert(&mut self, host: impl Into<String>, addrs: impl IntoIterator<Item = IpAddr>) {
        self.hosts
            .entry(host.into().to_ascii_lowercase())
            .or_default()
            .extend(addrs);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> ResolveResult<Vec<IpAddr>> {
        match self.hosts.get(&host.to_ascii_lowercase()) {
            Some(addrs) if !addrs.is_empty() => Ok(addrs.clone()),
            _ => Err(ResolveError::NoAddresses(host.to_string())),
        }
    }
}
