//! Per-call cookie jar.
//!
//! Backed by `cookie_store` for RFC 6265 matching, with a public-suffix
//! guard on the `Domain` attribute.

use cookie_store::{CookieStore, RawCookie};
use http::HeaderMap;
use http::header::{COOKIE, HeaderValue, SET_COOKIE};
use url::Url;

/// One-shot jar; dropped with the call that created it.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: CookieStore,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores every acceptable `Set-Cookie` from a response to `url`.
    pub fn store_response(&mut self, url: &Url, headers: &HeaderMap) {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let cookies = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| RawCookie::parse(value.to_string()).ok())
            .filter_map(|cookie| guard_public_suffix(cookie, &host));
        self.store.store_response_cookies(cookies, url);
    }

    /// `(name, value)` pairs the jar would send to `url`.
    pub fn cookies_for(&self, url: &Url) -> Vec<(String, String)> {
        self.store
            .get_request_values(url)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    /// Appends the jar's cookies for `url` to the `Cookie` header.
    pub fn attach(&self, url: &Url, headers: &mut HeaderMap) {
        let pairs = self.cookies_for(url);
        if pairs.is_empty() {
            return;
        }

        let mut combined = headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_default();
        for (name, value) in pairs {
            if !combined.is_empty() {
                combined.push_str("; ");
            }
            combined.push_str(&name);
            combined.push('=');
            combined.push_str(&value);
        }

        match HeaderValue::from_str(&combined) {
            Ok(value) => {
                headers.insert(COOKIE, value);
            }
            Err(_) => log::warn!("dropping jar cookies for {url}: not a valid header value"),
        }
    }
}

/// Rejects cookies scoped to a public suffix, unless the suffix is the
/// request host itself, in which case the cookie becomes host-only.
fn guard_public_suffix(mut cookie: RawCookie<'static>, host: &str) -> Option<RawCookie<'static>> {
    let Some(domain) = cookie.domain().map(|d| d.trim_start_matches('.').to_ascii_lowercase()) else {
        return Some(cookie);
    };
    if !is_public_suffix(&domain) {
        return Some(cookie);
    }
    if domain == host {
        cookie.unset_domain();
        return Some(cookie);
    }
    log::debug!("rejecting cookie {} scoped to public suffix {domain}", cookie.name());
    None
}

fn is_public_suffix(domain: &str) -> bool {
    match psl::suffix(domain.as_bytes()) {
        Some(suffix) => suffix.is_known() && suffix.as_bytes() == domain.as_bytes(),
        None => false,
    }
}
