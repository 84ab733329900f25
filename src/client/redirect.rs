//! Redirect policy and next-hop construction.

use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, REFERER, WWW_AUTHENTICATE,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::request::body::BodySource;

/// Headers only forwarded to the same host or one of its subdomains.
const SENSITIVE: [HeaderName; 3] = [AUTHORIZATION, WWW_AUTHENTICATE, COOKIE];

pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub follow: bool,
    pub max_redirects: usize,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::follow(DEFAULT_MAX_REDIRECTS)
    }
}

impl RedirectPolicy {
    pub fn follow(max_redirects: usize) -> Self {
        Self {
            follow: true,
            max_redirects,
        }
    }

    /// Surfaces the first redirect response as the result.
    pub fn none() -> Self {
        Self {
            follow: false,
            max_redirects: 0,
        }
    }
}

/// Request state carried from hop to hop.
#[derive(Debug, Clone)]
pub struct HopRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub host: Option<String>,
    pub body: BodySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedirectError {
    #[error("failed to parse Location header {location:?}: {reason}")]
    BadLocation { location: String, reason: String },
}

/// Method for the next hop and whether the body is replayed.
pub fn redirect_method(status: StatusCode, method: &Method) -> Option<(Method, bool)> {
    match status.as_u16() {
        301 | 302 => {
            let next = if *method == Method::POST { Method::GET } else { method.clone() };
            Some((next, false))
        }
        303 => {
            let next = if *method == Method::GET || *method == Method::HEAD {
                method.clone()
            } else {
                Method::GET
            };
            Some((next, false))
        }
        307 | 308 => Some((method.clone(), true)),
        _ => None,
    }
}

/// Builds the request that follows `current`'s redirect response, or `None`
/// when the response is final (not a redirect, or a redirect without
/// `Location`).
///
/// `caller_referer` keeps a `Referer` the caller set explicitly.
pub fn next_hop(
    current: &HopRequest,
    status: StatusCode,
    response_headers: &HeaderMap,
    caller_referer: bool,
) -> Result<Option<HopRequest>, RedirectError> {
    let Some((method, replay_body)) = redirect_method(status, &current.method) else {
        return Ok(None);
    };
    let Some(location) = response_headers
        .get(LOCATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .filter(|loc| !loc.is_empty())
    else {
        return Ok(None);
    };

    let absolute = Url::parse(&location).is_ok();
    let url = current.url.join(&location).map_err(|err| RedirectError::BadLocation {
        location: location.clone(),
        reason: err.to_string(),
    })?;

    let mut headers = current.headers.clone();
    let body = if replay_body {
        current.body.clone()
    } else {
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
        BodySource::Empty
    };

    if !same_or_subdomain(url.host_str(), current.url.host_str()) {
        for name in &SENSITIVE {
            headers.remove(name);
        }
    }

    if !caller_referer {
        match referer_for(&current.url, &url) {
            Some(value) => {
                headers.insert(REFERER, value);
            }
            None => {
                headers.remove(REFERER);
            }
        }
    }

    let host = if absolute { None } else { current.host.clone() };

    Ok(Some(HopRequest {
        method,
        url,
        headers,
        host,
        body,
    }))
}

/// `Referer` for a hop from `from` to `to`: never leaks userinfo and never
/// downgrades https to http.
fn referer_for(from: &Url, to: &Url) -> Option<HeaderValue> {
    if from.scheme() == "https" && to.scheme() == "http" {
        return None;
    }
    let mut referer = from.clone();
    let _ = referer.set_username("");
    let _ = referer.set_password(None);
    referer.set_fragment(None);
    HeaderValue::from_str(referer.as_str()).ok()
}

fn same_or_subdomain(child: Option<&str>, parent: Option<&str>) -> bool {
    let (Some(child), Some(parent)) = (child, parent) else {
        return false;
    };
    let child = child.to_ascii_lowercase();
    let parent = parent.to_ascii_lowercase();
    if child == parent {
        return true;
    }
    child
        .strip_suffix(&parent)
        .is_some_and(|prefix| prefix.ends_with('.'))
}
