//! Header, cookie, virtual-host and credential decoration.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::header::{AUTHORIZATION, COOKIE, HOST, HeaderName, HeaderValue};
use thiserror::Error;

use super::body::BuiltRequest;
use super::options::RequestOptions;

pub const AJAX_HEADER: &str = "x-requested-with";
pub const AJAX_VALUE: &str = "XMLHttpRequest";

#[derive(Debug, Error)]
pub enum DecorateError {
    #[error("invalid header name {0:?}")]
    InvalidName(String),
    #[error("invalid value for header {0:?}")]
    InvalidValue(String),
}

/// Fixed header stamped on every request before caller headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginHeader {
    pub name: HeaderName,
    pub value: HeaderValue,
}

impl OriginHeader {
    pub fn new(name: &str, value: &str) -> Result<Self, DecorateError> {
        Ok(Self {
            name: header_name(name)?,
            value: header_value(name, value)?,
        })
    }
}

impl Default for OriginHeader {
    fn default() -> Self {
        Self {
            name: HeaderName::from_static("x-scanner"),
            value: HeaderValue::from_static("ZERO"),
        }
    }
}

fn header_name(name: &str) -> Result<HeaderName, DecorateError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| DecorateError::InvalidName(name.to_string()))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, DecorateError> {
    HeaderValue::from_str(value).map_err(|_| DecorateError::InvalidValue(name.to_string()))
}

/// Decorates `request` from `options`, basic auth last.
///
/// Caller headers replace same-named headers already present, including
/// the origin header and any body content type. A caller `Host` header sets
/// the host override; the `host` option still takes precedence over it.
pub fn decorate(
    request: &mut BuiltRequest,
    options: &RequestOptions,
    origin: Option<&OriginHeader>,
) -> Result<(), DecorateError> {
    if let Some(origin) = origin {
        request.headers.insert(origin.name.clone(), origin.value.clone());
    }

    for (name, value) in &options.headers {
        let name = header_name(name)?;
        let value = header_value(name.as_str(), value)?;
        if name == HOST {
            // `Host` travels as the request's host override, never as a header.
            if let Ok(host) = value.to_str()
                && !host.is_empty()
            {
                request.host = Some(host.to_string());
            }
            continue;
        }
        request.headers.insert(name, value);
    }

    if options.is_ajax {
        request.headers.insert(
            HeaderName::from_static(AJAX_HEADER),
            HeaderValue::from_static(AJAX_VALUE),
        );
    }

    if let Some(host) = options.host.as_ref().filter(|host| !host.is_empty()) {
        request.host = Some(host.clone());
    }

    for (name, value) in &options.cookies {
        add_cookie(request, name, value)?;
    }

    if let Some(auth) = &options.auth {
        let encoded = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
        let mut value = header_value("Authorization", &format!("Basic {encoded}"))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
    }

    Ok(())
}

/// Appends `name=value` to the request's single `Cookie` header.
fn add_cookie(request: &mut BuiltRequest, name: &str, value: &str) -> Result<(), DecorateError> {
    let pair = format!("{name}={value}");
    let combined = match request.headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}; {pair}"),
        _ => pair,
    };
    request.headers.insert(COOKIE, header_value("Cookie", &combined)?);
    Ok(())
}
