//! Re-serialization of parsed messages back into HTTP/1.1 text.

use std::collections::BTreeMap;

use cookie_store::RawCookie;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, Version};

use crate::client::exchange::SentRequest;

/// `Title-Case` form of a header name: `x-requested-with` becomes
/// `X-Requested-With`.
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch.to_ascii_lowercase());
        }
        upper = ch == '-';
    }
    out
}

pub fn proto(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Header values grouped by canonical name, in name order.
fn grouped(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        groups
            .entry(canonical_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    groups
}

/// Header mapping; repeated values are joined with `", "`.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    grouped(headers)
        .into_iter()
        .map(|(name, values)| (name, values.join(", ")))
        .collect()
}

/// One `Name: value` line per value, CRLF-separated, no trailing CRLF.
pub fn raw_headers(headers: &HeaderMap) -> String {
    let mut lines = Vec::new();
    for (name, values) in grouped(headers) {
        for value in values {
            lines.push(format!("{name}: {value}"));
        }
    }
    lines.join("\r\n")
}

/// `(name, value)` pairs from every `Set-Cookie` header, in order.
pub fn response_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| RawCookie::parse(value).ok())
        .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
        .collect()
}

/// `(name, value)` pairs from the `Cookie` header(s) of a request.
pub fn request_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// Last value wins on a name collision.
pub fn cookie_map(cookies: &[(String, String)]) -> BTreeMap<String, String> {
    cookies.iter().cloned().collect()
}

/// `name=value` pairs joined by `;`, no trailing `;`.
pub fn raw_cookies(cookies: &[(String, String)]) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Best-effort wire text of a captured request: request line, `Host`, the
/// first value of every header, a blank line, then the body snapshot.
pub fn raw_request(request: &SentRequest) -> String {
    let mut target = request.url.path().to_string();
    if let Some(query) = request.url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut raw = format!(
        "{} {} {}\r\nHost: {}\r\n",
        request.method,
        target,
        proto(request.version),
        request.effective_host()
    );
    for (name, values) in grouped(&request.headers) {
        if name == "Host" {
            continue;
        }
        if let Some(first) = values.first() {
            raw.push_str(&name);
            raw.push_str(": ");
            raw.push_str(first);
            raw.push_str("\r\n");
        }
    }
    raw.push_str("\r\n");
    raw.push_str(&body_text(request));
    raw
}

/// Request body as text; empty when no snapshot is available.
pub fn body_text(request: &SentRequest) -> String {
    request
        .body
        .snapshot()
        .map(|body| String::from_utf8_lossy(&body).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::body::BodySource;
    use bytes::Bytes;
    use http::{HeaderValue, Method};
    use url::Url;

    fn request() -> SentRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-a", HeaderValue::from_static("1"));
        headers.insert("x-b", HeaderValue::from_static("2"));
        headers.append("x-b", HeaderValue::from_static("3"));
        SentRequest {
            method: Method::POST,
            url: Url::parse("http://example.com:8080/path?q=1").unwrap(),
            headers,
            host: None,
            body: BodySource::Buffered(Bytes::from_static(b"payload")),
            version: Version::HTTP_11,
        }
    }

    #[test]
    fn canonicalizes_names() {
        assert_eq!(canonical_name("x-requested-with"), "X-Requested-With");
        assert_eq!(canonical_name("CONTENT-TYPE"), "Content-Type");
        assert_eq!(canonical_name("www-authenticate"), "Www-Authenticate");
    }

    #[test]
    fn raw_request_layout() {
        let raw = raw_request(&request());
        assert!(raw.starts_with("POST /path?q=1 HTTP/1.1\r\n"));
        assert!(raw.contains("Host: example.com:8080\r\n"));
        assert!(raw.contains("X-A: 1\r\n"));
        assert!(raw.contains("X-B: 2\r\n"));
        assert!(!raw.contains("X-B: 3"));
        assert!(raw.ends_with("\r\n\r\npayload"));
    }

    #[test]
    fn raw_request_writes_host_once() {
        let mut req = request();
        req.headers.insert(http::header::HOST, HeaderValue::from_static("stale.test"));
        req.host = Some("vhost.test".to_string());
        let raw = raw_request(&req);
        assert_eq!(raw.matches("Host: ").count(), 1);
        assert!(raw.contains("Host: vhost.test\r\n"));
    }

    #[test]
    fn header_text_forms() {
        let req = request();
        let map = header_map(&req.headers);
        assert_eq!(map["X-B"], "2, 3");
        assert_eq!(raw_headers(&req.headers), "X-A: 1\r\nX-B: 2\r\nX-B: 3");
        assert_eq!(raw_headers(&HeaderMap::new()), "");
    }

    #[test]
    fn cookie_forms() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; HttpOnly"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=3"));
        let cookies = response_cookies(&headers);
        assert_eq!(raw_cookies(&cookies), "a=1;b=2;a=3");
        assert_eq!(cookie_map(&cookies)["a"], "3");

        let mut sent = HeaderMap::new();
        sent.insert(COOKIE, HeaderValue::from_static("x=1; y=two"));
        assert_eq!(
            request_cookies(&sent),
            [("x".to_string(), "1".to_string()), ("y".to_string(), "two".to_string())]
        );
    }

    #[test]
    fn missing_body_is_empty_text() {
        let mut req = request();
        req.body = BodySource::Empty;
        assert!(raw_request(&req).ends_with("\r\n\r\n"));
        assert_eq!(body_text(&req), "");
    }
}
