//! Transparent gzip negotiation.

use std::io::{self, Read};

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, RANGE};
use http::{HeaderMap, Method};

/// Whether the client should ask for gzip itself: never when the caller
/// picked an encoding or a byte range, nor for `HEAD`.
pub fn wants_gzip(enabled: bool, method: &Method, headers: &HeaderMap) -> bool {
    enabled
        && *method != Method::HEAD
        && !headers.contains_key(ACCEPT_ENCODING)
        && !headers.contains_key(RANGE)
}

pub fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

/// Decodes a gzip body and drops the headers describing the encoded form.
pub fn decode_gzip(headers: &mut HeaderMap, body: Bytes) -> io::Result<Bytes> {
    headers.remove(CONTENT_ENCODING);
    headers.remove(CONTENT_LENGTH);
    if body.is_empty() {
        return Ok(body);
    }

    let mut decoded = Vec::with_capacity(body.len() * 2);
    GzDecoder::new(body.as_ref()).read_to_end(&mut decoded)?;
    Ok(Bytes::from(decoded))
}
