//! Query-string construction.

use std::collections::BTreeMap;

use url::{Url, form_urlencoded};

/// Applies `raw_query` or `params` to `url`.
///
/// A non-empty `raw_query` replaces the query verbatim and `params` is
/// ignored. Otherwise the existing pairs are merged with `params` (a param
/// replaces every existing value of its key), re-encoded in key order, and
/// spaces are written as `%20`.
pub fn build_url(url: &mut Url, raw_query: Option<&str>, params: &BTreeMap<String, String>) {
    if let Some(raw) = raw_query.filter(|raw| !raw.is_empty()) {
        url.set_query(Some(raw));
        return;
    }

    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        merged
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    for (key, value) in params {
        merged.insert(key.clone(), vec![value.clone()]);
    }

    if merged.is_empty() {
        url.set_query(None);
        return;
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in &merged {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    let encoded = serializer.finish().replace('+', "%20");
    url.set_query(Some(&encoded));
}

/// `application/x-www-form-urlencoded` encoding of `data`, keys sorted.
pub fn encode_form(data: &BTreeMap<String, String>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(data.iter())
        .finish()
}
