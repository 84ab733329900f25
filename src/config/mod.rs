//! Untyped option tables.
//!
//! [`OptionsTable`] is the loose, key/value shaped form in which embedding
//! layers hand over per-call options (deserialized from JSON or any other
//! serde format). [`OptionsTable::into_options`] validates it once and
//! produces the typed [`RequestOptions`] the engine runs on:
//! - proxy URLs are parsed
//! - upload paths are opened
//! - `verify`/`compress`/`redirect` are inverted into their `disable_*` forms
//! - `timeout` seconds become a [`Duration`]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::engine::{EngineError, EngineResult};
use crate::request::options::{BasicAuth, DEFAULT_TIMEOUT, FileUpload, RequestOptions};

/// Scalar accepted wherever a string is expected; numbers and booleans are
/// stringified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(text) => f.write_str(text),
            Scalar::Number(number) => write!(f, "{number}"),
            Scalar::Bool(flag) => write!(f, "{flag}"),
        }
    }
}

/// Per-call options keyed exactly as callers name them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsTable {
    pub data: BTreeMap<String, Scalar>,
    pub params: BTreeMap<String, Scalar>,
    /// Field name to path on disk.
    pub files: BTreeMap<String, PathBuf>,
    pub json: Option<String>,
    pub xml: Option<String>,
    pub raw_data: Option<String>,
    pub raw_query: Option<String>,
    pub headers: BTreeMap<String, Scalar>,
    pub cookies: BTreeMap<String, Scalar>,
    /// URL scheme to proxy URL.
    pub proxies: BTreeMap<String, String>,
    /// Seconds; fractions are truncated.
    pub timeout: Option<f64>,
    pub verify: Option<bool>,
    pub compress: Option<bool>,
    pub redirect: Option<bool>,
    pub host: Option<String>,
    pub auth: Option<(String, String)>,
    pub ajax: Option<bool>,
}

impl OptionsTable {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        serde_json::from_str(text).map_err(|err| EngineError::option("options", err))
    }

    pub fn from_value(value: serde_json::Value) -> EngineResult<Self> {
        serde_json::from_value(value).map_err(|err| EngineError::option("options", err))
    }

    /// Validates the table and opens every upload.
    ///
    /// Fails before any network activity; files opened before a failure are
    /// closed when the partially built options are dropped.
    pub async fn into_options(self) -> EngineResult<RequestOptions> {
        let mut options = RequestOptions {
            data: stringify(self.data),
            params: stringify(self.params),
            json: self.json,
            xml: self.xml,
            raw_data: self.raw_data,
            raw_query: self.raw_query,
            headers: stringify(self.headers),
            cookies: stringify(self.cookies).into_iter().collect(),
            proxies: parse_proxies(self.proxies)?,
            timeout: parse_timeout(self.timeout)?,
            insecure_skip_verify: !self.verify.unwrap_or(true),
            disable_compression: !self.compress.unwrap_or(true),
            disable_redirect: !self.redirect.unwrap_or(true),
            is_ajax: self.ajax.unwrap_or(false),
            host: self.host,
            auth: self.auth.map(|(username, password)| BasicAuth { username, password }),
            ..RequestOptions::default()
        };

        for (field, path) in self.files {
            let path = normalize_separators(path);
            let upload = FileUpload::open(Some(field), &path).await.map_err(|err| {
                EngineError::option("files", format!("{}: {err}", path.display()))
            })?;
            options.files.push(upload);
        }

        Ok(options)
    }
}

fn stringify(values: BTreeMap<String, Scalar>) -> BTreeMap<String, String> {
    values.into_iter().map(|(k, v)| (k, v.to_string())).collect()
}

fn parse_proxies(proxies: BTreeMap<String, String>) -> EngineResult<HashMap<String, Url>> {
    proxies
        .into_iter()
        .map(|(scheme, raw)| {
            Url::parse(&raw)
                .map(|url| (scheme.to_ascii_lowercase(), url))
                .map_err(|err| EngineError::option("proxies", format!("{raw:?}: {err}")))
        })
        .collect()
}

fn parse_timeout(seconds: Option<f64>) -> EngineResult<Duration> {
    match seconds {
        None => Ok(DEFAULT_TIMEOUT),
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Duration::from_secs(secs.trunc() as u64)),
        Some(secs) => Err(EngineError::option("timeout", format!("{secs} is not a valid number of seconds"))),
    }
}

/// Windows-style separators are treated as path separators on every
/// platform so the advertised base name never carries a directory.
fn normalize_separators(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(text) if text.contains('\\') && !cfg!(windows) => PathBuf::from(text.replace('\\', "/")),
        _ => path,
    }
}
