//! Typed per-call options.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;
use url::Url;

/// Default call timeout applied when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Readable content of an upload. Dropping it closes the underlying handle.
pub type UploadStream = Box<dyn AsyncRead + Send + Unpin>;

/// One file attached to a request.
pub struct FileUpload {
    /// Form field name; `None` picks `file` / `file<N>` by position.
    pub field_name: Option<String>,
    /// Base name advertised in the part headers.
    pub file_name: String,
    pub content: Option<UploadStream>,
    pub mime: Option<String>,
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("field_name", &self.field_name)
            .field("file_name", &self.file_name)
            .field("content", &self.content.as_ref().map(|_| "<stream>"))
            .field("mime", &self.mime)
            .finish()
    }
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content: UploadStream) -> Self {
        Self {
            field_name: None,
            file_name: file_name.into(),
            content: Some(content),
            mime: None,
        }
    }

    /// Upload with no content stream; body construction rejects it.
    pub fn empty(file_name: impl Into<String>) -> Self {
        Self {
            field_name: None,
            file_name: file_name.into(),
            content: None,
            mime: None,
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let bytes: Bytes = content.into();
        Self::new(file_name, Box::new(Cursor::new(bytes)))
    }

    /// Opens `path` for upload, advertising only its base name.
    pub async fn open(field_name: Option<String>, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            field_name,
            file_name,
            content: Some(Box::new(file)),
            mime: None,
        })
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything one call can be configured with.
///
/// Body sources are checked in a fixed order (`raw_data`, `json`, `xml`,
/// `files`, `data`) and only the first one present is used.
#[derive(Debug)]
pub struct RequestOptions {
    pub data: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub files: Vec<FileUpload>,
    pub json: Option<String>,
    pub xml: Option<String>,
    pub raw_data: Option<String>,
    pub raw_query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<(String, String)>,
    pub insecure_skip_verify: bool,
    pub disable_compression: bool,
    pub disable_redirect: bool,
    pub is_ajax: bool,
    pub host: Option<String>,
    pub auth: Option<BasicAuth>,
    pub proxies: HashMap<String, Url>,
    /// Per-operation idle deadline and total call budget; zero disables both.
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            data: BTreeMap::new(),
            params: BTreeMap::new(),
            files: Vec::new(),
            json: None,
            xml: None,
            raw_data: None,
            raw_query: None,
            headers: BTreeMap::new(),
            cookies: Vec::new(),
            insecure_skip_verify: false,
            disable_compression: false,
            disable_redirect: false,
            is_ajax: false,
            host: None,
            auth: None,
            proxies: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: FileUpload) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_json(mut self, json: impl Into<String>) -> Self {
        self.json = Some(json.into());
        self
    }

    pub fn with_xml(mut self, xml: impl Into<String>) -> Self {
        self.xml = Some(xml.into());
        self
    }

    pub fn with_raw_data(mut self, raw: impl Into<String>) -> Self {
        self.raw_data = Some(raw.into());
        self
    }

    pub fn with_raw_query(mut self, query: impl Into<String>) -> Self {
        self.raw_query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn with_proxy(mut self, scheme: impl Into<String>, proxy: Url) -> Self {
        self.proxies.insert(scheme.into(), proxy);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn insecure(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }

    pub fn without_compression(mut self) -> Self {
        self.disable_compression = true;
        self
    }

    pub fn without_redirects(mut self) -> Self {
        self.disable_redirect = true;
        self
    }

    pub fn ajax(mut self) -> Self {
        self.is_ajax = true;
        self
    }
}
