//! Request body construction.
//!
//! Exactly one body mode is chosen per call, in the order raw data, JSON,
//! XML, files, form data, empty. The body is always fully buffered so the
//! bytes sent can be re-read for wire-format reconstruction.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use http_body_util::Full;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use url::Url;

use super::multipart::{MultipartWriter, guess_mime};
use super::options::{FileUpload, RequestOptions};
use super::query::encode_form;

/// Errors raised while encoding a request body. All of them happen before
/// anything is sent.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("file {file:?} has no content stream")]
    MissingContent { file: String },
    #[error("reading upload {file:?} failed: {source}")]
    Read {
        file: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid content type {0:?}")]
    InvalidContentType(String),
}

pub type BodyResult<T> = Result<T, BodyError>;

/// Label of the body mode a request was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Raw,
    Json,
    Xml,
    Multipart,
    Upload,
    Form,
    Empty,
}

/// The single body mode selected for a call, holding its inputs.
pub enum BodyMode {
    Raw(String),
    Json(String),
    Xml(String),
    Multipart {
        files: Vec<FileUpload>,
        fields: BTreeMap<String, String>,
    },
    /// Non-POST file upload: the first file is the whole body.
    Upload(FileUpload),
    Form(BTreeMap<String, String>),
    Empty,
}

impl fmt::Debug for BodyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyMode::Multipart { files, fields } => f
                .debug_struct("Multipart")
                .field("files", files)
                .field("fields", fields)
                .finish(),
            BodyMode::Upload(file) => f.debug_tuple("Upload").field(file).finish(),
            other => f.debug_tuple("BodyMode").field(&other.kind()).finish(),
        }
    }
}

fn present(value: &mut Option<String>) -> Option<String> {
    value.take().filter(|v| !v.is_empty())
}

impl BodyMode {
    /// Picks the body mode for `method` and moves its inputs out of
    /// `options`. Uploads are always taken out, so any that the chosen mode
    /// does not consume are dropped (closed) here.
    pub fn select(method: &Method, options: &mut RequestOptions) -> Self {
        let mut files = std::mem::take(&mut options.files);

        if let Some(raw) = present(&mut options.raw_data) {
            return BodyMode::Raw(raw);
        }
        if let Some(json) = present(&mut options.json) {
            return BodyMode::Json(json);
        }
        if let Some(xml) = present(&mut options.xml) {
            return BodyMode::Xml(xml);
        }
        if !files.is_empty() {
            if *method == Method::POST {
                return BodyMode::Multipart {
                    files,
                    fields: std::mem::take(&mut options.data),
                };
            }
            return BodyMode::Upload(files.swap_remove(0));
        }
        if !options.data.is_empty() {
            return BodyMode::Form(std::mem::take(&mut options.data));
        }
        BodyMode::Empty
    }

    pub fn kind(&self) -> BodyKind {
        match self {
            BodyMode::Raw(_) => BodyKind::Raw,
            BodyMode::Json(_) => BodyKind::Json,
            BodyMode::Xml(_) => BodyKind::Xml,
            BodyMode::Multipart { .. } => BodyKind::Multipart,
            BodyMode::Upload(_) => BodyKind::Upload,
            BodyMode::Form(_) => BodyKind::Form,
            BodyMode::Empty => BodyKind::Empty,
        }
    }

    /// Encodes the body, consuming and closing every upload stream.
    pub async fn encode(self) -> BodyResult<EncodedBody> {
        match self {
            BodyMode::Raw(raw) => Ok(EncodedBody::new(BodyKind::Raw, Bytes::from(raw), None)),
            BodyMode::Json(json) => Ok(EncodedBody::new(
                BodyKind::Json,
                Bytes::from(json),
                Some("application/json".to_string()),
            )),
            BodyMode::Xml(xml) => Ok(EncodedBody::new(
                BodyKind::Xml,
                Bytes::from(xml),
                Some("application/xml".to_string()),
            )),
            BodyMode::Multipart { files, fields } => encode_multipart(files, fields).await,
            BodyMode::Upload(file) => {
                let content_type = file.mime.clone().unwrap_or_else(|| guess_mime(&file.file_name));
                let bytes = read_upload(file).await?;
                Ok(EncodedBody::new(BodyKind::Upload, bytes, Some(content_type)))
            }
            BodyMode::Form(data) => Ok(EncodedBody::new(
                BodyKind::Form,
                Bytes::from(encode_form(&data)),
                Some("application/x-www-form-urlencoded".to_string()),
            )),
            BodyMode::Empty => Ok(EncodedBody {
                kind: BodyKind::Empty,
                source: BodySource::Empty,
                content_type: None,
            }),
        }
    }
}

async fn read_upload(mut file: FileUpload) -> BodyResult<Bytes> {
    let Some(mut content) = file.content.take() else {
        return Err(BodyError::MissingContent { file: file.file_name });
    };
    let mut buf = Vec::new();
    content
        .read_to_end(&mut buf)
        .await
        .map_err(|source| BodyError::Read {
            file: file.file_name.clone(),
            source,
        })?;
    Ok(Bytes::from(buf))
}

async fn encode_multipart(
    files: Vec<FileUpload>,
    fields: BTreeMap<String, String>,
) -> BodyResult<EncodedBody> {
    // Reject before writing anything; the remaining streams drop with `files`.
    if let Some(missing) = files.iter().find(|file| file.content.is_none()) {
        return Err(BodyError::MissingContent {
            file: missing.file_name.clone(),
        });
    }

    let numbered = files.len() > 1;
    let mut writer = MultipartWriter::new();
    for (index, mut file) in files.into_iter().enumerate() {
        let field = match file.field_name.take().filter(|name| !name.is_empty()) {
            Some(name) => name,
            None if numbered => format!("file{}", index + 1),
            None => "file".to_string(),
        };
        let file_name = file.file_name.clone();
        let mime = file.mime.clone();
        let content = read_upload(file).await?;

        writer.create_form_file(&field, &file_name, mime.as_deref());
        writer.write(&content);
    }

    for (key, value) in &fields {
        writer.write_field(key, value);
    }

    let content_type = writer.content_type();
    Ok(EncodedBody::new(BodyKind::Multipart, writer.finish(), Some(content_type)))
}

/// Encoded body plus the content type it implies.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub kind: BodyKind,
    pub source: BodySource,
    pub content_type: Option<String>,
}

impl EncodedBody {
    fn new(kind: BodyKind, bytes: Bytes, content_type: Option<String>) -> Self {
        Self {
            kind,
            source: BodySource::Buffered(bytes),
            content_type,
        }
    }
}

/// Buffered request body. Cloning is cheap and never consumes the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BodySource {
    #[default]
    Empty,
    Buffered(Bytes),
}

impl BodySource {
    /// Re-acquires the body for display; `None` when there is no body.
    pub fn snapshot(&self) -> Option<Bytes> {
        match self {
            BodySource::Empty => None,
            BodySource::Buffered(bytes) => Some(bytes.clone()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BodySource::Empty => 0,
            BodySource::Buffered(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Body to send on the wire.
    pub fn to_http_body(&self) -> Full<Bytes> {
        match self {
            BodySource::Empty => Full::new(Bytes::new()),
            BodySource::Buffered(bytes) => Full::new(bytes.clone()),
        }
    }
}

/// A request ready for decoration and sending.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Virtual-host override; `None` sends the URL host.
    pub host: Option<String>,
    pub body: BodySource,
    pub kind: BodyKind,
}

impl BuiltRequest {
    /// Encodes `mode` and assembles the request.
    pub async fn build(method: Method, url: Url, mode: BodyMode) -> BodyResult<Self> {
        let encoded = mode.encode().await?;
        let mut headers = HeaderMap::new();
        if let Some(content_type) = encoded.content_type {
            let value = HeaderValue::from_str(&content_type)
                .map_err(|_| BodyError::InvalidContentType(content_type.clone()))?;
            headers.insert(CONTENT_TYPE, value);
        }

        Ok(Self {
            method,
            url,
            headers,
            host: None,
            body: encoded.source,
            kind: encoded.kind,
        })
    }
}
