//! Buffered `multipart/form-data` writer.

use std::fmt::Write as _;

use bytes::Bytes;
use new_mime_guess::MimeGuess;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// MIME type for `file_name` by extension, falling back to octet-stream.
pub fn guess_mime(file_name: &str) -> String {
    MimeGuess::from_path(file_name)
        .first()
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Escapes a value for use inside a quoted header parameter.
pub fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Writes parts into an in-memory body. Call [`MultipartWriter::finish`] to
/// emit the closing boundary.
#[derive(Debug)]
pub struct MultipartWriter {
    boundary: String,
    buf: Vec<u8>,
    parts: usize,
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartWriter {
    /// Writer with a random 60-character hex boundary.
    pub fn new() -> Self {
        let raw: [u8; 30] = rand::random();
        let mut boundary = String::with_capacity(60);
        for byte in raw {
            let _ = write!(boundary, "{byte:02x}");
        }
        Self::with_boundary(boundary)
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buf: Vec::new(),
            parts: 0,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Starts a part with the given headers. Part content is appended with
    /// [`MultipartWriter::write`].
    pub fn create_part(&mut self, headers: &[(&str, String)]) {
        if self.parts > 0 {
            self.buf.extend_from_slice(b"\r\n");
        }
        self.parts += 1;

        self.buf.extend_from_slice(b"--");
        self.buf.extend_from_slice(self.boundary.as_bytes());
        self.buf.extend_from_slice(b"\r\n");

        let mut sorted: Vec<&(&str, String)> = headers.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in sorted {
            self.buf.extend_from_slice(name.as_bytes());
            self.buf.extend_from_slice(b": ");
            self.buf.extend_from_slice(value.as_bytes());
            self.buf.extend_from_slice(b"\r\n");
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Starts a file part advertising `mime`, or the type guessed from
    /// `file_name` when `mime` is `None`.
    pub fn create_form_file(&mut self, field: &str, file_name: &str, mime: Option<&str>) {
        let content_type = mime
            .map(str::to_string)
            .unwrap_or_else(|| guess_mime(file_name));
        self.create_part(&[
            (
                "Content-Disposition",
                format!(
                    "form-data; name=\"{}\"; filename=\"{}\"",
                    escape_quotes(field),
                    escape_quotes(file_name)
                ),
            ),
            ("Content-Type", content_type),
        ]);
    }

    /// Writes a complete plain form field.
    pub fn write_field(&mut self, name: &str, value: &str) {
        self.create_part(&[(
            "Content-Disposition",
            format!("form-data; name=\"{}\"", escape_quotes(name)),
        )]);
        self.write(value.as_bytes());
    }

    /// Appends content to the current part.
    pub fn write(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn finish(mut self) -> Bytes {
        if self.parts > 0 {
            self.buf.extend_from_slice(b"\r\n");
        }
        self.buf.extend_from_slice(b"--");
        self.buf.extend_from_slice(self.boundary.as_bytes());
        self.buf.extend_from_slice(b"--\r\n");
        Bytes::from(self.buf)
    }
}
