//! File content attached to an email, regular or inline.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{CourierError, CourierResult};

/// Where the attachment bytes come from. File-backed bodies are read lazily
/// when a courier resolves the content.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttachmentBody {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// A file attached to an email.
///
/// `content_id` is only meaningful for inline attachments and is set by
/// [`Email::embed`](crate::models::Email::embed).
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub charset: Option<String>,
    pub content_id: Option<String>,
    body: AttachmentBody,
}

impl Attachment {
    /// An attachment backed by in-memory bytes.
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            charset: None,
            content_id: None,
            body: AttachmentBody::Bytes(bytes),
        }
    }

    /// An attachment backed by a file on disk, read at send time.
    pub fn from_file(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            charset: None,
            content_id: None,
            body: AttachmentBody::File(path.into()),
        }
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// The backing file path, when file-backed.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.body {
            AttachmentBody::File(path) => Some(path),
            AttachmentBody::Bytes(_) => None,
        }
    }

    /// A short name for the body kind, used in validation errors.
    pub fn body_kind(&self) -> &'static str {
        match &self.body {
            AttachmentBody::Bytes(_) => "in-memory",
            AttachmentBody::File(_) => "file-backed",
        }
    }

    /// Resolve the attachment to raw bytes.
    pub fn bytes(&self) -> CourierResult<Vec<u8>> {
        match &self.body {
            AttachmentBody::Bytes(bytes) => Ok(bytes.clone()),
            AttachmentBody::File(path) => std::fs::read(path).map_err(|e| {
                CourierError::Validation(format!(
                    "unable to read attachment '{}' from {}: {e}",
                    self.name,
                    path.display()
                ))
            }),
        }
    }

    /// Resolve the attachment and base64-encode it.
    pub fn base64_content(&self) -> CourierResult<String> {
        Ok(BASE64.encode(self.bytes()?))
    }
}
