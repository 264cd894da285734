//! Canonical message model.
//!
//! Every adapter produces [`Message`] values, whatever the shape of the
//! provider's payload:
//!
//! ```text
//! Message
//! ├── headers      case-insensitive multimap
//! ├── body_parts   text/plain first, then text/html
//! ├── attachments  filename, content type, size, bytes
//! └── extensions   "<provider>.<name>" → JSON value
//! ```

pub mod extensions;
pub mod headers;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::receiver::Provider;

pub use extensions::Extensions;
pub use headers::HeaderMap;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A text body of the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BodyPart {
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    pub body: String,
}

impl BodyPart {
    pub fn new(content_type: impl Into<String>, charset: Option<String>, body: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            charset,
            body: body.into(),
        }
    }
}

/// A file attached to the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(serialize_with = "serialize_base64")]
    pub content: Bytes,
}

fn serialize_base64<S: Serializer>(content: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(content))
}

impl Attachment {
    /// Build an attachment; `size` defaults to the content length.
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<&str>,
        size: Option<u64>,
        content: Bytes,
    ) -> Self {
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(OCTET_STREAM);
        Self {
            filename: filename.into(),
            content_type: content_type.to_string(),
            size: size.or(Some(content.len() as u64)),
            content,
        }
    }
}

/// A provider-agnostic inbound email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub provider: Provider,
    pub headers: HeaderMap,
    pub body_parts: Vec<BodyPart>,
    pub attachments: Vec<Attachment>,
    pub extensions: Extensions,
}

impl Message {
    pub fn builder(provider: Provider) -> MessageBuilder {
        MessageBuilder::new(provider)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    fn part(&self, content_type: &str) -> Option<&BodyPart> {
        self.body_parts
            .iter()
            .find(|part| part.content_type.eq_ignore_ascii_case(content_type))
    }

    /// The plain-text body. Always present on built messages.
    pub fn text_body(&self) -> &str {
        self.part(TEXT_PLAIN).map(|part| part.body.as_str()).unwrap_or_default()
    }

    pub fn html_body(&self) -> Option<&str> {
        self.part(TEXT_HTML).map(|part| part.body.as_str())
    }

    /// Extension value in this message's provider namespace.
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions.get(self.provider, name)
    }
}

/// Explicit builder for [`Message`].
///
/// Empty HTML bodies and empty extension values are skipped, and `build`
/// guarantees a `text/plain` part exists.
#[derive(Debug)]
pub struct MessageBuilder {
    provider: Provider,
    headers: HeaderMap,
    body_parts: Vec<BodyPart>,
    attachments: Vec<Attachment>,
    extensions: Extensions,
}

impl MessageBuilder {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            headers: HeaderMap::new(),
            body_parts: Vec::new(),
            attachments: Vec::new(),
            extensions: Extensions::new(),
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set a header, replacing previous values, unless `value` is empty.
    pub fn header(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.headers.set(name, value);
        }
        self
    }

    pub fn text_part(mut self, body: impl Into<String>, charset: Option<String>) -> Self {
        self.body_parts.push(BodyPart::new(TEXT_PLAIN, charset, body));
        self
    }

    /// Add an HTML part; skipped when the body is empty.
    pub fn html_part(mut self, body: impl Into<String>, charset: Option<String>) -> Self {
        let body = body.into();
        if !body.is_empty() {
            let charset = charset.or_else(|| Some("UTF-8".to_string()));
            self.body_parts.push(BodyPart::new(TEXT_HTML, charset, body));
        }
        self
    }

    pub fn body_part(mut self, part: BodyPart) -> Self {
        self.body_parts.push(part);
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn attachments(mut self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    /// Record a provider extension; empty values are skipped.
    pub fn extension(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extensions.insert(self.provider, name, value);
        self
    }

    pub fn build(mut self) -> Message {
        if !self
            .body_parts
            .iter()
            .any(|part| part.content_type.eq_ignore_ascii_case(TEXT_PLAIN))
        {
            self.body_parts.insert(0, BodyPart::new(TEXT_PLAIN, None, ""));
        }

        Message {
            provider: self.provider,
            headers: self.headers,
            body_parts: self.body_parts,
            attachments: self.attachments,
            extensions: self.extensions,
        }
    }
}
