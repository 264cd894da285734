//! Postmark inbound webhooks.
//!
//! Postmark posts a JSON document. `Headers` and `Attachments` arrive as
//! nested JSON (kept as JSON text by [`Params::from_json`]); the envelope
//! headers are separate top-level fields. Postmark does not sign requests.
//! See: https://postmarkapp.com/developer/webhooks/inbound-webhook

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::message::{Attachment, Message};
use crate::params::Params;
use crate::receiver::base::{headers_from_json_field, non_empty_text};
use crate::receiver::options::{BaseOptions, Options};
use crate::receiver::{Provider, Receiver};

/// Top-level fields copied into headers, with their header names.
const ENVELOPE_HEADERS: &[(&str, &str)] = &[
    ("From", "From"),
    ("To", "To"),
    ("Cc", "Cc"),
    ("ReplyTo", "Reply-To"),
    ("Subject", "Subject"),
    ("Date", "Date"),
];

/// Top-level fields kept as extensions, with their extension names.
const EXTRA_FIELDS: &[(&str, &str)] = &[
    ("MailboxHash", "mailbox_hash"),
    ("MessageID", "message_id"),
    ("Tag", "tag"),
    ("StrippedTextReply", "stripped_text_reply"),
];

#[derive(Debug, Deserialize)]
struct PostmarkAttachment {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Content", default)]
    content: String,
    #[serde(rename = "ContentType")]
    content_type: Option<String>,
    #[serde(rename = "ContentLength")]
    content_length: Option<u64>,
    #[serde(rename = "ContentID")]
    content_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Postmark {
    base: BaseOptions,
}

impl Postmark {
    pub fn new(options: &Options) -> Result<Self> {
        Ok(Self {
            base: BaseOptions::from_options(options)?,
        })
    }
}

fn parse_attachments(params: &Params) -> Result<(Vec<Attachment>, Map<String, Value>)> {
    let raw = match non_empty_text(params, "Attachments") {
        Some(raw) => raw,
        None => return Ok((Vec::new(), Map::new())),
    };

    let descriptors: Vec<PostmarkAttachment> = serde_json::from_str(raw)
        .map_err(|e| Error::malformed(format!("`Attachments` is not valid: {}", e)))?;

    let mut attachments = Vec::with_capacity(descriptors.len());
    let mut content_ids = Map::new();

    for descriptor in descriptors {
        let content = STANDARD.decode(descriptor.content.as_bytes()).map_err(|e| {
            Error::malformed(format!(
                "attachment `{}` is not valid base64: {}",
                descriptor.name, e
            ))
        })?;

        if let Some(cid) = descriptor.content_id.filter(|cid| !cid.is_empty()) {
            content_ids.insert(cid, Value::String(descriptor.name.clone()));
        }

        attachments.push(Attachment::new(
            descriptor.name,
            descriptor.content_type.as_deref(),
            descriptor.content_length,
            Bytes::from(content),
        ));
    }

    Ok((attachments, content_ids))
}

impl Receiver for Postmark {
    fn provider(&self) -> Provider {
        Provider::Postmark
    }

    fn recognized_options(&self) -> &'static [&'static str] {
        &[]
    }

    fn base_options(&self) -> &BaseOptions {
        &self.base
    }

    fn transform(&self, params: &Params) -> Result<Vec<Message>> {
        info!(
            has_headers = params.contains_key("Headers"),
            has_html_body = params.contains_key("HtmlBody"),
            "postmark_transform_start"
        );

        let mut headers = headers_from_json_field(params, "Headers")?;
        // MessageID is Postmark's own identifier; only use it when the
        // original Message-ID header was not forwarded.
        if !headers.contains("Message-ID") {
            if let Some(id) = non_empty_text(params, "MessageID") {
                headers.set("Message-ID", id);
            }
        }

        let (attachments, content_ids) = parse_attachments(params)?;

        let mut builder = Message::builder(Provider::Postmark).headers(headers);
        for (field, header) in ENVELOPE_HEADERS {
            builder = builder.header(header, params.text(field));
        }

        builder = builder
            .text_part(params.text("TextBody").unwrap_or_default(), None)
            .html_part(params.text("HtmlBody").unwrap_or_default(), None)
            .attachments(attachments)
            .extension("content_id_map", Value::Object(content_ids));

        for (field, name) in EXTRA_FIELDS {
            if let Some(value) = non_empty_text(params, field) {
                builder = builder.extension(name, value);
            }
        }

        let message = builder.build();

        info!(
            header_count = message.headers.len(),
            attachment_count = message.attachments.len(),
            "postmark_transform_complete"
        );

        Ok(vec![message])
    }

    fn is_spam(&self, message: &Message) -> bool {
        message
            .header("X-Spam-Status")
            .map(|status| status.trim() == "Yes")
            .unwrap_or(false)
    }
}
