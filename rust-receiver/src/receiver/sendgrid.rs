//! SendGrid Inbound Parse.
//!
//! The parsed format posts the header block as raw text plus `text`, `html`
//! and numbered `attachmentN` uploads described by `attachment-info`. The raw
//! format ("send raw" enabled) posts the whole email in `email`. Both carry
//! SendGrid's verdict fields (`dkim`, `SPF`, `spam_score`, ...). SendGrid
//! does not sign Inbound Parse requests.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::message::{Attachment, HeaderMap, Message, MessageBuilder, TEXT_HTML, TEXT_PLAIN};
use crate::params::Params;
use crate::receiver::base::{headers_from_raw_block, indexed_attachments, non_empty_text};
use crate::receiver::mime::{self, normalize_charset};
use crate::receiver::options::{
    self, BaseOptions, Options, PostFormat, DEFAULT_SPAMASSASSIN_THRESHOLD,
};
use crate::receiver::{Provider, Receiver};

const RECOGNIZED: &[&str] = &["spamassassin_threshold", "http_post_format"];

/// Verdict fields kept as extensions, with their extension names.
const EXTRA_FIELDS: &[(&str, &str)] = &[
    ("dkim", "dkim"),
    ("SPF", "spf"),
    ("spam_report", "spam_report"),
    ("spam_score", "spam_score"),
    ("sender_ip", "sender_ip"),
];

/// Top-level fields used when the header block lacks them.
const FALLBACK_HEADERS: &[(&str, &str)] = &[
    ("from", "From"),
    ("to", "To"),
    ("cc", "Cc"),
    ("subject", "Subject"),
];

#[derive(Debug, Default, Deserialize)]
struct AttachmentInfo {
    filename: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendGrid {
    base: BaseOptions,
    spamassassin_threshold: f64,
    format: PostFormat,
}

impl SendGrid {
    pub fn new(options: &Options) -> Result<Self> {
        Ok(Self {
            base: BaseOptions::from_options(options)?,
            spamassassin_threshold: options::number(options, "spamassassin_threshold")?
                .unwrap_or(DEFAULT_SPAMASSASSIN_THRESHOLD),
            format: PostFormat::from_options(Provider::SendGrid.display_name(), options)?,
        })
    }

    fn transform_parsed(&self, params: &Params) -> Result<MessageBuilder> {
        let mut headers = match non_empty_text(params, "headers") {
            Some(raw) => headers_from_raw_block(raw)?,
            None => HeaderMap::new(),
        };
        for (field, header) in FALLBACK_HEADERS {
            if !headers.contains(header) {
                if let Some(value) = non_empty_text(params, field) {
                    headers.set(*header, value);
                }
            }
        }

        let charsets = parse_charsets(params)?;
        let text_charset = charsets
            .get("text")
            .and_then(|charset| normalize_charset(TEXT_PLAIN, charset));
        let html_charset = charsets
            .get("html")
            .and_then(|charset| normalize_charset(TEXT_HTML, charset));

        let attachments = self.attachments(params)?;

        Ok(Message::builder(Provider::SendGrid)
            .headers(headers)
            .text_part(params.text("text").unwrap_or_default(), text_charset)
            .html_part(params.text("html").unwrap_or_default(), html_charset)
            .attachments(attachments))
    }

    fn transform_raw(&self, params: &Params) -> Result<MessageBuilder> {
        let raw = params.require_text("email")?;
        mime::parse_raw(Provider::SendGrid, raw.as_bytes())
    }

    /// Numbered uploads, with names and types taken from `attachment-info`.
    fn attachments(&self, params: &Params) -> Result<Vec<Attachment>> {
        let mut descriptions: HashMap<String, AttachmentInfo> =
            match non_empty_text(params, "attachment-info") {
                Some(raw) => serde_json::from_str(raw).map_err(|e| {
                    Error::malformed(format!("`attachment-info` is not valid JSON: {}", e))
                })?,
                None => HashMap::new(),
            };

        let slots = indexed_attachments(params, "attachments", |n| format!("attachment{}", n))?;

        Ok(slots
            .into_iter()
            .map(|(field, mut attachment)| {
                if let Some(described) = descriptions.remove(&field) {
                    if let Some(filename) = described.filename.or(described.name) {
                        attachment.filename = filename;
                    }
                    if let Some(content_type) = described.content_type.filter(|t| !t.is_empty()) {
                        attachment.content_type = content_type;
                    }
                }
                attachment
            })
            .collect())
    }
}

/// The `charsets` field: a JSON object mapping field names to charsets.
fn parse_charsets(params: &Params) -> Result<HashMap<String, String>> {
    match non_empty_text(params, "charsets") {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| Error::malformed(format!("`charsets` is not valid JSON: {}", e))),
        None => Ok(HashMap::new()),
    }
}

impl Receiver for SendGrid {
    fn provider(&self) -> Provider {
        Provider::SendGrid
    }

    fn recognized_options(&self) -> &'static [&'static str] {
        RECOGNIZED
    }

    fn base_options(&self) -> &BaseOptions {
        &self.base
    }

    fn transform(&self, params: &Params) -> Result<Vec<Message>> {
        info!(
            format = ?self.format,
            has_headers = params.contains_key("headers"),
            has_email = params.contains_key("email"),
            attachment_count = params.text("attachments").unwrap_or("0"),
            "sendgrid_transform_start"
        );

        let mut builder = match self.format {
            PostFormat::Parsed => self.transform_parsed(params)?,
            PostFormat::Raw => self.transform_raw(params)?,
        };

        for (field, name) in EXTRA_FIELDS {
            if let Some(value) = non_empty_text(params, field) {
                builder = builder.extension(name, value);
            }
        }

        if let Some(raw) = non_empty_text(params, "envelope") {
            // Stored structured when it parses.
            let envelope = serde_json::from_str::<Value>(raw).unwrap_or_else(|e| {
                warn!(error = %e, "sendgrid_envelope_not_json");
                Value::String(raw.to_string())
            });
            builder = builder.extension("envelope", envelope);
        }

        let message = builder.build();

        info!(
            header_count = message.headers.len(),
            body_part_count = message.body_parts.len(),
            attachment_count = message.attachments.len(),
            extension_count = message.extensions.len(),
            "sendgrid_transform_complete"
        );

        Ok(vec![message])
    }

    fn is_spam(&self, message: &Message) -> bool {
        message
            .extensions
            .get_f64(Provider::SendGrid, "spam_score")
            .map(|score| score > self.spamassassin_threshold)
            .unwrap_or(false)
    }
}
