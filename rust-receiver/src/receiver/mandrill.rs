//! Mandrill inbound webhooks.
//!
//! Mandrill batches events: a single POST carries a JSON array in the
//! `mandrill_events` field and every `inbound` event in it becomes one
//! message. Requests are signed with base64 HMAC-SHA1 over the webhook URL
//! and the POST parameters; the HTTP layer passes the `X-Mandrill-Signature`
//! header in as the `x-mandrill-signature` parameter.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::message::{Attachment, HeaderMap, Message};
use crate::params::Params;
use crate::receiver::base::{header_pairs_from_json, multimap};
use crate::receiver::options::{self, BaseOptions, Options, DEFAULT_SPAMASSASSIN_THRESHOLD};
use crate::receiver::signature::{constant_time_compare, mandrill_signature};
use crate::receiver::{Provider, Receiver};

/// Parameter carrying the `X-Mandrill-Signature` request header.
pub const SIGNATURE_FIELD: &str = "x-mandrill-signature";

const EVENTS_FIELD: &str = "mandrill_events";

const RECOGNIZED: &[&str] = &[
    "spamassassin_threshold",
    "mandrill_webhook_key",
    "mandrill_webhook_url",
];

#[derive(Debug, Clone)]
pub struct Mandrill {
    base: BaseOptions,
    webhook_key: Option<String>,
    webhook_url: Option<String>,
    spamassassin_threshold: f64,
}

impl Mandrill {
    pub fn new(options: &Options) -> Result<Self> {
        let webhook_key = options::string(options, "mandrill_webhook_key");
        let webhook_url = options::string(options, "mandrill_webhook_url");

        // The URL is part of the signed string, so a key alone cannot verify anything.
        if webhook_key.is_some() && webhook_url.is_none() {
            return Err(Error::MissingOption {
                provider: Provider::Mandrill.display_name().to_string(),
                option: "mandrill_webhook_url".to_string(),
            });
        }

        Ok(Self {
            base: BaseOptions::from_options(options)?,
            webhook_key,
            webhook_url,
            spamassassin_threshold: options::number(options, "spamassassin_threshold")?
                .unwrap_or(DEFAULT_SPAMASSASSIN_THRESHOLD),
        })
    }

    fn transform_event(&self, event: &Value) -> Result<Message> {
        let msg = event
            .get("msg")
            .filter(|msg| msg.is_object())
            .ok_or_else(|| Error::malformed("inbound event has no `msg` object"))?;

        let mut headers = multimap(header_pairs_from_json(
            msg.get("headers").unwrap_or(&Value::Null),
        )?);
        fill_missing_headers(&mut headers, msg);

        let mut attachments = Vec::new();
        for key in ["attachments", "images"] {
            if let Some(Value::Object(files)) = msg.get(key) {
                for descriptor in files.values() {
                    attachments.push(attachment_from_descriptor(descriptor, key == "images")?);
                }
            }
        }

        let message = Message::builder(Provider::Mandrill)
            .headers(headers)
            .text_part(str_field(msg, "text"), None)
            .html_part(str_field(msg, "html"), None)
            .attachments(attachments)
            .extension("ts", event.get("ts").cloned().unwrap_or(Value::Null))
            .extension("email", msg.get("email").cloned().unwrap_or(Value::Null))
            .extension("dkim_signed", pointer(msg, "/dkim/signed"))
            .extension("dkim_valid", pointer(msg, "/dkim/valid"))
            .extension("spam_report_score", pointer(msg, "/spam_report/score"))
            .extension("spf_result", pointer(msg, "/spf/result"))
            .build();

        Ok(message)
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn pointer(value: &Value, path: &str) -> Value {
    value.pointer(path).cloned().unwrap_or(Value::Null)
}

/// Mandrill's header block normally carries these, but fall back to the
/// top-level fields so `From`, `To` and `Subject` are never lost.
fn fill_missing_headers(headers: &mut HeaderMap, msg: &Value) {
    if !headers.contains("From") {
        let email = str_field(msg, "from_email");
        if !email.is_empty() {
            match msg.get("from_name").and_then(Value::as_str).filter(|n| !n.is_empty()) {
                Some(name) => headers.set("From", format!("{} <{}>", name, email)),
                None => headers.set("From", email),
            }
        }
    }

    if !headers.contains("To") {
        if let Some(Value::Array(recipients)) = msg.get("to") {
            let addresses: Vec<String> = recipients
                .iter()
                .filter_map(|recipient| {
                    let email = recipient.get(0)?.as_str()?;
                    match recipient.get(1).and_then(Value::as_str).filter(|n| !n.is_empty()) {
                        Some(name) => Some(format!("{} <{}>", name, email)),
                        None => Some(email.to_string()),
                    }
                })
                .collect();
            if !addresses.is_empty() {
                headers.set("To", addresses.join(", "));
            }
        }
    }

    if !headers.contains("Subject") {
        if let Some(subject) = msg.get("subject").and_then(Value::as_str) {
            headers.set("Subject", subject);
        }
    }
}

/// Build an attachment from `{"name", "type", "content", "base64"}`.
///
/// Inline images are always base64 encoded.
fn attachment_from_descriptor(descriptor: &Value, always_base64: bool) -> Result<Attachment> {
    let name = str_field(descriptor, "name");
    let content = str_field(descriptor, "content");
    let is_base64 = always_base64
        || descriptor
            .get("base64")
            .and_then(Value::as_bool)
            .unwrap_or(false);

    let bytes = if is_base64 {
        STANDARD
            .decode(content.as_bytes())
            .map_err(|e| Error::malformed(format!("attachment `{}` is not valid base64: {}", name, e)))?
    } else {
        content.as_bytes().to_vec()
    };

    let content_type = descriptor.get("type").and_then(Value::as_str);
    Ok(Attachment::new(name, content_type, None, Bytes::from(bytes)))
}

impl Receiver for Mandrill {
    fn provider(&self) -> Provider {
        Provider::Mandrill
    }

    fn recognized_options(&self) -> &'static [&'static str] {
        RECOGNIZED
    }

    fn base_options(&self) -> &BaseOptions {
        &self.base
    }

    fn is_valid(&self, params: &Params) -> Result<bool> {
        let (key, url) = match (&self.webhook_key, &self.webhook_url) {
            (Some(key), Some(url)) => (key, url),
            _ => return Ok(self.base.default_validity(Provider::Mandrill.as_str())),
        };

        let signature = params.require_text(SIGNATURE_FIELD)?;
        params.require_text(EVENTS_FIELD)?;

        let signed = params
            .iter()
            .filter(|(name, _)| *name != SIGNATURE_FIELD)
            .filter_map(|(name, value)| value.as_text().map(|text| (name, text)));

        let expected = match mandrill_signature(key, url, signed) {
            Some(s) => s,
            None => return Ok(false),
        };

        let valid = constant_time_compare(&expected, signature.trim());
        if !valid {
            warn!(
                expected_length = expected.len(),
                actual_length = signature.len(),
                "mandrill_signature_mismatch"
            );
        }
        Ok(valid)
    }

    fn transform(&self, params: &Params) -> Result<Vec<Message>> {
        let raw = params.require_text(EVENTS_FIELD)?;
        let events: Value = serde_json::from_str(raw)
            .map_err(|e| Error::malformed(format!("`{}` is not valid JSON: {}", EVENTS_FIELD, e)))?;
        let events = events
            .as_array()
            .ok_or_else(|| Error::malformed(format!("`{}` is not an array", EVENTS_FIELD)))?;

        info!(event_count = events.len(), "mandrill_transform_start");

        let mut messages = Vec::new();
        for event in events {
            let kind = event
                .get("event")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::malformed("event has no `event` type"))?;

            if kind != "inbound" {
                info!(event = kind, "mandrill_event_skipped");
                continue;
            }

            messages.push(self.transform_event(event)?);
        }

        info!(message_count = messages.len(), "mandrill_transform_complete");

        Ok(messages)
    }

    fn is_spam(&self, message: &Message) -> bool {
        message
            .extensions
            .get_f64(Provider::Mandrill, "spam_report_score")
            .map(|score| score > self.spamassassin_threshold)
            .unwrap_or(false)
    }
}
