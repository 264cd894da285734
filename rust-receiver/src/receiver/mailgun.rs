//! Mailgun inbound routes.
//!
//! Mailgun posts either flattened fields (`parsed`, the default) or the
//! whole email as `body-mime` (`raw`, for routes ending in `mime`).
//! Requests are signed with hex HMAC-SHA256 over `timestamp + token`.

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::params::Params;
use crate::receiver::base::{headers_from_json_field, indexed_attachments, non_empty_text};
use crate::receiver::options::{self, BaseOptions, Options, PostFormat};
use crate::receiver::signature::{is_timestamp_fresh, verify_mailgun_signature};
use crate::receiver::{mime, Provider, Receiver};

const RECOGNIZED: &[&str] = &[
    "mailgun_api_key",
    "mailgun_signature_max_age",
    "http_post_format",
];

/// Extra parsed-format fields kept as extensions, with their extension names.
const EXTRA_FIELDS: &[(&str, &str)] = &[
    ("stripped-text", "stripped_text"),
    ("stripped-signature", "stripped_signature"),
    ("stripped-html", "stripped_html"),
];

#[derive(Debug, Clone)]
pub struct Mailgun {
    base: BaseOptions,
    api_key: Option<String>,
    signature_max_age: Option<u64>,
    format: PostFormat,
}

impl Mailgun {
    pub fn new(options: &Options) -> Result<Self> {
        Ok(Self {
            base: BaseOptions::from_options(options)?,
            api_key: options::string(options, "mailgun_api_key"),
            signature_max_age: options::number(options, "mailgun_signature_max_age")?,
            format: PostFormat::from_options(Provider::Mailgun.display_name(), options)?,
        })
    }

    fn transform_parsed(&self, params: &Params) -> Result<Message> {
        let headers = headers_from_json_field(params, "message-headers")?;

        let attachments = indexed_attachments(params, "attachment-count", |n| {
            format!("attachment-{}", n)
        })?;

        let mut builder = Message::builder(Provider::Mailgun)
            .headers(headers)
            .text_part(params.text("body-plain").unwrap_or_default(), None)
            .html_part(params.text("body-html").unwrap_or_default(), None)
            .attachments(attachments.into_iter().map(|(_, attachment)| attachment));

        for (field, name) in EXTRA_FIELDS {
            if let Some(value) = non_empty_text(params, field) {
                builder = builder.extension(name, value);
            }
        }

        if let Some(raw) = non_empty_text(params, "content-id-map") {
            let map: Value = serde_json::from_str(raw)
                .map_err(|e| Error::malformed(format!("`content-id-map` is not valid JSON: {}", e)))?;
            builder = builder.extension("content_id_map", map);
        }

        Ok(builder.build())
    }

    fn transform_raw(&self, params: &Params) -> Result<Message> {
        let raw = params.require_text("body-mime")?;
        Ok(mime::parse_raw(Provider::Mailgun, raw.as_bytes())?.build())
    }
}

impl Receiver for Mailgun {
    fn provider(&self) -> Provider {
        Provider::Mailgun
    }

    fn recognized_options(&self) -> &'static [&'static str] {
        RECOGNIZED
    }

    fn base_options(&self) -> &BaseOptions {
        &self.base
    }

    fn is_valid(&self, params: &Params) -> Result<bool> {
        let api_key = match &self.api_key {
            Some(key) => key,
            None => return Ok(self.base.default_validity(Provider::Mailgun.as_str())),
        };

        let timestamp = params.require_text("timestamp")?;
        let token = params.require_text("token")?;
        let signature = params.require_text("signature")?;

        if let Some(max_age) = self.signature_max_age {
            if !is_timestamp_fresh(timestamp, max_age) {
                return Ok(false);
            }
        }

        Ok(verify_mailgun_signature(api_key, timestamp, token, signature))
    }

    fn transform(&self, params: &Params) -> Result<Vec<Message>> {
        info!(
            format = ?self.format,
            has_message_headers = params.contains_key("message-headers"),
            has_body_html = params.contains_key("body-html"),
            attachment_count = params.text("attachment-count").unwrap_or("0"),
            "mailgun_transform_start"
        );

        let message = match self.format {
            PostFormat::Parsed => self.transform_parsed(params)?,
            PostFormat::Raw => self.transform_raw(params)?,
        };

        if !message.headers.contains("Message-Id") {
            warn!("mailgun_no_message_id_in_headers");
        }

        info!(
            header_count = message.headers.len(),
            body_part_count = message.body_parts.len(),
            attachment_count = message.attachments.len(),
            extension_count = message.extensions.len(),
            "mailgun_transform_complete"
        );

        Ok(vec![message])
    }

    fn is_spam(&self, message: &Message) -> bool {
        message
            .header("X-Mailgun-Sflag")
            .map(|flag| flag.trim() == "Yes")
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::UploadedFile;
    use crate::receiver::signature::mailgun_signature;
    use bytes::Bytes;
    use serde_json::json;

    fn receiver(pairs: &[(&str, &str)]) -> Mailgun {
        let options: Options = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Mailgun::new(&options).unwrap()
    }

    fn signed_params(key: &str, timestamp: &str, token: &str) -> Params {
        let signature = mailgun_signature(key, timestamp, token).unwrap();
        [
            ("timestamp", timestamp.to_string()),
            ("token", token.to_string()),
            ("signature", signature),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_valid_signature() {
        let mailgun = receiver(&[("mailgun_api_key", "foo")]);
        let params = signed_params("foo", "1234567890", "abc");

        assert!(mailgun.is_valid(&params).unwrap());
    }

    #[test]
    fn test_signature_mismatch_is_false() {
        let mailgun = receiver(&[("mailgun_api_key", "foo")]);

        assert!(!mailgun.is_valid(&signed_params("bar", "1234567890", "abc")).unwrap());

        let signature = mailgun_signature("foo", "1234567890", "abc").unwrap();
        let replayed: Params = [
            ("timestamp", "1234567891"),
            ("token", "abc"),
            ("signature", signature.as_str()),
        ]
        .into_iter()
        .collect();
        assert!(!mailgun.is_valid(&replayed).unwrap());
    }

    #[test]
    fn test_missing_signature_fields() {
        let mailgun = receiver(&[("mailgun_api_key", "foo")]);
        let full = signed_params("foo", "1234567890", "abc");

        for field in ["timestamp", "token", "signature"] {
            let params: Params = full
                .iter()
                .filter(|(k, _)| *k != field)
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();

            assert_eq!(
                mailgun.is_valid(&params).unwrap_err(),
                Error::MissingField(field.to_string())
            );
        }
    }

    #[test]
    fn test_no_api_key_is_permissive() {
        let mailgun = receiver(&[]);

        assert!(mailgun.is_valid(&Params::new()).unwrap());
    }

    #[test]
    fn test_stale_timestamp_rejected_when_max_age_set() {
        let mailgun = receiver(&[("mailgun_api_key", "foo"), ("mailgun_signature_max_age", "300")]);

        // Year 2000
        assert!(!mailgun.is_valid(&signed_params("foo", "946684800", "abc")).unwrap());
    }

    #[test]
    fn test_unsupported_format() {
        let options: Options = [("http_post_format".to_string(), "xml".to_string())]
            .into_iter()
            .collect();

        let err = Mailgun::new(&options).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedFormat {
                provider: "Mailgun".to_string(),
                format: "xml".to_string()
            }
        );
    }

    #[test]
    fn test_transform_parsed_scenario() {
        let mailgun = receiver(&[("http_post_format", "parsed")]);
        let params: Params = [
            ("message-headers", r#"[["From","a@x.com"],["To","b@x.com"]]"#),
            ("body-plain", "hi"),
            ("attachment-count", "0"),
        ]
        .into_iter()
        .collect();

        let messages = mailgun.transform(&params).unwrap();

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.header("From"), Some("a@x.com"));
        assert_eq!(message.header("To"), Some("b@x.com"));
        assert_eq!(message.body_parts.len(), 1);
        assert_eq!(message.body_parts[0].content_type, "text/plain");
        assert_eq!(message.body_parts[0].body, "hi");
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_transform_parsed_full_payload() {
        let mailgun = receiver(&[]);
        let mut params: Params = [
            (
                "message-headers",
                r#"[["Received","by mx1"],["Received","by mx2"],["From","Bob <bob@example.com>"],["Subject","Hello"],["X-Mailgun-Sflag","Yes"]]"#,
            ),
            ("body-plain", "Hi Alice\n\n> quoted\n--\nBob"),
            ("body-html", "<p>Hi Alice</p>"),
            ("stripped-text", "Hi Alice"),
            ("stripped-signature", "--\nBob"),
            ("stripped-html", ""),
            ("content-id-map", r#"{"<img1@example.com>":"attachment-1"}"#),
            ("attachment-count", "2"),
        ]
        .into_iter()
        .collect();
        params.insert(
            "attachment-1",
            UploadedFile::new("logo.png", Some("image/png".to_string()), Bytes::from_static(b"png")),
        );
        params.insert(
            "attachment-2",
            UploadedFile::new("notes.txt", Some("text/plain".to_string()), Bytes::from_static(b"notes")),
        );

        let message = mailgun.transform(&params).unwrap().remove(0);

        assert_eq!(message.headers.get_all("Received"), ["by mx1", "by mx2"]);
        assert_eq!(message.html_body(), Some("<p>Hi Alice</p>"));
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].filename, "logo.png");
        assert_eq!(message.attachments[1].filename, "notes.txt");
        assert_eq!(
            message.extension("stripped_text").and_then(Value::as_str),
            Some("Hi Alice")
        );
        assert!(message.extension("stripped_html").is_none());
        assert_eq!(
            message.extension("content_id_map"),
            Some(&json!({"<img1@example.com>": "attachment-1"}))
        );
        assert!(mailgun.is_spam(&message));
    }

    #[test]
    fn test_transform_empty_extensions_are_absent() {
        let mailgun = receiver(&[]);
        let params: Params = [
            ("body-plain", "hi"),
            ("stripped-text", ""),
            ("stripped-signature", ""),
        ]
        .into_iter()
        .collect();

        let message = mailgun.transform(&params).unwrap().remove(0);

        assert!(message.extensions.is_empty());
        assert!(!mailgun.is_spam(&message));
    }

    #[test]
    fn test_transform_missing_attachment_slot() {
        let mailgun = receiver(&[]);
        let mut params: Params = [("body-plain", "hi"), ("attachment-count", "3")]
            .into_iter()
            .collect();
        params.insert("attachment-1", UploadedFile::new("a", None, Bytes::from_static(b"a")));
        params.insert("attachment-3", UploadedFile::new("c", None, Bytes::from_static(b"c")));

        assert!(mailgun.transform(&params).unwrap_err().is_malformed());
    }

    #[test]
    fn test_transform_huge_attachment_count() {
        let mailgun = receiver(&[]);
        let params: Params = [
            ("body-plain", "hi"),
            ("attachment-count", "18446744073709551615"),
        ]
        .into_iter()
        .collect();

        assert!(mailgun.transform(&params).unwrap_err().is_malformed());
    }

    #[test]
    fn test_transform_is_idempotent() {
        let mailgun = receiver(&[]);
        let params: Params = [
            ("message-headers", r#"[["Subject","Hello"]]"#),
            ("body-plain", "hi"),
            ("body-html", "<b>hi</b>"),
        ]
        .into_iter()
        .collect();

        assert_eq!(mailgun.transform(&params).unwrap(), mailgun.transform(&params).unwrap());
    }

    #[test]
    fn test_raw_and_parsed_formats_agree() {
        let parsed = receiver(&[]);
        let raw = receiver(&[("http_post_format", "raw")]);

        let parsed_params: Params = [
            (
                "message-headers",
                r#"[["From","a@x.com"],["To","b@x.com"],["Subject","Hello"]]"#,
            ),
            ("body-plain", "hi"),
        ]
        .into_iter()
        .collect();
        let raw_params: Params = [(
            "body-mime",
            "From: a@x.com\r\nTo: b@x.com\r\nSubject: Hello\r\n\r\nhi",
        )]
        .into_iter()
        .collect();

        let from_parsed = parsed.transform(&parsed_params).unwrap().remove(0);
        let from_raw = raw.transform(&raw_params).unwrap().remove(0);

        for name in ["From", "To", "Subject"] {
            assert_eq!(from_parsed.header(name), from_raw.header(name));
        }
        assert_eq!(from_parsed.text_body(), from_raw.text_body());
        assert_eq!(from_parsed.body_parts, from_raw.body_parts);
    }

    #[test]
    fn test_raw_format_requires_body_mime() {
        let raw = receiver(&[("http_post_format", "raw")]);

        assert_eq!(
            raw.transform(&Params::new()).unwrap_err(),
            Error::MissingField("body-mime".to_string())
        );
    }

    #[test]
    fn test_spam_flag_from_raw_headers() {
        let raw = receiver(&[("http_post_format", "raw")]);
        let params: Params = [(
            "body-mime",
            "From: a@x.com\r\nX-Mailgun-Sflag: Yes\r\n\r\nbuy now",
        )]
        .into_iter()
        .collect();

        let message = raw.transform(&params).unwrap().remove(0);
        assert!(raw.is_spam(&message));
    }
}
