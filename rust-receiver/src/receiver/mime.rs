//! Raw MIME parsing for providers that post the whole email as one field.
//!
//! The MIME tree is flattened and condensed so the result has the same
//! shape as a message built from flattened fields:
//! - headers come from the top-level header block
//! - text leaves are grouped by type and same-type bodies are concatenated
//! - `text/plain` comes first, `text/html` next, other text types after
//! - everything else (named parts, attachment dispositions, non-text
//!   leaves) becomes an attachment, in document order

use bytes::Bytes;
use mailparse::{parse_mail, DispositionType, ParsedMail};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::message::{Attachment, BodyPart, MessageBuilder, TEXT_HTML, TEXT_PLAIN};
use crate::receiver::base::multimap;
use crate::receiver::Provider;

/// Parse a raw MIME document into a message builder.
///
/// Adapters add their provider extensions before building.
pub fn parse_raw(provider: Provider, raw: &[u8]) -> Result<MessageBuilder> {
    info!(
        provider = provider.as_str(),
        raw_length = raw.len(),
        "mime_parse_start"
    );

    let mail = parse_mail(raw).map_err(|e| {
        warn!(error = %e, "mime_parse_failed");
        Error::malformed(format!("invalid MIME document: {}", e))
    })?;

    let headers = multimap(
        mail.headers
            .iter()
            .map(|header| (header.get_key(), header.get_value())),
    );

    let mut texts: Vec<BodyPart> = Vec::new();
    let mut attachments: Vec<Attachment> = Vec::new();
    collect_leaves(&mail, &mut texts, &mut attachments)?;

    let parts = condense(texts);

    info!(
        provider = provider.as_str(),
        header_count = headers.len(),
        body_part_count = parts.len(),
        attachment_count = attachments.len(),
        "mime_parse_complete"
    );

    let mut builder = MessageBuilder::new(provider).headers(headers);
    for part in parts {
        builder = builder.body_part(part);
    }
    Ok(builder.attachments(attachments))
}

/// Walk the MIME tree depth-first, sorting leaves into text and attachments.
fn collect_leaves(
    part: &ParsedMail,
    texts: &mut Vec<BodyPart>,
    attachments: &mut Vec<Attachment>,
) -> Result<()> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if mimetype.starts_with("multipart/") {
        for subpart in &part.subparts {
            collect_leaves(subpart, texts, attachments)?;
        }
        return Ok(());
    }

    if let Some(filename) = attachment_filename(part, &mimetype, attachments.len()) {
        let content = part
            .get_body_raw()
            .map_err(|e| Error::malformed(format!("undecodable attachment body: {}", e)))?;
        attachments.push(Attachment::new(
            filename,
            Some(mimetype.as_str()),
            None,
            Bytes::from(content),
        ));
        return Ok(());
    }

    let body = part
        .get_body()
        .map_err(|e| Error::malformed(format!("undecodable {} body: {}", mimetype, e)))?;
    let charset = normalize_charset(&mimetype, &part.ctype.charset);
    texts.push(BodyPart::new(mimetype, charset, body));
    Ok(())
}

/// Filename for parts that should be treated as attachments, `None` for text bodies.
fn attachment_filename(part: &ParsedMail, mimetype: &str, index: usize) -> Option<String> {
    let disposition = part.get_content_disposition();
    let named = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    let is_attachment = disposition.disposition == DispositionType::Attachment
        || named.is_some()
        || !mimetype.starts_with("text/");

    if !is_attachment {
        return None;
    }

    Some(named.unwrap_or_else(|| format!("attachment-{}", index + 1)))
}

/// `us-ascii` is the MIME default; drop it for plain text and upgrade it to
/// UTF-8 for HTML, matching what the flattened-field builders produce.
pub(crate) fn normalize_charset(mimetype: &str, charset: &str) -> Option<String> {
    let charset = charset.trim();
    if charset.is_empty() || charset.eq_ignore_ascii_case("us-ascii") {
        if mimetype == TEXT_HTML {
            return Some("UTF-8".to_string());
        }
        return None;
    }
    Some(charset.to_ascii_uppercase())
}

/// Merge same-type text parts and order them plain, HTML, then the rest.
/// Empty non-plain groups are dropped.
fn condense(texts: Vec<BodyPart>) -> Vec<BodyPart> {
    let mut groups: Vec<BodyPart> = Vec::new();

    for part in texts {
        match groups
            .iter_mut()
            .find(|group| group.content_type == part.content_type)
        {
            Some(group) => {
                group.body.push_str(&part.body);
                if group.charset.is_none() {
                    group.charset = part.charset;
                }
            }
            None => groups.push(part),
        }
    }

    groups.retain(|group| group.content_type == TEXT_PLAIN || !group.body.is_empty());
    groups.sort_by_key(|group| match group.content_type.as_str() {
        TEXT_PLAIN => 0,
        TEXT_HTML => 1,
        _ => 2,
    });
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(raw: &str) -> crate::message::Message {
        parse_raw(Provider::Mailgun, raw.as_bytes()).unwrap().build()
    }

    #[test]
    fn test_parse_simple_plain_email() {
        let message = build(
            "From: a@x.com\r\nTo: b@x.com\r\nSubject: Hello\r\nMessage-Id: <m1@x.com>\r\n\r\nhi",
        );

        assert_eq!(message.header("From"), Some("a@x.com"));
        assert_eq!(message.header("To"), Some("b@x.com"));
        assert_eq!(message.header("Subject"), Some("Hello"));
        assert_eq!(message.body_parts.len(), 1);
        assert_eq!(message.body_parts[0].content_type, "text/plain");
        assert_eq!(message.body_parts[0].charset, None);
        assert_eq!(message.text_body(), "hi");
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_parse_multipart_alternative() {
        let message = build(
            r#"From: a@x.com
Subject: Multipart Test
Content-Type: multipart/alternative; boundary="boundary123"

--boundary123
Content-Type: text/html; charset=utf-8

<html><body>HTML version</body></html>

--boundary123
Content-Type: text/plain

Plain text version

--boundary123--"#,
        );

        assert_eq!(message.body_parts.len(), 2);
        assert_eq!(message.body_parts[0].content_type, "text/plain");
        assert!(message.text_body().contains("Plain text version"));
        assert_eq!(message.body_parts[1].content_type, "text/html");
        assert_eq!(message.body_parts[1].charset.as_deref(), Some("UTF-8"));
        assert!(message.html_body().unwrap().contains("HTML version"));
    }

    #[test]
    fn test_parse_nested_multipart_with_attachment() {
        let message = build(
            r#"From: a@x.com
Content-Type: multipart/mixed; boundary="outer"

--outer
Content-Type: multipart/alternative; boundary="inner"

--inner
Content-Type: text/plain

Plain text

--inner
Content-Type: text/html

<html><body>Nested HTML</body></html>

--inner--

--outer
Content-Type: text/plain; name="notes.txt"
Content-Disposition: attachment; filename="notes.txt"
Content-Transfer-Encoding: base64

aGVsbG8=
--outer--"#,
        );

        assert!(message.text_body().contains("Plain text"));
        assert!(message.html_body().unwrap().contains("Nested HTML"));
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].filename, "notes.txt");
        assert_eq!(message.attachments[0].content_type, "text/plain");
        assert_eq!(message.attachments[0].content, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_condense_merges_same_type_parts() {
        let message = build(
            r#"From: a@x.com
Content-Type: multipart/mixed; boundary="b"

--b
Content-Type: text/plain

first
--b
Content-Type: text/html

--b
Content-Type: text/plain

second
--b--"#,
        );

        let plain: Vec<_> = message
            .body_parts
            .iter()
            .filter(|p| p.content_type == "text/plain")
            .collect();
        assert_eq!(plain.len(), 1);
        assert!(plain[0].body.contains("first"));
        assert!(plain[0].body.contains("second"));
        // the empty HTML part is dropped
        assert!(message.html_body().is_none());
    }

    #[test]
    fn test_html_only_message_gets_empty_text_part() {
        let message = build("From: a@x.com\r\nContent-Type: text/html\r\n\r\n<p>hi</p>");

        assert_eq!(message.body_parts[0].content_type, "text/plain");
        assert_eq!(message.text_body(), "");
        assert_eq!(message.html_body(), Some("<p>hi</p>"));
    }

    #[test]
    fn test_inline_image_becomes_attachment() {
        let message = build(
            r#"From: a@x.com
Content-Type: multipart/related; boundary="r"

--r
Content-Type: text/plain

see image
--r
Content-Type: image/png
Content-Transfer-Encoding: base64

iVBORw0K
--r--"#,
        );

        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].filename, "attachment-1");
        assert_eq!(message.attachments[0].content_type, "image/png");
    }

    #[test]
    fn test_normalize_charset() {
        assert_eq!(normalize_charset("text/plain", "us-ascii"), None);
        assert_eq!(normalize_charset("text/html", "us-ascii"), Some("UTF-8".to_string()));
        assert_eq!(
            normalize_charset("text/plain", "iso-8859-1"),
            Some("ISO-8859-1".to_string())
        );
    }
}
