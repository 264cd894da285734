//! Helpers shared by the provider adapters.

use mailparse::parse_headers;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::message::{Attachment, HeaderMap};
use crate::params::{ParamValue, Params, UploadedFile};

/// Merge header pairs that may repeat names into an order-preserving multimap.
pub fn multimap<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().collect()
}

fn header_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(header_values).collect(),
        other => vec![other.to_string()],
    }
}

/// Flatten a JSON header block into `(name, value)` pairs.
///
/// Accepted shapes:
/// - `[["Name", "value"], ...]` (Mailgun)
/// - `[{"Name": "...", "Value": "..."}, ...]` (Postmark)
/// - `{"Name": "value" | ["v1", "v2"]}` (Mandrill)
pub fn header_pairs_from_json(value: &Value) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();

    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Array(pair) if pair.len() >= 2 => {
                        let name = pair[0]
                            .as_str()
                            .ok_or_else(|| Error::malformed("header name is not a string"))?;
                        for value in header_values(&pair[1]) {
                            pairs.push((name.to_string(), value));
                        }
                    }
                    Value::Object(entry) => {
                        let name = entry
                            .get("Name")
                            .or_else(|| entry.get("name"))
                            .and_then(Value::as_str)
                            .ok_or_else(|| Error::malformed("header entry has no name"))?;
                        let value = entry.get("Value").or_else(|| entry.get("value"));
                        for value in value.map(header_values).unwrap_or_default() {
                            pairs.push((name.to_string(), value));
                        }
                    }
                    other => {
                        return Err(Error::malformed(format!(
                            "unexpected header entry: {}",
                            other
                        )))
                    }
                }
            }
        }
        Value::Object(map) => {
            for (name, value) in map {
                for value in header_values(value) {
                    pairs.push((name.clone(), value));
                }
            }
        }
        other => {
            return Err(Error::malformed(format!(
                "unexpected header block: {}",
                other
            )))
        }
    }

    Ok(pairs)
}

/// Parse a JSON-encoded header block field into a multimap.
///
/// An absent or empty field yields no headers; invalid JSON is malformed.
pub fn headers_from_json_field(params: &Params, field: &str) -> Result<HeaderMap> {
    let raw = match non_empty_text(params, field) {
        Some(raw) => raw,
        None => return Ok(HeaderMap::new()),
    };

    let value: Value = serde_json::from_str(raw).map_err(|e| {
        warn!(
            field = field,
            error = %e,
            headers_preview = preview(raw, 200),
            "receiver_headers_parse_failed"
        );
        Error::malformed(format!("`{}` is not valid JSON: {}", field, e))
    })?;

    Ok(multimap(header_pairs_from_json(&value)?))
}

/// At most `max_chars` leading characters of `raw`, cut on a char boundary.
fn preview(raw: &str, max_chars: usize) -> &str {
    raw.char_indices()
        .nth(max_chars)
        .map_or(raw, |(index, _)| &raw[..index])
}

/// Parse an RFC 5322 header block (as SendGrid posts it) into a multimap.
pub fn headers_from_raw_block(raw: &str) -> Result<HeaderMap> {
    let (headers, _) = parse_headers(raw.as_bytes())
        .map_err(|e| Error::malformed(format!("invalid header block: {}", e)))?;

    Ok(multimap(
        headers.iter().map(|header| (header.get_key(), header.get_value())),
    ))
}

/// Text field value, treating empty strings as absent.
pub fn non_empty_text<'a>(params: &'a Params, field: &str) -> Option<&'a str> {
    params.text(field).filter(|value| !value.is_empty())
}

/// Assemble an attachment from an uploaded file.
pub fn attachment_from_upload(file: &UploadedFile) -> Attachment {
    Attachment::new(
        file.filename.clone(),
        file.content_type.as_deref(),
        None,
        file.content.clone(),
    )
}

/// Assemble an attachment from a form field.
///
/// File uploads keep their metadata; a text field is taken as the content
/// of a file named after the field.
pub fn attachment_from_param(field: &str, value: &ParamValue) -> Attachment {
    match value {
        ParamValue::File(file) => attachment_from_upload(file),
        other => {
            let text = other.as_text().unwrap_or_default();
            Attachment::new(field, None, None, text.to_string().into_bytes().into())
        }
    }
}

/// Read `count_field` and collect the attachments it declares, in index order.
///
/// Slots above the declared count are ignored. A declared slot that is
/// missing, a count that is not a number, or a count larger than the number
/// of fields posted makes the payload malformed.
pub fn indexed_attachments(
    params: &Params,
    count_field: &str,
    slot_name: impl Fn(usize) -> String,
) -> Result<Vec<(String, Attachment)>> {
    let count = match non_empty_text(params, count_field) {
        Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
            Error::malformed(format!("`{}` is not a number: {}", count_field, raw))
        })?,
        None => 0,
    };

    if count > params.len() {
        warn!(
            field = count_field,
            declared_count = count,
            field_count = params.len(),
            "receiver_attachment_count_exceeds_fields"
        );
        return Err(Error::malformed(format!(
            "`{}` declares {} attachments but only {} fields were posted",
            count_field,
            count,
            params.len()
        )));
    }

    let mut attachments = Vec::new();
    for index in 1..=count {
        let field = slot_name(index);
        let value = params.get(&field).ok_or_else(|| {
            warn!(
                field = %field,
                declared_count = count,
                "receiver_attachment_missing"
            );
            Error::malformed(format!(
                "`{}` declares {} attachments but `{}` is missing",
                count_field, count, field
            ))
        })?;
        attachments.push((field.clone(), attachment_from_param(&field, value)));
    }

    if count > 0 {
        info!(count = count, "receiver_attachments_collected");
    }

    Ok(attachments)
}
