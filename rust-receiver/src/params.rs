//! Raw webhook parameters.
//!
//! The HTTP layer hands the core a flat mapping from field name to value.
//! Form posts produce text (or repeated text) fields, multipart posts may
//! also carry file uploads, and JSON posts are flattened one level deep.
//! The core only ever reads from this mapping.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, Result};

/// A file received as part of a multipart POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub content: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, content: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            content,
        }
    }
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    /// Repeated form field, in the order received.
    List(Vec<String>),
    File(UploadedFile),
}

impl ParamValue {
    /// Text content of the value; the first entry for repeated fields.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            ParamValue::List(values) => values.first().map(String::as_str),
            ParamValue::File(_) => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<UploadedFile> for ParamValue {
    fn from(value: UploadedFile) -> Self {
        ParamValue::File(value)
    }
}

/// Flat, ordered mapping of webhook fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    fields: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, appending to a list when the name repeats a text field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();

        match (self.fields.remove(&name), value) {
            (Some(ParamValue::Text(first)), ParamValue::Text(next)) => {
                self.fields.insert(name, ParamValue::List(vec![first, next]));
            }
            (Some(ParamValue::List(mut values)), ParamValue::Text(next)) => {
                values.push(next);
                self.fields.insert(name, ParamValue::List(values));
            }
            (_, value) => {
                self.fields.insert(name, value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.fields.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Text value of a field, if present and textual.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(ParamValue::as_text)
    }

    /// Text value of a field, or `MissingField` naming it.
    pub fn require_text(&self, name: &str) -> Result<&str> {
        self.text(name)
            .ok_or_else(|| Error::MissingField(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse an `application/x-www-form-urlencoded` body.
    pub fn from_form(body: &str) -> Self {
        let mut params = Params::new();
        for (name, value) in url::form_urlencoded::parse(body.as_bytes()) {
            params.insert(name.into_owned(), value.into_owned());
        }
        params
    }

    /// Flatten a JSON object body into parameters.
    ///
    /// Strings map to text, arrays of strings to lists, `null` is dropped and
    /// everything else is kept as its JSON encoding.
    pub fn from_json(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| Error::malformed(format!("invalid JSON body: {}", e)))?;

        let object = match value {
            Value::Object(object) => object,
            _ => return Err(Error::malformed("JSON body is not an object")),
        };

        let mut params = Params::new();
        for (name, value) in object {
            match value {
                Value::Null => {}
                Value::String(s) => params.insert(name, s),
                Value::Array(items) if items.iter().all(Value::is_string) && !items.is_empty() => {
                    let values = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect();
                    params.fields.insert(name, ParamValue::List(values));
                }
                other => params.insert(name, other.to_string()),
            }
        }
        Ok(params)
    }

    /// Parse a body as JSON when it looks like an object, as a form otherwise.
    pub fn parse(body: &str) -> Result<Self> {
        if body.trim_start().starts_with('{') {
            Self::from_json(body)
        } else {
            Ok(Self::from_form(body))
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}
