//! Case-insensitive, order-preserving header multimap.

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

/// Email headers keyed by case-insensitive name.
///
/// Names keep the spelling they were first seen with and the order they were
/// first inserted in. Repeated names (e.g. `Received`) keep every value in
/// arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<HeaderEntry>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Append a value, keeping any values already stored under the name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.entries[index].values.push(value),
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value],
            }),
        }
    }

    /// Replace every value stored under the name with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.entries[index].values = vec![value],
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value],
            }),
        }
    }

    /// First value stored under the name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|index| self.entries[index].values.first())
            .map(String::as_str)
    }

    /// Every value stored under the name, in arrival order.
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(index) => &self.entries[index].values,
            None => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Header names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// `(name, value)` pairs, one per stored value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|entry| {
            entry
                .values
                .iter()
                .map(move |value| (entry.name.as_str(), value.as_str()))
        })
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

// Serialized as `[[name, value], ...]`, the same shape Mailgun posts.
impl Serialize for HeaderMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&str, &str)> = self.iter().collect();
        let mut seq = serializer.serialize_seq(Some(pairs.len()))?;
        for pair in pairs {
            seq.serialize_element(&pair)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.append("Message-Id", "<abc@example.com>");

        assert_eq!(headers.get("message-id"), Some("<abc@example.com>"));
        assert_eq!(headers.get("MESSAGE-ID"), Some("<abc@example.com>"));
        assert!(headers.contains("Message-ID"));
        assert!(headers.get("Subject").is_none());
    }

    #[test]
    fn test_duplicates_are_kept_in_order() {
        let headers: HeaderMap = [
            ("Received", "by a"),
            ("Subject", "Hi"),
            ("received", "by b"),
        ]
        .into_iter()
        .collect();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_all("Received"), ["by a", "by b"]);
        assert_eq!(headers.names().collect::<Vec<_>>(), ["Received", "Subject"]);
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut headers: HeaderMap = [("To", "a@x.com"), ("To", "b@x.com")].into_iter().collect();
        headers.set("to", "c@x.com");

        assert_eq!(headers.get_all("To"), ["c@x.com"]);
    }

    #[test]
    fn test_serializes_as_pairs() {
        let headers: HeaderMap = [("From", "a@x.com"), ("Received", "1"), ("Received", "2")]
            .into_iter()
            .collect();

        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"[["From","a@x.com"],["Received","1"],["Received","2"]]"#);
    }
}
