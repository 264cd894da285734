//! Adapter configuration options.
//!
//! Options are a plain string map. Each adapter declares the keys it
//! recognizes; unknown keys are logged and ignored, never rejected.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Error, Result};

/// Configuration handed to the factory.
pub type Options = BTreeMap<String, String>;

/// Key selecting the adapter in [`crate::receiver::from_options`].
pub const PROVIDER: &str = "provider";

/// When `"true"`, requests to an adapter without a configured secret are
/// treated as not authentic instead of authentic.
pub const REQUIRE_AUTHENTICATION: &str = "require_authentication";

/// Keys every adapter recognizes.
pub const BASE_OPTIONS: &[&str] = &[PROVIDER, REQUIRE_AUTHENTICATION];

/// Default SpamAssassin score above which a message counts as spam.
pub const DEFAULT_SPAMASSASSIN_THRESHOLD: f64 = 5.0;

/// Settings shared by every adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseOptions {
    pub require_authentication: bool,
}

impl BaseOptions {
    pub fn from_options(options: &Options) -> Result<Self> {
        Ok(Self {
            require_authentication: flag(options, REQUIRE_AUTHENTICATION)?.unwrap_or(false),
        })
    }

    /// Validity policy used when no secret is configured.
    ///
    /// Permissive unless `require_authentication` is set.
    pub fn default_validity(&self, provider: &str) -> bool {
        if self.require_authentication {
            warn!(provider = provider, "receiver_unauthenticated_request_rejected");
            false
        } else {
            true
        }
    }
}

/// Log options outside the adapter's recognized set.
pub fn warn_unrecognized(provider: &str, options: &Options, recognized: &[&str]) {
    for key in options.keys() {
        if !BASE_OPTIONS.contains(&key.as_str()) && !recognized.contains(&key.as_str()) {
            warn!(provider = provider, option = %key, "receiver_option_unrecognized");
        }
    }
}

/// Non-empty, trimmed string option.
pub fn string(options: &Options, key: &str) -> Option<String> {
    options
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Numeric option; a value that does not parse is an error.
pub fn number<T: std::str::FromStr>(options: &Options, key: &str) -> Result<Option<T>> {
    match string(options, key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| Error::InvalidOption {
            option: key.to_string(),
            reason: format!("`{}` is not a number", raw),
        }),
    }
}

/// Boolean option accepting `true/false`, `yes/no`, `1/0`.
pub fn flag(options: &Options, key: &str) -> Result<Option<bool>> {
    match string(options, key) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(Error::InvalidOption {
                option: key.to_string(),
                reason: format!("`{}` is not a boolean", raw),
            }),
        },
    }
}

/// Payload shape a provider is configured to post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFormat {
    /// Flattened fields, one per header/body/attachment.
    Parsed,
    /// The whole email as a single MIME document.
    Raw,
}

impl PostFormat {
    /// Read `http_post_format`; absent or empty means `Parsed`.
    pub fn from_options(provider: &str, options: &Options) -> Result<Self> {
        match options.get("http_post_format").map(|v| v.trim()) {
            None | Some("") | Some("parsed") => Ok(PostFormat::Parsed),
            Some("raw") => Ok(PostFormat::Raw),
            Some(other) => Err(Error::UnsupportedFormat {
                provider: provider.to_string(),
                format: other.to_string(),
            }),
        }
    }
}
