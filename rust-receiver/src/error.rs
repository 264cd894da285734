//! Error types for the receiver core.
//!
//! Errors fall into three groups:
//! - configuration errors (unknown provider, unsupported format, bad options),
//!   raised when an adapter is built and never worth retrying
//! - malformed payloads (missing signature inputs, broken attachment slots),
//!   which callers must be able to tell apart from a forged request
//! - `ForgedSource`, returned only by `Receiver::process`
//!
//! A signature mismatch is not an error: `Receiver::is_valid` returns `Ok(false)`.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// No adapter is registered under this identifier.
    #[error("unrecognized provider: {0}")]
    UnknownProvider(String),

    /// The configured payload format selector is not supported by the provider.
    #[error("can't handle {provider} {format} HTTP POST format")]
    UnsupportedFormat { provider: String, format: String },

    /// A provider-mandated option is absent.
    #[error("{provider} requires the `{option}` option")]
    MissingOption { provider: String, option: String },

    /// An option is present but its value cannot be used.
    #[error("invalid value for `{option}`: {reason}")]
    InvalidOption { option: String, reason: String },

    /// A field the signature or the transform depends on is absent.
    #[error("missing required field `{0}`")]
    MissingField(String),

    /// The payload is present but structurally inconsistent.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The request failed authenticity verification.
    #[error("request signature did not verify")]
    ForgedSource,
}

impl Error {
    /// Whether this error comes from receiver configuration rather than request data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownProvider(_)
                | Error::UnsupportedFormat { .. }
                | Error::MissingOption { .. }
                | Error::InvalidOption { .. }
        )
    }

    /// Whether this error describes a truncated or inconsistent payload.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MissingField(_) | Error::MalformedPayload(_))
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedPayload(reason.into())
    }
}
