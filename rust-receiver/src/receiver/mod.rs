//! Inbound webhook receivers.
//!
//! One adapter per provider implements [`Receiver`]: it decides whether a
//! raw parameter mapping is authentic, turns it into canonical messages and
//! classifies spam.
//!
//! ## Flow
//!
//! ```text
//! create(provider, options) → is_valid(params) → transform(params) → [Message] → is_spam(message)
//! ```
//!
//! Adapters hold only their configuration and are shared as
//! `Arc<dyn Receiver>` across concurrent requests.

pub mod base;
pub mod mailgun;
pub mod mandrill;
pub mod mime;
pub mod options;
pub mod postmark;
pub mod sendgrid;
pub mod signature;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::params::Params;

pub use mailgun::Mailgun;
pub use mandrill::Mandrill;
pub use options::{BaseOptions, Options, PostFormat};
pub use postmark::Postmark;
pub use sendgrid::SendGrid;

/// The capability set every provider adapter implements.
pub trait Receiver: fmt::Debug + Send + Sync {
    fn provider(&self) -> Provider;

    /// Option keys this adapter reads, besides the shared base options.
    fn recognized_options(&self) -> &'static [&'static str];

    fn base_options(&self) -> &BaseOptions;

    /// Whether the request is authentic.
    ///
    /// Returns `Ok(false)` for a signature mismatch and
    /// `Err(Error::MissingField)` when a signature input is absent. The
    /// default applies to providers without an in-payload mechanism and
    /// to adapters with no secret configured: permissive unless
    /// `require_authentication` is set.
    fn is_valid(&self, _params: &Params) -> Result<bool> {
        Ok(self.base_options().default_validity(self.provider().as_str()))
    }

    /// Normalize the payload into zero or more messages.
    fn transform(&self, params: &Params) -> Result<Vec<Message>>;

    /// Whether the provider flagged the message as spam. Absent signals are `false`.
    fn is_spam(&self, message: &Message) -> bool;

    /// Verify and transform in one step.
    fn process(&self, params: &Params) -> Result<Vec<Message>> {
        if !self.is_valid(params)? {
            warn!(provider = self.provider().as_str(), "receiver_forged_source");
            return Err(Error::ForgedSource);
        }

        let messages = self.transform(params)?;

        info!(
            provider = self.provider().as_str(),
            message_count = messages.len(),
            "receiver_process_complete"
        );

        Ok(messages)
    }
}

/// Every provider with a receiver adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mailgun,
    Mandrill,
    Postmark,
    SendGrid,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Mailgun,
        Provider::Mandrill,
        Provider::Postmark,
        Provider::SendGrid,
    ];

    /// Canonical lower-case identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Mailgun => "mailgun",
            Provider::Mandrill => "mandrill",
            Provider::Postmark => "postmark",
            Provider::SendGrid => "sendgrid",
        }
    }

    /// Human-readable name used in error messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Mailgun => "Mailgun",
            Provider::Mandrill => "Mandrill",
            Provider::Postmark => "Postmark",
            Provider::SendGrid => "SendGrid",
        }
    }

    /// Construct this provider's adapter.
    pub fn build(self, options: &Options) -> Result<Arc<dyn Receiver>> {
        let receiver: Arc<dyn Receiver> = match self {
            Provider::Mailgun => Arc::new(Mailgun::new(options)?),
            Provider::Mandrill => Arc::new(Mandrill::new(options)?),
            Provider::Postmark => Arc::new(Postmark::new(options)?),
            Provider::SendGrid => Arc::new(SendGrid::new(options)?),
        };

        options::warn_unrecognized(self.as_str(), options, receiver.recognized_options());

        info!(
            provider = self.as_str(),
            require_authentication = receiver.base_options().require_authentication,
            "receiver_created"
        );

        Ok(receiver)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a provider identifier: symbol-like prefixes, case, `_` and `-` are ignored.
fn normalize_provider_id(id: &str) -> String {
    id.trim()
        .trim_start_matches(':')
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(id: &str) -> Result<Self> {
        let normalized = normalize_provider_id(id);
        Provider::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .ok_or_else(|| Error::UnknownProvider(id.to_string()))
    }
}

/// Create an adapter for `provider_id` configured with `options`.
pub fn create(provider_id: &str, options: &Options) -> Result<Arc<dyn Receiver>> {
    let provider: Provider = provider_id.parse().map_err(|e| {
        warn!(provider = %provider_id, "receiver_unknown_provider");
        e
    })?;

    let mut options = options.clone();
    options.remove(options::PROVIDER);

    provider.build(&options)
}

/// Create an adapter from options carrying a `provider` key.
///
/// The caller's map is left untouched.
pub fn from_options(options: &Options) -> Result<Arc<dyn Receiver>> {
    let provider_id = options
        .get(options::PROVIDER)
        .ok_or_else(|| Error::MissingOption {
            provider: "receiver".to_string(),
            option: options::PROVIDER.to_string(),
        })?;

    create(provider_id, options)
}
