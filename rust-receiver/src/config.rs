//! Configuration module for environment variable parsing.
//!
//! Every setting is read from the environment and mapped onto the per-provider
//! [`Options`] the receivers are built from.
//!
//! ## Security
//!
//! A receiver with no signing secret accepts every request unless
//! `REQUIRE_AUTHENTICATION=true`. Postmark and SendGrid never sign their
//! payloads, so enabling it rejects all of their traffic; put those routes
//! behind a secret URL or basic auth instead.

use std::env;
use tracing::warn;

use crate::receiver::{options, Options, Provider};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Providers to mount webhook routes for (`RECEIVER_PROVIDERS`, default all)
    pub providers: Vec<Provider>,

    /// Reject unsigned requests instead of accepting them
    pub require_authentication: bool,

    /// Mailgun signing key for HMAC signature verification
    pub mailgun_api_key: Option<String>,

    /// `parsed` or `raw` (routes whose URL ends in `mime`)
    pub mailgun_http_post_format: Option<String>,

    /// Maximum age in seconds for Mailgun webhook timestamps
    pub mailgun_signature_max_age: Option<u64>,

    /// Mandrill webhook key for HMAC signature verification
    pub mandrill_webhook_key: Option<String>,

    /// URL the Mandrill webhook is registered at
    pub mandrill_webhook_url: Option<String>,

    /// `parsed` or `raw` (Inbound Parse "send raw")
    pub sendgrid_http_post_format: Option<String>,

    /// Spam score above which Mandrill and SendGrid messages are spam
    pub spamassassin_threshold: Option<f64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Config {
            port: parse_or(&var, "PORT", 8080),

            providers: var("RECEIVER_PROVIDERS")
                .map(|raw| parse_providers(&raw))
                .unwrap_or_else(|| Provider::ALL.to_vec()),

            require_authentication: parse_or(&var, "REQUIRE_AUTHENTICATION", false),

            mailgun_api_key: var("MAILGUN_API_KEY"),

            mailgun_http_post_format: var("MAILGUN_HTTP_POST_FORMAT"),

            mailgun_signature_max_age: parse_optional(&var, "MAILGUN_SIGNATURE_MAX_AGE"),

            mandrill_webhook_key: var("MANDRILL_WEBHOOK_KEY"),

            mandrill_webhook_url: var("MANDRILL_WEBHOOK_URL"),

            sendgrid_http_post_format: var("SENDGRID_HTTP_POST_FORMAT"),

            spamassassin_threshold: parse_optional(&var, "SPAMASSASSIN_THRESHOLD"),
        }
    }

    /// Receiver options for one provider.
    pub fn receiver_options(&self, provider: Provider) -> Options {
        let mut opts = Options::new();
        opts.insert(
            options::REQUIRE_AUTHENTICATION.to_string(),
            self.require_authentication.to_string(),
        );

        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                opts.insert(key.to_string(), value);
            }
        };

        let threshold = self.spamassassin_threshold.map(|t| t.to_string());

        match provider {
            Provider::Mailgun => {
                put("mailgun_api_key", self.mailgun_api_key.clone());
                put("http_post_format", self.mailgun_http_post_format.clone());
                put(
                    "mailgun_signature_max_age",
                    self.mailgun_signature_max_age.map(|age| age.to_string()),
                );
            }
            Provider::Mandrill => {
                put("mandrill_webhook_key", self.mandrill_webhook_key.clone());
                put("mandrill_webhook_url", self.mandrill_webhook_url.clone());
                put("spamassassin_threshold", threshold);
            }
            Provider::Postmark => {}
            Provider::SendGrid => {
                put("http_post_format", self.sendgrid_http_post_format.clone());
                put("spamassassin_threshold", threshold);
            }
        }

        opts
    }
}

/// Parse a value, falling back to `default` when absent or invalid.
fn parse_or<T: std::str::FromStr>(var: impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    parse_optional(var, name).unwrap_or(default)
}

/// Parse an optional value; an invalid value is logged and ignored.
fn parse_optional<T: std::str::FromStr>(var: impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// Parse a comma-separated provider list, skipping unknown names.
fn parse_providers(raw: &str) -> Vec<Provider> {
    let mut providers = Vec::new();
    for id in parse_csv(raw) {
        match id.parse::<Provider>() {
            Ok(provider) if !providers.contains(&provider) => providers.push(provider),
            Ok(_) => {}
            Err(_) => warn!(provider = %id, "Unknown provider in RECEIVER_PROVIDERS, skipping"),
        }
    }
    providers
}

/// Parse a comma-separated list of strings.
fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
