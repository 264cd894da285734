//! Webhook signature computation and verification.
//!
//! Providers disagree on how they sign webhooks:
//! - Mailgun: hex HMAC-SHA256 of `timestamp + token`, keyed with the API key.
//!   Reference: https://documentation.mailgun.com/docs/mailgun/user-manual/events/webhooks/#securing-webhooks
//! - Mandrill: base64 HMAC-SHA1 of the webhook URL followed by every POST
//!   parameter name and value, sorted by name, keyed with the webhook key.
//!
//! Everything here is a pure function of its inputs, apart from the clock
//! read in [`is_timestamp_fresh`].

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Compute Mailgun's expected signature for a timestamp/token pair.
pub fn mailgun_signature(api_key: &str, timestamp: &str, token: &str) -> Option<String> {
    let mut mac = match HmacSha256::new_from_slice(api_key.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("mailgun_signature_invalid_key");
            return None;
        }
    };

    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());

    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a Mailgun webhook signature with a constant-time comparison.
pub fn verify_mailgun_signature(api_key: &str, timestamp: &str, token: &str, signature: &str) -> bool {
    let expected = match mailgun_signature(api_key, timestamp, token) {
        Some(s) => s,
        None => return false,
    };

    let valid = constant_time_compare(&expected, signature);

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "mailgun_signature_mismatch"
        );
    }

    valid
}

/// Compute Mandrill's expected signature.
///
/// `params` must already be sorted by name and must not include the
/// signature itself.
pub fn mandrill_signature<'a>(
    webhook_key: &str,
    webhook_url: &str,
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Option<String> {
    let mut mac = match HmacSha1::new_from_slice(webhook_key.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("mandrill_signature_invalid_key");
            return None;
        }
    };

    mac.update(webhook_url.as_bytes());
    for (name, value) in params {
        mac.update(name.as_bytes());
        mac.update(value.as_bytes());
    }

    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check that a Unix timestamp lies within `max_age_seconds` of now.
///
/// Used to reject replayed webhooks. Unparseable timestamps are never fresh.
pub fn is_timestamp_fresh(timestamp: &str, max_age_seconds: u64) -> bool {
    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    is_timestamp_fresh_at(timestamp, max_age_seconds, current_time)
}

fn is_timestamp_fresh_at(timestamp: &str, max_age_seconds: u64, current_time: u64) -> bool {
    let webhook_time: u64 = match timestamp.trim().parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(timestamp = %timestamp, "signature_invalid_timestamp");
            return false;
        }
    };

    let age = current_time.abs_diff(webhook_time);

    if age > max_age_seconds {
        warn!(
            webhook_time = webhook_time,
            current_time = current_time,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "signature_timestamp_stale"
        );
        return false;
    }

    true
}

/// Constant-time string comparison to prevent timing attacks.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailgun_signature_matches_hmac_sha256() {
        let mut mac = HmacSha256::new_from_slice(b"key-3ax6xnjp29jd6fds4gc373sgvjxteol0").unwrap();
        mac.update(b"1345567890b5751a49a024483df8833df6f54f5d7adc49e4c1a7f6f4b1");
        let expected = hex::encode(mac.finalize().into_bytes());

        let signature = mailgun_signature(
            "key-3ax6xnjp29jd6fds4gc373sgvjxteol0",
            "1345567890",
            "b5751a49a024483df8833df6f54f5d7adc49e4c1a7f6f4b1",
        )
        .unwrap();

        assert_eq!(signature, expected);
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_mailgun_signature_changes_with_each_input() {
        let base = mailgun_signature("secret", "1000", "nonce").unwrap();

        assert_ne!(base, mailgun_signature("secret", "1001", "nonce").unwrap());
        assert_ne!(base, mailgun_signature("secret", "1000", "noncf").unwrap());
        assert_ne!(base, mailgun_signature("secres", "1000", "nonce").unwrap());
    }

    #[test]
    fn test_verify_mailgun_signature() {
        let signature = mailgun_signature("secret", "1000", "nonce").unwrap();

        assert!(verify_mailgun_signature("secret", "1000", "nonce", &signature));
        assert!(!verify_mailgun_signature("secret", "1000", "nonce", "deadbeef"));
        assert!(!verify_mailgun_signature("other", "1000", "nonce", &signature));
    }

    #[test]
    fn test_mandrill_signature_matches_hmac_sha1() {
        let mut mac = HmacSha1::new_from_slice(b"webhook-key").unwrap();
        mac.update(b"https://example.com/hooks/mandrillmandrill_events[]");
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        let signature = mandrill_signature(
            "webhook-key",
            "https://example.com/hooks/mandrill",
            [("mandrill_events", "[]")],
        )
        .unwrap();

        assert_eq!(signature, expected);
        assert_eq!(signature.len(), 28);
    }

    #[test]
    fn test_timestamp_freshness() {
        assert!(is_timestamp_fresh_at("1000", 300, 1200));
        assert!(is_timestamp_fresh_at("1200", 300, 1000));
        assert!(!is_timestamp_fresh_at("1000", 300, 1301));
        assert!(!is_timestamp_fresh_at("not-a-number", 300, 1000));
    }

    #[test]
    fn test_timestamp_freshness_against_clock() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string();

        assert!(is_timestamp_fresh(&now, 300));
        // Year 2000
        assert!(!is_timestamp_fresh("946684800", 300));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
