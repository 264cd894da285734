//! Webhook endpoint handlers.
//!
//! One route serves every provider. The handler:
//! 1. Resolves the provider from the path
//! 2. Verifies and transforms the payload with that provider's receiver
//! 3. Answers with a summary of each message
//!
//! Receivers are built once at startup and shared by every request.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::params::Params;
use crate::receiver::{Provider, Receiver};
use crate::web::extract::WebhookParams;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    receivers: Arc<BTreeMap<Provider, Arc<dyn Receiver>>>,
}

impl AppState {
    /// Build a receiver for every configured provider.
    ///
    /// Fails on the first provider whose options are invalid.
    pub fn new(config: Config) -> Result<Self> {
        let mut receivers = BTreeMap::new();
        for provider in config.providers.iter().copied() {
            let receiver = provider.build(&config.receiver_options(provider))?;
            receivers.insert(provider, receiver);
        }

        Ok(Self {
            config: Arc::new(config),
            receivers: Arc::new(receivers),
        })
    }

    pub fn receiver(&self, provider: Provider) -> Option<&Arc<dyn Receiver>> {
        self.receivers.get(&provider)
    }

    /// Providers with a mounted receiver.
    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.receivers.keys().copied()
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Inbound Webhook
// =============================================================================

/// What the service reports about each received message.
#[derive(Debug, Serialize, PartialEq)]
pub struct MessageSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub attachment_count: usize,
    pub spam: bool,
}

impl MessageSummary {
    pub fn new(message: &Message, spam: bool) -> Self {
        let header = |name: &str| message.header(name).map(str::to_string);
        Self {
            message_id: header("Message-ID"),
            from: header("From"),
            to: header("To"),
            subject: header("Subject"),
            attachment_count: message.attachments.len(),
            spam,
        }
    }
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<MessageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookResponse {
    pub fn accepted(messages: Vec<MessageSummary>) -> Self {
        Self {
            status: "accepted",
            messages,
            error: None,
        }
    }

    pub fn rejected(status: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            messages: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// HTTP status and response label for a receiver error.
pub fn error_status(error: &Error) -> (StatusCode, &'static str) {
    match error {
        Error::UnknownProvider(_) => (StatusCode::NOT_FOUND, "unknown_provider"),
        Error::ForgedSource => (StatusCode::UNAUTHORIZED, "unauthorized"),
        Error::MissingField(_) | Error::MalformedPayload(_) => {
            (StatusCode::BAD_REQUEST, "malformed")
        }
        Error::UnsupportedFormat { .. }
        | Error::MissingOption { .. }
        | Error::InvalidOption { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "misconfigured"),
    }
}

fn error_response(error: &Error) -> (StatusCode, Json<WebhookResponse>) {
    let (status, label) = error_status(error);
    (status, Json(WebhookResponse::rejected(label, error.to_string())))
}

/// Verify, transform and classify one payload.
fn summarize(receiver: &dyn Receiver, params: &Params) -> Result<Vec<MessageSummary>> {
    let messages = receiver.process(params)?;
    Ok(messages
        .iter()
        .map(|message| MessageSummary::new(message, receiver.is_spam(message)))
        .collect())
}

/// Inbound webhook endpoint for every provider.
///
/// This endpoint:
/// 1. Looks up the receiver for the path's provider (404 if not mounted)
/// 2. Verifies the request (401 if forged, 400 if signature fields are missing)
/// 3. Transforms the payload and reports each message
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    WebhookParams(params): WebhookParams,
) -> (StatusCode, Json<WebhookResponse>) {
    info!(
        provider = %provider_id,
        field_count = params.len(),
        "webhook_received"
    );

    let provider: Provider = match provider_id.parse() {
        Ok(provider) => provider,
        Err(e) => {
            warn!(provider = %provider_id, "webhook_unknown_provider");
            return error_response(&e);
        }
    };

    let receiver = match state.receiver(provider) {
        Some(receiver) => Arc::clone(receiver),
        None => {
            warn!(provider = provider.as_str(), "webhook_provider_not_mounted");
            return error_response(&Error::UnknownProvider(provider_id));
        }
    };

    // CPU-bound: MIME parsing and attachment decoding run on the blocking pool.
    let processed =
        tokio::task::spawn_blocking(move || summarize(receiver.as_ref(), &params)).await;

    let summaries = match processed {
        Ok(Ok(summaries)) => summaries,
        Ok(Err(e)) => {
            warn!(provider = provider.as_str(), error = %e, "webhook_rejected");
            return error_response(&e);
        }
        Err(e) => {
            error!(provider = provider.as_str(), error = %e, "webhook_processing_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse::rejected("error", "webhook processing failed")),
            );
        }
    };

    info!(
        provider = provider.as_str(),
        message_count = summaries.len(),
        spam_count = summaries.iter().filter(|s| s.spam).count(),
        "webhook_transformed"
    );

    (StatusCode::OK, Json(WebhookResponse::accepted(summaries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::signature::mailgun_signature;
    use std::collections::HashMap;

    fn state(vars: &[(&str, &str)]) -> AppState {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppState::new(Config::from_lookup(|name| vars.get(name).cloned())).unwrap()
    }

    async fn call(state: &AppState, provider: &str, params: Params) -> (StatusCode, WebhookResponse) {
        let (status, Json(body)) = webhook(
            State(state.clone()),
            Path(provider.to_string()),
            WebhookParams(params),
        )
        .await;
        (status, body)
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            error_status(&Error::UnknownProvider("x".to_string())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(error_status(&Error::ForgedSource).0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            error_status(&Error::MissingField("token".to_string())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&Error::MalformedPayload("x".to_string())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&Error::InvalidOption {
                option: "x".to_string(),
                reason: "y".to_string()
            })
            .0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_state_mounts_configured_providers() {
        let state = state(&[("RECEIVER_PROVIDERS", "mailgun,postmark")]);

        assert_eq!(
            state.providers().collect::<Vec<_>>(),
            vec![Provider::Mailgun, Provider::Postmark]
        );
        assert!(state.receiver(Provider::SendGrid).is_none());
    }

    #[test]
    fn test_state_rejects_invalid_options() {
        let vars: HashMap<String, String> =
            [("MANDRILL_WEBHOOK_KEY".to_string(), "key".to_string())].into();

        assert!(AppState::new(Config::from_lookup(|name| vars.get(name).cloned())).is_err());
    }

    #[tokio::test]
    async fn test_webhook_accepts_signed_mailgun_post() {
        let state = state(&[("MAILGUN_API_KEY", "secret")]);
        let signature = mailgun_signature("secret", "1700000000", "nonce").unwrap();
        let params: Params = [
            ("timestamp", "1700000000"),
            ("token", "nonce"),
            ("signature", signature.as_str()),
            (
                "message-headers",
                r#"[["From","a@x.com"],["To","b@x.com"],["Subject","Hi"],["Message-Id","<m1@x.com>"]]"#,
            ),
            ("body-plain", "hello"),
        ]
        .into_iter()
        .collect();

        let (status, body) = call(&state, "mailgun", params).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "accepted");
        assert_eq!(
            body.messages,
            vec![MessageSummary {
                message_id: Some("<m1@x.com>".to_string()),
                from: Some("a@x.com".to_string()),
                to: Some("b@x.com".to_string()),
                subject: Some("Hi".to_string()),
                attachment_count: 0,
                spam: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_webhook_rejects_forged_mailgun_post() {
        let state = state(&[("MAILGUN_API_KEY", "secret")]);
        let params: Params = [
            ("timestamp", "1700000000"),
            ("token", "nonce"),
            ("signature", "0000"),
        ]
        .into_iter()
        .collect();

        let (status, body) = call(&state, "mailgun", params).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.messages.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_missing_signature_field_is_bad_request() {
        let state = state(&[("MAILGUN_API_KEY", "secret")]);
        let params: Params = [("timestamp", "1700000000"), ("token", "nonce")]
            .into_iter()
            .collect();

        let (status, body) = call(&state, "mailgun", params).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.unwrap().contains("signature"));
    }

    #[tokio::test]
    async fn test_webhook_unknown_and_unmounted_providers() {
        let state = state(&[("RECEIVER_PROVIDERS", "postmark")]);

        let (status, _) = call(&state, "sparkpost", Params::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&state, "mailgun", Params::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_webhook_oversized_attachment_count_is_bad_request() {
        let state = state(&[]);
        let params: Params = [
            ("body-plain", "hi"),
            ("attachment-count", "18446744073709551615"),
        ]
        .into_iter()
        .collect();

        let (status, body) = call(&state, "mailgun", params).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.status, "malformed");
    }

    #[tokio::test]
    async fn test_webhook_reports_spam() {
        let state = state(&[]);
        let params = Params::from_json(
            r#"{"From":"a@x.com","TextBody":"buy","Headers":[{"Name":"X-Spam-Status","Value":"Yes"}]}"#,
        )
        .unwrap();

        let (status, body) = call(&state, "postmark", params).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.messages[0].spam);
    }
}
