//! Request body extraction.
//!
//! Providers post form-encoded, multipart or JSON bodies. [`WebhookParams`]
//! turns any of them into [`Params`], keeping multipart file parts as
//! uploads. Mandrill signs with a request header, which is copied into the
//! parameters so the receiver sees everything it verifies in one place.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    Json,
};
use tracing::warn;

use crate::params::{Params, UploadedFile};
use crate::receiver::mandrill::SIGNATURE_FIELD;
use crate::web::handlers::WebhookResponse;

/// Webhook parameters parsed from the request body.
#[derive(Debug)]
pub struct WebhookParams(pub Params);

type Rejection = (StatusCode, Json<WebhookResponse>);

fn bad_request(error: impl Into<String>) -> Rejection {
    let error = error.into();
    warn!(error = %error, "webhook_body_rejected");
    (
        StatusCode::BAD_REQUEST,
        Json(WebhookResponse::rejected("malformed", error)),
    )
}

#[async_trait]
impl<S> FromRequest<S> for WebhookParams
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let signature = req
            .headers()
            .get(SIGNATURE_FIELD)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut params = if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            read_multipart(multipart).await?
        } else {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            let body = std::str::from_utf8(&body)
                .map_err(|e| bad_request(format!("body is not UTF-8: {}", e)))?;

            if content_type.starts_with("application/json") {
                Params::from_json(body).map_err(|e| bad_request(e.to_string()))?
            } else {
                Params::from_form(body)
            }
        };

        if let Some(signature) = signature {
            if !params.contains_key(SIGNATURE_FIELD) {
                params.insert(SIGNATURE_FIELD, signature);
            }
        }

        Ok(WebhookParams(params))
    }
}

/// Collect every multipart field; parts with a filename become uploads.
async fn read_multipart(mut multipart: Multipart) -> Result<Params, Rejection> {
    let mut params = Params::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let content = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;

        match filename {
            Some(filename) => {
                params.insert(name, UploadedFile::new(filename, content_type, content));
            }
            None => {
                params.insert(name, String::from_utf8_lossy(&content).into_owned());
            }
        }
    }

    Ok(params)
}
