//! Mailhook - inbound email webhook normalization.
//!
//! Email providers deliver inbound mail to HTTP webhooks, each in its own
//! payload shape. This library verifies those requests and turns them into
//! one canonical [`Message`] model:
//! - `mailhook-web`: web server mounting one webhook route per provider
//! - `mailhook-forward`: CLI that posts a raw email to a receiver, Mailgun-style
//!
//! ## Architecture
//!
//! ```text
//! POST /webhooks/:provider → Params → Receiver::is_valid → Receiver::transform → [Message]
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod params;
pub mod receiver;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use message::{Attachment, BodyPart, HeaderMap, Message};
pub use params::{ParamValue, Params, UploadedFile};
pub use receiver::{create, from_options, Options, Provider, Receiver};
pub use web::AppState;
