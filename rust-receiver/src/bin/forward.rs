//! Mailhook Forward - post a raw email to a webhook receiver.
//!
//! Reads an RFC 5322 message from a file (or stdin) and posts it the way a
//! Mailgun `mime` route does: the message in `body-mime`, signed with
//! `timestamp`, `token` and `signature` when a secret is given. Pipe it from
//! an MTA alias to feed local mail into a receiver.

use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mailhook::receiver::signature::mailgun_signature;

/// Forward a raw email to a Mailgun-compatible webhook.
#[derive(Parser)]
#[command(name = "mailhook-forward", version, about)]
struct Cli {
    /// Webhook URL to post to.
    #[arg(long)]
    url: String,

    /// Signing key; requests are unsigned without it.
    #[arg(long, env = "MAILHOOK_FORWARD_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// File holding the raw message; stdin when omitted.
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let raw = match &cli.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read message from stdin")?;
            raw
        }
    };

    let mut form = vec![("body-mime".to_string(), raw)];
    if let Some(secret) = &cli.secret {
        form.extend(sign(secret)?);
    }

    info!(url = %cli.url, signed = cli.secret.is_some(), "forward_posting");

    let response = reqwest::Client::new()
        .post(&cli.url)
        .form(&form)
        .send()
        .await
        .with_context(|| format!("Failed to post to {}", cli.url))?;

    let status = response.status();
    if !status.is_success() {
        let mut report = format!("{:?} {}", response.version(), status);
        for (name, value) in response.headers() {
            report.push_str(&format!("\n{}: {}", name, value.to_str().unwrap_or("<binary>")));
        }
        bail!(report);
    }

    let body = response.text().await.context("Failed to read response body")?;
    info!(status = status.as_u16(), "forward_complete");
    println!("{}", body);

    Ok(())
}

/// Mailgun-style signature fields for the current time and a fresh token.
fn sign(secret: &str) -> Result<Vec<(String, String)>> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the Unix epoch")?
        .as_secs()
        .to_string();

    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(50)
        .map(char::from)
        .collect();

    let signature = mailgun_signature(secret, &timestamp, &token)
        .context("Failed to compute request signature")?;

    Ok(vec![
        ("timestamp".to_string(), timestamp),
        ("token".to_string(), token),
        ("signature".to_string(), signature),
    ])
}
