use log::warn;
use rusqlite::Connection;
use serde_json::json;
use std::time::Duration;

use crate::db;

/// Outbound transactional email. Implementations are fire-and-forget from the
/// caller's point of view: a failed send is logged, never surfaced.
pub trait Mailer {
    fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()>;
}

/// Provider client for a Resend-style HTTP API: one POST per message with a
/// bearer key. Built from the workspace's `email.provider` settings.
pub struct HttpMailer {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: String, from: String) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from,
        })
    }
}

impl Mailer for HttpMailer {
    fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()?;
        if !resp.status().is_success() {
            anyhow::bail!("email provider returned {}", resp.status());
        }
        Ok(())
    }
}

/// Used when the workspace has no email provider configured. Sends nothing.
pub struct NoopMailer;

impl Mailer for NoopMailer {
    fn send(&self, _to: &str, _subject: &str, _html: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds the mailer for a freshly opened workspace from its stored provider
/// settings. Missing or partial settings fall back to the no-op mailer.
pub fn from_settings(conn: &Connection) -> Box<dyn Mailer> {
    let Ok(Some(cfg)) = db::settings_get_json(conn, "email.provider") else {
        return Box::new(NoopMailer);
    };
    let endpoint = cfg
        .get("endpoint")
        .and_then(|v| v.as_str())
        .unwrap_or("https://api.resend.com/emails")
        .to_string();
    let api_key = cfg.get("apiKey").and_then(|v| v.as_str()).map(str::to_string);
    let from = cfg
        .get("from")
        .and_then(|v| v.as_str())
        .unwrap_or("noreply@classportal.example")
        .to_string();
    match api_key {
        Some(key) if !key.is_empty() => match HttpMailer::new(endpoint, key, from) {
            Ok(m) => Box::new(m),
            Err(e) => {
                warn!("email client init failed, sending disabled: {e}");
                Box::new(NoopMailer)
            }
        },
        _ => Box::new(NoopMailer),
    }
}
