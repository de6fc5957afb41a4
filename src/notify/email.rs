//! Transactional-email client (SendGrid-compatible v3 API).

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::config::EmailConfig;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

const DEFAULT_SUBJECT: &str = "Update on your application";

pub struct EmailClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    from_address: String,
}

impl EmailClient {
    pub fn new(client: reqwest::Client, config: &EmailConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            from_address: config.from_address.clone(),
        }
    }

    /// Send a plain-text message to the given address.
    pub async fn send(&self, to: &str, to_name: &str, body: &str) -> Result<()> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Email API key not configured"))?;

        self.client
            .post(format!("{}/mail/send", self.base_url))
            .bearer_auth(api_key)
            .json(&SendRequest {
                personalizations: vec![Personalization {
                    to: vec![Address {
                        email: to,
                        name: Some(to_name),
                    }],
                }],
                from: Address {
                    email: &self.from_address,
                    name: None,
                },
                subject: DEFAULT_SUBJECT,
                content: vec![Content {
                    kind: "text/plain",
                    value: body,
                }],
            })
            .send()
            .await
            .context("Failed to send email request")?
            .error_for_status()
            .context("Email API returned error status")?;
        Ok(())
    }
}
