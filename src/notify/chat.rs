//! Chat-platform bot client (Slack-compatible web API).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
}

/// Subset of the postMessage response we care about.
#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    bot_token: Option<String>,
}

impl ChatClient {
    pub fn new(client: reqwest::Client, config: &ChatConfig, bot_token: Option<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    /// Post a direct message to the given platform user.
    pub async fn post_message(&self, user_id: &str, text: &str) -> Result<()> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or_else(|| anyhow!("Chat bot token not configured"))?;

        let resp = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(token)
            .json(&PostMessageRequest {
                channel: user_id,
                text,
            })
            .send()
            .await
            .context("Failed to send chat message request")?
            .error_for_status()
            .context("Chat API returned error status")?;

        let body = resp
            .json::<PostMessageResponse>()
            .await
            .context("Failed to parse chat API response")?;
        if !body.ok {
            anyhow::bail!(
                "Chat API rejected message: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }
}
