//! Mobile push client (OneSignal-compatible REST API) for operator alerts.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::PushConfig;

#[derive(Debug, Serialize)]
struct CreateNotificationRequest<'a> {
    app_id: &'a str,
    include_player_ids: Vec<&'a str>,
    headings: HashMap<&'a str, &'a str>,
    contents: HashMap<&'a str, &'a str>,
}

pub struct PushClient {
    client: reqwest::Client,
    base_url: String,
    app_id: Option<String>,
    api_key: Option<String>,
}

impl PushClient {
    pub fn new(client: reqwest::Client, config: &PushConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            api_key,
        }
    }

    /// Push a notification to a single device.
    pub async fn notify(&self, device_token: &str, title: &str, body: &str) -> Result<()> {
        let app_id = self
            .app_id
            .as_deref()
            .ok_or_else(|| anyhow!("Push app id not configured"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Push API key not configured"))?;

        self.client
            .post(format!("{}/notifications", self.base_url))
            .header("Authorization", format!("Basic {}", api_key))
            .json(&CreateNotificationRequest {
                app_id,
                include_player_ids: vec![device_token],
                headings: HashMap::from([("en", title)]),
                contents: HashMap::from([("en", body)]),
            })
            .send()
            .await
            .context("Failed to send push request")?
            .error_for_status()
            .context("Push API returned error status")?;
        Ok(())
    }
}
