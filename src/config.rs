//! Configuration for the outbound notification channels.
//!
//! Read from a TOML file, with secrets overridable via environment variables
//! (file → environment). The engine itself needs no configuration; only the
//! HTTP notifier does.
//!
//! # Configuration File Format
//!
//! ```toml
//! [chat]
//! base_url = "https://chat.example.com/api"
//! bot_token = "xoxb-..."
//!
//! [email]
//! base_url = "https://mail.example.com/v3"
//! api_key = "SG...."
//! from_address = "pipeline@example.com"
//!
//! [push]
//! base_url = "https://push.example.com/api"
//! app_id = "app-1234"
//! api_key = "os-...."
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level notifier configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub push: PushConfig,
}

/// Chat-platform (bot API) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    /// Bot token; `PIPELINE_CHAT_TOKEN` overrides the file value.
    #[serde(default)]
    pub bot_token: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            bot_token: None,
        }
    }
}

/// Transactional-email provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_base_url")]
    pub base_url: String,
    /// API key; `PIPELINE_EMAIL_API_KEY` overrides the file value.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            base_url: default_email_base_url(),
            api_key: None,
            from_address: default_from_address(),
        }
    }
}

/// Mobile-push provider settings for operator notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub app_id: Option<String>,
    /// API key; `PIPELINE_PUSH_API_KEY` overrides the file value.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            base_url: default_push_base_url(),
            app_id: None,
            api_key: None,
        }
    }
}

fn default_chat_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_email_base_url() -> String {
    "https://api.sendgrid.com/v3".to_string()
}

fn default_from_address() -> String {
    "no-reply@localhost".to_string()
}

fn default_push_base_url() -> String {
    "https://onesignal.com/api/v1".to_string()
}

impl NotifyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse notifier config")
    }

    /// Load from the given path, falling back to defaults if the file does
    /// not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Chat bot token, with environment-variable fallback.
    pub fn chat_token(&self) -> Option<String> {
        std::env::var("PIPELINE_CHAT_TOKEN")
            .ok()
            .or_else(|| self.chat.bot_token.clone())
    }

    /// Email API key, with environment-variable fallback.
    pub fn email_api_key(&self) -> Option<String> {
        std::env::var("PIPELINE_EMAIL_API_KEY")
            .ok()
            .or_else(|| self.email.api_key.clone())
    }

    /// Push API key, with environment-variable fallback.
    pub fn push_api_key(&self) -> Option<String> {
        std::env::var("PIPELINE_PUSH_API_KEY")
            .ok()
            .or_else(|| self.push.api_key.clone())
    }
}
