//! Outbound notification channels.
//!
//! Three delivery paths: chat (candidate, preferred), transactional email
//! (candidate, fallback), and mobile push (operators). The engine talks to a
//! [`NotificationSink`]; [`HttpNotifier`] is the production implementation,
//! [`NullNotifier`] drops everything for embedders running without outbound
//! delivery.
//!
//! Delivery failures are non-fatal by contract: the engine logs them and the
//! transition still succeeds.

pub mod chat;
pub mod email;
pub mod push;

use async_trait::async_trait;

use crate::config::NotifyConfig;
use crate::errors::NotifyError;
use crate::identity::OperatorIdentity;
use crate::models::{CandidateContact, MessageChannel};

use chat::ChatClient;
use email::EmailClient;
use push::PushClient;

/// Delivery seam the engine drives.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a message to the candidate over their preferred channel.
    /// Returns the channel actually used, for the durable message log.
    async fn message_candidate(
        &self,
        contact: &CandidateContact,
        body: &str,
    ) -> Result<MessageChannel, NotifyError>;

    /// Deliver a mobile push to an operator.
    async fn push_operator(
        &self,
        operator: &OperatorIdentity,
        title: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

/// HTTP-backed sink: chat when the candidate is reachable there, email
/// otherwise.
pub struct HttpNotifier {
    chat: ChatClient,
    email: EmailClient,
    push: PushClient,
}

impl HttpNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        let client = reqwest::Client::new();
        Self {
            chat: ChatClient::new(client.clone(), &config.chat, config.chat_token()),
            email: EmailClient::new(client.clone(), &config.email, config.email_api_key()),
            push: PushClient::new(client, &config.push, config.push_api_key()),
        }
    }
}

#[async_trait]
impl NotificationSink for HttpNotifier {
    async fn message_candidate(
        &self,
        contact: &CandidateContact,
        body: &str,
    ) -> Result<MessageChannel, NotifyError> {
        if contact.chat_reachable() {
            // chat_reachable guarantees the user id is present
            let user_id = contact.chat_user_id.as_deref().unwrap_or_default();
            self.chat
                .post_message(user_id, body)
                .await
                .map_err(NotifyError::Chat)?;
            return Ok(MessageChannel::Chat);
        }
        match contact.email.as_deref() {
            Some(address) => {
                self.email
                    .send(address, &contact.display_name, body)
                    .await
                    .map_err(NotifyError::Email)?;
                Ok(MessageChannel::Email)
            }
            None => Err(NotifyError::Unreachable {
                candidate_id: contact.candidate_id,
            }),
        }
    }

    async fn push_operator(
        &self,
        operator: &OperatorIdentity,
        title: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let token = match operator.device_token.as_deref() {
            Some(token) => token,
            // No registered device is not a delivery failure.
            None => return Ok(()),
        };
        self.push
            .notify(token, title, body)
            .await
            .map_err(NotifyError::Push)
    }
}

/// Sink that delivers nothing. For embedders running without outbound
/// channels; the engine still writes its durable message log.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn message_candidate(
        &self,
        contact: &CandidateContact,
        _body: &str,
    ) -> Result<MessageChannel, NotifyError> {
        if contact.chat_reachable() {
            Ok(MessageChannel::Chat)
        } else if contact.email.is_some() {
            Ok(MessageChannel::Email)
        } else {
            Err(NotifyError::Unreachable {
                candidate_id: contact.candidate_id,
            })
        }
    }

    async fn push_operator(
        &self,
        _operator: &OperatorIdentity,
        _title: &str,
        _body: &str,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(chat: bool, email: bool) -> CandidateContact {
        CandidateContact {
            candidate_id: 1,
            display_name: "A. Candidate".into(),
            chat_user_id: chat.then(|| "U1".into()),
            chat_active: chat,
            email: email.then(|| "a@example.com".into()),
        }
    }

    #[tokio::test]
    async fn null_notifier_reports_channel_choice() {
        let sink = NullNotifier;
        assert_eq!(
            sink.message_candidate(&contact(true, true), "hi").await.unwrap(),
            MessageChannel::Chat
        );
        assert_eq!(
            sink.message_candidate(&contact(false, true), "hi").await.unwrap(),
            MessageChannel::Email
        );
        assert!(matches!(
            sink.message_candidate(&contact(false, false), "hi").await,
            Err(NotifyError::Unreachable { candidate_id: 1 })
        ));
    }
}
