//! Telegram Bot API adapter
//!
//! Thin JSON-over-HTTPS client for the handful of Bot API methods the engine
//! needs. The API answers with an `{ ok, result, description }` envelope even
//! on rejection, so the envelope is decoded before the HTTP status is judged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::sanitize_for_logging;
use crate::platform::{AdapterError, EnforcementAdapter, MemberStatus};

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API base URL
    pub api_base: String,
    /// Bot token - MUST come from environment
    pub bot_token: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            timeout_secs: 15,
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_base", &self.api_base)
            .field("bot_token", &sanitize_for_logging(&self.bot_token))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

/// Enforcement adapter backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramAdapter {
    client: Client,
    config: TelegramConfig,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("chat-warden/0.1")
            .https_only(config.api_base.starts_with("https://"))
            .build()
            .map_err(|e| AdapterError::transport("client", e.to_string()))?;

        info!(
            api_base = %config.api_base,
            token = %sanitize_for_logging(&config.bot_token),
            "Telegram adapter initialized"
        );

        Ok(Self { client, config })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, AdapterError> {
        debug!(method = %method, "Calling Bot API");

        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::transport(method, e.without_url().to_string()))?;

        let status = response.status();
        let envelope: ApiEnvelope<T> = response.json().await.map_err(|e| {
            AdapterError::transport(
                method,
                format!("HTTP {} with undecodable body: {}", status.as_u16(), e.without_url()),
            )
        })?;

        if !envelope.ok {
            let description = envelope
                .description
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            warn!(method = %method, description = %description, "Bot API rejected call");
            return Err(AdapterError::rejected(method, description));
        }

        envelope
            .result
            .ok_or_else(|| AdapterError::transport(method, "response carried no result"))
    }

    async fn restrict(
        &self,
        subject_id: i64,
        chat_id: i64,
        can_send: bool,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        let mut body = json!({
            "chat_id": chat_id,
            "user_id": subject_id,
            "permissions": {
                "can_send_messages": can_send,
                "can_send_audios": can_send,
                "can_send_documents": can_send,
                "can_send_photos": can_send,
                "can_send_videos": can_send,
                "can_send_video_notes": can_send,
                "can_send_voice_notes": can_send,
                "can_send_polls": can_send,
                "can_send_other_messages": can_send,
                "can_add_web_page_previews": can_send,
            },
        });
        if let Some(until) = until {
            body["until_date"] = json!(until.timestamp());
        }
        self.call::<bool>("restrictChatMember", body).await.map(|_| ())
    }
}

#[async_trait]
impl EnforcementAdapter for TelegramAdapter {
    async fn ban(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        let mut body = json!({
            "chat_id": chat_id,
            "user_id": subject_id,
            "revoke_messages": true,
        });
        if let Some(until) = until {
            body["until_date"] = json!(until.timestamp());
        }
        self.call::<bool>("banChatMember", body).await.map(|_| ())
    }

    async fn unban(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError> {
        let body = json!({
            "chat_id": chat_id,
            "user_id": subject_id,
            "only_if_banned": true,
        });
        self.call::<bool>("unbanChatMember", body).await.map(|_| ())
    }

    async fn mute(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        self.restrict(subject_id, chat_id, false, until).await
    }

    async fn unmute(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError> {
        self.restrict(subject_id, chat_id, true, None).await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), AdapterError> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        self.call::<bool>("deleteMessage", body).await.map(|_| ())
    }

    async fn get_member_status(
        &self,
        chat_id: i64,
        subject_id: i64,
    ) -> Result<MemberStatus, AdapterError> {
        let body = json!({ "chat_id": chat_id, "user_id": subject_id });
        let member: ChatMember = self.call("getChatMember", body).await?;
        Ok(MemberStatus::from_platform(&member.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url_trims_trailing_slash() {
        let adapter = TelegramAdapter::new(TelegramConfig {
            api_base: "https://api.telegram.org/".to_string(),
            bot_token: "123:abc".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(
            adapter.method_url("getChatMember"),
            "https://api.telegram.org/bot123:abc/getChatMember"
        );
    }

    #[test]
    fn test_debug_masks_token() {
        let config = TelegramConfig {
            bot_token: "123456789:AAH-secret-token-value".to_string(),
            ..TelegramConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn test_envelope_decodes_rejection() {
        let envelope: ApiEnvelope<bool> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: user not found"}"#,
        )
        .unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.result, None);
        assert_eq!(
            envelope.description.as_deref(),
            Some("Bad Request: user not found")
        );
    }
}
