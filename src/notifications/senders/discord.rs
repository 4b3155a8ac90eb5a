use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelConfig;

use super::{decrypt, NotificationSender, SenderError};

pub struct DiscordSender {
    client: Client,
}

impl DiscordSender {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl NotificationSender for DiscordSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        enc: &EncryptionService,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Discord { webhook_url_encrypted } = config else {
            return Err(SenderError::InvalidConfiguration(
                "expected discord config".to_string(),
            ));
        };
        let url = decrypt(enc, webhook_url_encrypted)?;

        let response = self
            .client
            .post(&url)
            .json(&json!({ "content": message }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SenderError::SendFailed(format!(
                "discord webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
