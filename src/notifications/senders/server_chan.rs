use async_trait::async_trait;
use reqwest::Client;

use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelConfig;

use super::{decrypt, NotificationSender, SenderError};

pub struct ServerChanSender {
    client: Client,
}

impl ServerChanSender {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl NotificationSender for ServerChanSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        enc: &EncryptionService,
    ) -> Result<(), SenderError> {
        let ChannelConfig::ServerChan { send_key_encrypted } = config else {
            return Err(SenderError::InvalidConfiguration(
                "expected server_chan config".to_string(),
            ));
        };
        let send_key = decrypt(enc, send_key_encrypted)?;

        let url = format!("https://sctapi.ftqq.com/{send_key}.send");
        let response = self
            .client
            .post(&url)
            .form(&[("title", "vstats alert"), ("desp", message)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SenderError::SendFailed(format!(
                "server_chan push returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
