use async_trait::async_trait;
use reqwest::Client;

use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelConfig;

use super::{decrypt, NotificationSender, SenderError};

pub struct BarkSender {
    client: Client,
}

impl BarkSender {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl NotificationSender for BarkSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        enc: &EncryptionService,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Bark { device_key_encrypted, server_url } = config else {
            return Err(SenderError::InvalidConfiguration(
                "expected bark config".to_string(),
            ));
        };
        let device_key = decrypt(enc, device_key_encrypted)?;

        let url = format!(
            "{}/{}/{}",
            server_url.trim_end_matches('/'),
            device_key,
            urlencoding_fallback(message)
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SenderError::SendFailed(format!(
                "bark push returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Bark expects path-segment-safe text; percent-encode space and the handful of characters
/// that would otherwise split the URL path.
fn urlencoding_fallback(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
