use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelConfig;

use super::{decrypt, NotificationSender, SenderError};

pub struct TelegramSender {
    client: Client,
}

impl TelegramSender {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    /// Escapes text for Telegram MarkdownV2: `_ * [ ] ( ) ~ \` > # + - = | { } . !`
    fn escape_markdown_v2(text: &str) -> String {
        let mut escaped = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(
                c,
                '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                    | '{' | '}' | '.' | '!'
            ) {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        enc: &EncryptionService,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Telegram { bot_token_encrypted, chat_id } = config else {
            return Err(SenderError::InvalidConfiguration(
                "expected telegram config".to_string(),
            ));
        };
        let bot_token = decrypt(enc, bot_token_encrypted)?;

        let api_url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
        let payload = TelegramMessage {
            chat_id,
            text: &Self::escape_markdown_v2(message),
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SenderError::SendFailed(format!("telegram API error: {body}")));
        }
        Ok(())
    }
}
