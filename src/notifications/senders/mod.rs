//! Notification senders (§4.4, §6): one implementation per channel kind behind a uniform
//! trait, grounded in the teacher's `notifications::senders` module.

mod bark;
mod discord;
mod email;
mod server_chan;
mod telegram;
mod webhook;

use async_trait::async_trait;
use thiserror::Error;

use super::encryption::{EncryptionError, EncryptionService};
use super::models::ChannelConfig;

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("decryption error: {0}")]
    Decryption(#[from] EncryptionError),
    #[error("email send failed: {0}")]
    Email(String),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        enc: &EncryptionService,
    ) -> Result<(), SenderError>;
}

/// Dispatches to the sender implementation matching the channel's kind, grounded in the
/// teacher's per-channel-type sender registration (the teacher wires this in its HTTP layer;
/// here it's a plain match since there's no REST surface to register against).
pub fn create_notifier(config: &ChannelConfig) -> Box<dyn NotificationSender> {
    match config {
        ChannelConfig::Telegram { .. } => Box::new(telegram::TelegramSender::new()),
        ChannelConfig::Webhook { .. } => Box::new(webhook::WebhookSender::new()),
        ChannelConfig::Email { .. } => Box::new(email::EmailSender::new()),
        ChannelConfig::Discord { .. } => Box::new(discord::DiscordSender::new()),
        ChannelConfig::Bark { .. } => Box::new(bark::BarkSender::new()),
        ChannelConfig::ServerChan { .. } => Box::new(server_chan::ServerChanSender::new()),
    }
}

pub(super) fn decrypt(enc: &EncryptionService, ciphertext: &str) -> Result<String, SenderError> {
    Ok(enc.decrypt(ciphertext)?)
}
