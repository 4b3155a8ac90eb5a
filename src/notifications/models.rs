//! Notification channel configuration (§4.4, §6 external interfaces), grounded in the
//! teacher's `notifications::models::ChannelConfig`. Secret fields are stored encrypted at
//! rest (see `encryption`) and only decrypted when a sender is built for an actual send.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Telegram {
        bot_token_encrypted: String,
        chat_id: String,
    },
    Webhook {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Email {
        smtp_host: String,
        smtp_port: u16,
        username: String,
        password_encrypted: String,
        from: String,
        to: Vec<String>,
        #[serde(default = "default_true")]
        use_tls: bool,
    },
    Discord {
        webhook_url_encrypted: String,
    },
    Bark {
        device_key_encrypted: String,
        #[serde(default = "default_bark_server")]
        server_url: String,
    },
    ServerChan {
        send_key_encrypted: String,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_true() -> bool {
    true
}

fn default_bark_server() -> String {
    "https://api.day.app".to_string()
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Email { .. } => "email",
            ChannelConfig::Discord { .. } => "discord",
            ChannelConfig::Bark { .. } => "bark",
            ChannelConfig::ServerChan { .. } => "server_chan",
        }
    }
}
