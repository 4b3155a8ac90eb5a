//! SMTP email delivery. The teacher's notification stack never needed email, so this channel
//! is grounded instead on the pack's idiomatic choice of `lettre` for SMTP delivery; see
//! DESIGN.md for why it was added alongside the teacher's existing crates.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelConfig;

use super::{decrypt, NotificationSender, SenderError};

pub struct EmailSender;

impl EmailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        enc: &EncryptionService,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Email {
            smtp_host,
            smtp_port,
            username,
            password_encrypted,
            from,
            to,
            use_tls,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "expected email config".to_string(),
            ));
        };
        let password = decrypt(enc, password_encrypted)?;

        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e| SenderError::InvalidConfiguration(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder().from(from_mailbox).subject("vstats alert");
        for recipient in to {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| SenderError::InvalidConfiguration(format!("invalid to address: {e}")))?;
            builder = builder.to(mailbox);
        }
        let email = builder
            .body(message.to_string())
            .map_err(|e| SenderError::Email(e.to_string()))?;

        let creds = Credentials::new(username.clone(), password);
        let transport_builder = if *use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .map_err(|e| SenderError::Email(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        };
        let transport = transport_builder
            .port(*smtp_port)
            .credentials(creds)
            .build();

        transport
            .send(email)
            .await
            .map_err(|e| SenderError::Email(e.to_string()))?;
        Ok(())
    }
}
