//! Top-level notification facade the alert engine talks to: resolves channel ids from
//! config, renders the configured template, and dispatches through the matching sender.
//! Grounded in the teacher's `notifications::service::NotificationService`.

use std::collections::HashMap;

use tracing::warn;

use crate::config::ConfigHandle;

use super::encryption::EncryptionService;
use super::senders::{create_notifier, SenderError};
use super::templates::{render, TemplateError};

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("sender error: {0}")]
    Sender(#[from] SenderError),
}

pub struct NotificationService {
    config: ConfigHandle,
    encryption: EncryptionService,
}

impl NotificationService {
    pub fn new(config: ConfigHandle, encryption_passphrase: &str) -> Self {
        Self {
            config,
            encryption: EncryptionService::new(encryption_passphrase),
        }
    }

    /// Renders the template for `template_key` and sends it to every channel in
    /// `channel_ids` that is enabled, collecting (not failing fast on) per-channel errors so
    /// one broken channel never blocks the rest.
    pub async fn notify_alert(
        &self,
        channel_ids: &[String],
        template_key: &str,
        vars: HashMap<String, String>,
    ) -> Result<(), NotificationError> {
        let config = self.config.read().await;
        let body = render(&config.alert_templates.bodies, template_key, &vars)?;

        let mut last_error = None;
        let mut any_attempted = false;
        for channel_id in channel_ids {
            let Some(channel) = config.find_channel(channel_id) else {
                continue;
            };
            if !channel.enabled {
                continue;
            }
            any_attempted = true;
            let sender = create_notifier(&channel.config);
            if let Err(e) = sender.send(&channel.config, &body, &self.encryption).await {
                warn!(channel_id, error = %e, "notification channel send failed");
                last_error = Some(e);
            }
        }

        if !any_attempted {
            return Ok(());
        }
        match last_error {
            Some(e) => Err(NotificationError::Sender(e)),
            None => Ok(()),
        }
    }
}
