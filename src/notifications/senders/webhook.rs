use async_trait::async_trait;
use reqwest::{header, Client, Method};

use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelConfig;

use super::{NotificationSender, SenderError};

pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        _enc: &EncryptionService,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Webhook { url, method, headers } = config else {
            return Err(SenderError::InvalidConfiguration(
                "expected webhook config".to_string(),
            ));
        };

        let http_method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "GET" => Method::GET,
            "PUT" => Method::PUT,
            other => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "unsupported HTTP method: {other}"
                )))
            }
        };

        let mut request = self.client.request(http_method.clone(), url);

        let mut header_map = header::HeaderMap::new();
        for (key, value) in headers {
            let name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| SenderError::InvalidConfiguration(format!("invalid header name: {e}")))?;
            let val = header::HeaderValue::from_str(value)
                .map_err(|e| SenderError::InvalidConfiguration(format!("invalid header value: {e}")))?;
            header_map.insert(name, val);
        }
        request = request.headers(header_map);

        if http_method == Method::POST || http_method == Method::PUT {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(serde_json::json!({ "message": message }).to_string());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SenderError::SendFailed(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
