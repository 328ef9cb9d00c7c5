use async_trait::async_trait;
use tracing::debug;

use super::ChatGateway;
use crate::error::GatewayError;

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Posts channel messages through the platform REST API. Attempt-level
/// timeouts are owned by callers, so the client itself carries none.
pub struct RestGateway {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl RestGateway {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl ChatGateway for RestGateway {
    async fn send_channel_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }

        debug!(channel_id, "channel message sent");
        Ok(())
    }
}
