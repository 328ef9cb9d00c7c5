mod rest;

pub use rest::RestGateway;

use async_trait::async_trait;

use crate::error::GatewayError;

/// The single outbound operation the core needs from the chat platform.
/// The socket event loop and the rest of the client live outside this crate.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_channel_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<(), GatewayError>;
}
