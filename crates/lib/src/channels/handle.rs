//! Send capability for a connected channel.

use async_trait::async_trait;

use super::inbound::ReplyTarget;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("channel api error: {0}")]
    Api(String),
}

/// Handle to a running channel (stop, send replies).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "discord").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a text message as a reply to `target`.
    async fn send_message(&self, target: &ReplyTarget, text: &str) -> Result<(), ChannelError>;
    /// Send a file attachment as a reply to `target`.
    async fn send_file(
        &self,
        target: &ReplyTarget,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ChannelError>;
}
