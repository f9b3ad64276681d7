//! Reply delivery: one outbound call per job, threaded to the trigger.

use std::sync::Arc;

use crate::channels::{ChannelHandle, ReplyTarget};
use crate::render::Artifact;

/// What a job sends back: the rendered image or a short notice.
#[derive(Debug, Clone)]
pub enum Reply {
    Artifact(Artifact),
    Notice(String),
}

#[derive(Clone)]
pub struct ResponseDispatcher {
    channel: Arc<dyn ChannelHandle>,
}

impl ResponseDispatcher {
    pub fn new(channel: Arc<dyn ChannelHandle>) -> Self {
        Self { channel }
    }

    /// Send `reply` to the target's channel as a reply to its message. Failures are logged, not retried.
    pub async fn deliver(&self, target: &ReplyTarget, reply: Reply) {
        let (kind, result) = match reply {
            Reply::Artifact(artifact) => {
                let name = artifact.file_name();
                ("file", self.channel.send_file(target, &name, artifact.bytes).await)
            }
            Reply::Notice(text) => ("message", self.channel.send_message(target, &text).await),
        };
        match result {
            Ok(()) => log::debug!(
                "{}: sent {} reply to message {} in channel {}",
                self.channel.id(),
                kind,
                target.message_id,
                target.channel_id
            ),
            Err(e) => log::error!(
                "{}: sending {} reply to message {} in channel {} failed: {}",
                self.channel.id(),
                kind,
                target.message_id,
                target.channel_id,
                e
            ),
        }
    }
}
