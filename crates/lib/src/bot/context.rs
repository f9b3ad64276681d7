//! Explicit dependencies for the bot: artifact store, renderer and reply channel.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::dispatch::ResponseDispatcher;
use crate::channels::ChannelHandle;
use crate::config::CommandsConfig;
use crate::render::{ArtifactStore, Renderer};

/// Shared by the router and every render job.
pub struct BotContext {
    pub commands: CommandsConfig,
    pub store: Arc<ArtifactStore>,
    pub renderer: Arc<dyn Renderer>,
    pub dispatcher: ResponseDispatcher,
    /// Keep images on disk after delivery instead of deleting them.
    pub keep_artifacts: bool,
    /// The bot's own user id, known once connected.
    self_id: RwLock<Option<String>>,
}

impl BotContext {
    pub fn new(
        commands: CommandsConfig,
        store: Arc<ArtifactStore>,
        renderer: Arc<dyn Renderer>,
        channel: Arc<dyn ChannelHandle>,
    ) -> Self {
        Self {
            commands,
            store,
            renderer,
            dispatcher: ResponseDispatcher::new(channel),
            keep_artifacts: false,
            self_id: RwLock::new(None),
        }
    }

    pub fn with_keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub async fn set_self_id(&self, id: impl Into<String>) {
        *self.self_id.write().await = Some(id.into());
    }

    /// True if `author_id` is the bot itself.
    pub async fn is_self(&self, author_id: &str) -> bool {
        self.self_id.read().await.as_deref() == Some(author_id)
    }
}
