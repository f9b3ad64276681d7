//! Inbound platform events and messages, delivered by the connector to the router.

/// Author of a message (or the bot's own user on connect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub bot: bool,
}

/// A chat message as received from the platform. Read-only for the render pipeline.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author: Author,
    pub text: String,
}

impl IncomingMessage {
    /// Where a reply to this message goes: same channel, referencing this message.
    pub fn reply_target(&self) -> ReplyTarget {
        ReplyTarget {
            channel_id: self.channel_id.clone(),
            message_id: self.message_id.clone(),
        }
    }
}

/// Channel plus the message a reply is threaded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guild {
    pub id: String,
    pub name: String,
}

/// Everything the connector reports. Routed through `bot::route_event`.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// Session established; carries the bot's own user and the guilds it is in.
    Connected { user: Author, guild_ids: Vec<String> },
    Disconnected { reason: String },
    MessageReceived(IncomingMessage),
    /// The bot was added to a guild it was not in when the session started.
    GuildJoined(Guild),
    /// A platform payload could not be handled.
    Error { event: String, detail: String },
}
