//! Chat platform boundary (Discord).
//!
//! The connector turns gateway traffic into `PlatformEvent`s for the router and exposes
//! a `ChannelHandle` so replies can be sent back to the originating channel.

mod discord;
mod handle;
mod inbound;

pub use discord::{identify_payload, reply_payload, DiscordChannel};
pub use handle::{ChannelError, ChannelHandle};
pub use inbound::{Author, Guild, IncomingMessage, PlatformEvent, ReplyTarget};
