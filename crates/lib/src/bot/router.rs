//! Single entry point for platform events.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::context::BotContext;
use super::scheduler;
use crate::channels::PlatformEvent;

/// Route one event. Connection and guild events are logged (and the bot's own id recorded);
/// each message is handled on its own task, whose handle is returned.
pub async fn route_event(ctx: &Arc<BotContext>, event: PlatformEvent) -> Option<JoinHandle<()>> {
    match event {
        PlatformEvent::Connected { user, guild_ids } => {
            ctx.set_self_id(user.id.clone()).await;
            log::info!(
                "{} v{} has successfully connected to Discord",
                user.name,
                env!("CARGO_PKG_VERSION")
            );
            log::info!("current guilds: {}", guild_ids.len());
            for id in &guild_ids {
                log::info!("  {}", id);
            }
            None
        }
        PlatformEvent::Disconnected { reason } => {
            log::warn!("lost connection to Discord: {}", reason);
            None
        }
        PlatformEvent::GuildJoined(guild) => {
            log::info!("joined new guild: {} ({})", guild.name, guild.id);
            None
        }
        PlatformEvent::Error { event, detail } => {
            log::error!("unhandled {} event: {}", event, detail);
            None
        }
        PlatformEvent::MessageReceived(msg) => {
            let ctx = Arc::clone(ctx);
            Some(tokio::spawn(async move {
                let handled = AssertUnwindSafe(scheduler::handle_message(&ctx, &msg))
                    .catch_unwind()
                    .await;
                match handled {
                    Ok(outcome) => {
                        log::debug!("message {}: {:?}", msg.message_id, outcome)
                    }
                    Err(panic) => log::error!(
                        "unhandled message {} in channel {}: handler panicked: {}",
                        msg.message_id,
                        msg.channel_id,
                        panic_message(panic.as_ref())
                    ),
                }
            }))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
