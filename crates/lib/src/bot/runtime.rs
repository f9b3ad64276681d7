//! Process-level bot loop: wire the context, start the connector, route events until shutdown.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::context::BotContext;
use super::router::route_event;
use crate::channels::{ChannelHandle, DiscordChannel, PlatformEvent};
use crate::config::{self, Config};
use crate::render::{ArtifactStore, LatexRenderer, Renderer};

/// Run the bot until Ctrl+C / SIGTERM or until the connector goes away.
/// `config_path` is used to resolve a relative render directory. Fails when the gateway
/// rejects the bot (bad token, missing intents).
pub async fn run_bot(config: Config, config_path: PathBuf) -> Result<()> {
    let token = config::resolve_discord_token(&config).context(
        "no bot token configured (set DISCORD_TOKEN or discord.botToken in the config file)",
    )?;

    let work_dir = config::resolve_work_dir(&config, &config_path);
    let store = Arc::new(ArtifactStore::new(work_dir));
    store
        .ensure_dir()
        .await
        .context("preparing render directory")?;
    log::info!("rendering into {}", store.dir().display());

    let renderer: Arc<dyn Renderer> = Arc::new(LatexRenderer::from_config(&config.render));
    let discord = Arc::new(DiscordChannel::new(token, &config.discord));
    let ctx = Arc::new(
        BotContext::new(
            config.commands.clone(),
            store,
            renderer,
            discord.clone(),
        )
        .with_keep_artifacts(config.render.keep_artifacts),
    );

    let (event_tx, mut event_rx) = mpsc::channel::<PlatformEvent>(64);
    let connector = discord.clone().start(event_tx);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let stream_closed = loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => {
                    route_event(&ctx, event).await;
                }
                None => {
                    log::warn!("discord event stream closed");
                    break true;
                }
            },
            _ = &mut shutdown => {
                log::info!("shutdown signal received, stopping");
                break false;
            }
        }
    };

    discord.stop();
    if stream_closed {
        // The connector dropped its sender, so it has finished or is about to.
        match connector.await {
            Ok(Err(e)) => anyhow::bail!("discord connector stopped: {}", e),
            Ok(Ok(())) => {}
            Err(e) => log::error!("discord connector task failed: {}", e),
        }
    } else {
        connector.abort();
        let _ = connector.await;
    }
    log::info!("texbot stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
