//! Per-message control flow: trigger check, extraction, render, reply.

use std::path::{Path, PathBuf};

use super::command::{parse_command, Command};
use super::context::BotContext;
use super::dispatch::Reply;
use crate::channels::IncomingMessage;
use crate::render::{extract_code_block, RenderError};

/// Shown to the user for any failure that is not their fault.
pub const SYSTEM_FAULT_NOTICE: &str = "something went wrong while rendering. check the bot logs for details.";

/// A validated request: non-empty source plus the message it answers.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub source: &'a str,
    pub origin: &'a IncomingMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One render: request, reserved output path and status. Owned by a single task.
#[derive(Debug)]
pub struct RenderJob<'a> {
    request: RenderRequest<'a>,
    target: PathBuf,
    status: JobStatus,
}

impl<'a> RenderJob<'a> {
    pub fn new(request: RenderRequest<'a>, target: PathBuf) -> Self {
        Self {
            request,
            target,
            status: JobStatus::Pending,
        }
    }

    pub fn request(&self) -> &RenderRequest<'a> {
        &self.request
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    fn set_status(&mut self, status: JobStatus) {
        log::debug!(
            "render job for message {}: {:?} -> {:?}",
            self.request.origin.message_id,
            self.status,
            status
        );
        self.status = status;
    }
}

/// What happened to one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Sent by the bot itself.
    IgnoredSelf,
    /// No known command at the start of the message.
    NotACommand,
    /// Render command without a complete code block; nothing is sent.
    NoMatch,
    VersionSent,
    /// Image delivered; carries the path that was reserved for it.
    Rendered(PathBuf),
    /// The typesetter rejected the source; a short notice was sent.
    ContentRejected,
    /// Toolchain or filesystem failure; a generic notice was sent.
    SystemFault,
}

/// Handle one incoming message end to end. Never fails: every error is reported to the
/// channel and/or the log here.
pub async fn handle_message(ctx: &BotContext, msg: &IncomingMessage) -> JobOutcome {
    if ctx.is_self(&msg.author.id).await {
        return JobOutcome::IgnoredSelf;
    }
    let Some(command) = parse_command(&msg.text, &ctx.commands) else {
        return JobOutcome::NotACommand;
    };
    match command {
        Command::Version => {
            let text = format!("texbot v{}", env!("CARGO_PKG_VERSION"));
            ctx.dispatcher
                .deliver(&msg.reply_target(), Reply::Notice(text))
                .await;
            JobOutcome::VersionSent
        }
        Command::Render(args) => {
            if msg.author.bot {
                log::debug!(
                    "message {}: render requested by bot user {} ({})",
                    msg.message_id,
                    msg.author.name,
                    msg.author.id
                );
            }
            match extract_code_block(args) {
                Some(source) => run_render(ctx, RenderRequest { source, origin: msg }).await,
                None => {
                    log::debug!("message {}: render command without code block", msg.message_id);
                    JobOutcome::NoMatch
                }
            }
        }
    }
}

async fn run_render(ctx: &BotContext, request: RenderRequest<'_>) -> JobOutcome {
    let origin = request.origin;
    let reply_to = origin.reply_target();
    let target = match ctx.store.reserve().await {
        Ok(path) => path,
        Err(e) => {
            log::error!(
                "render job for message {} in channel {}: {}",
                origin.message_id,
                origin.channel_id,
                e
            );
            ctx.dispatcher
                .deliver(&reply_to, Reply::Notice(SYSTEM_FAULT_NOTICE.to_string()))
                .await;
            return JobOutcome::SystemFault;
        }
    };

    let mut job = RenderJob::new(request, target);
    job.set_status(JobStatus::Running);
    let result = ctx
        .renderer
        .render(job.request().source, job.target())
        .await;
    match result {
        Ok(artifact) => {
            job.set_status(JobStatus::Succeeded);
            ctx.dispatcher
                .deliver(&reply_to, Reply::Artifact(artifact))
                .await;
            if ctx.keep_artifacts {
                ctx.store.retain(job.target());
            } else {
                ctx.store.release(job.target()).await;
            }
            JobOutcome::Rendered(job.target().to_path_buf())
        }
        Err(RenderError::Content(detail)) => {
            job.set_status(JobStatus::Failed);
            ctx.store.release(job.target()).await;
            ctx.dispatcher
                .deliver(
                    &reply_to,
                    Reply::Notice(format!("could not typeset that: {}", detail)),
                )
                .await;
            JobOutcome::ContentRejected
        }
        Err(e @ RenderError::System(_)) => {
            job.set_status(JobStatus::Failed);
            log::error!(
                "render job for message {} in channel {} (author {}): {}",
                origin.message_id,
                origin.channel_id,
                origin.author.id,
                e
            );
            ctx.store.release(job.target()).await;
            ctx.dispatcher
                .deliver(&reply_to, Reply::Notice(SYSTEM_FAULT_NOTICE.to_string()))
                .await;
            JobOutcome::SystemFault
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Author;

    fn message() -> IncomingMessage {
        IncomingMessage {
            message_id: "1".to_string(),
            channel_id: "2".to_string(),
            guild_id: None,
            author: Author {
                id: "3".to_string(),
                name: "ada".to_string(),
                bot: false,
            },
            text: "tex!c ```x```".to_string(),
        }
    }

    #[test]
    fn job_starts_pending_and_tracks_status() {
        let msg = message();
        let mut job = RenderJob::new(
            RenderRequest {
                source: "x",
                origin: &msg,
            },
            PathBuf::from("/tmp/a.png"),
        );
        assert_eq!(job.status(), JobStatus::Pending);
        job.set_status(JobStatus::Running);
        job.set_status(JobStatus::Succeeded);
        assert_eq!(job.status(), JobStatus::Succeeded);
        assert_eq!(job.target(), Path::new("/tmp/a.png"));
        assert_eq!(job.request().source, "x");
    }
}
