//! Discord channel: gateway WebSocket for inbound events, REST API for replies.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::handle::{ChannelError, ChannelHandle};
use super::inbound::{Author, Guild, IncomingMessage, PlatformEvent, ReplyTarget};
use crate::config::DiscordConfig;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Close codes after which reconnecting cannot succeed: authentication failed (4004),
/// invalid shard (4010), sharding required (4011), invalid API version (4012),
/// invalid intents (4013), disallowed intents (4014).
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// Why a gateway session failed.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
enum GatewayError {
    /// Network trouble or a protocol hiccup; reconnect after a delay.
    #[error("{0}")]
    Transient(String),
    /// The gateway refused the bot for good (bad token, intents).
    #[error("{0}")]
    Fatal(String),
}

impl From<String> for GatewayError {
    fn from(msg: String) -> Self {
        GatewayError::Transient(msg)
    }
}

impl From<&str> for GatewayError {
    fn from(msg: &str) -> Self {
        GatewayError::Transient(msg.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    bot: bool,
}

impl From<DiscordUser> for Author {
    fn from(u: DiscordUser) -> Self {
        Author {
            id: u.id,
            name: u.username,
            bot: u.bot,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UnavailableGuild {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ReadyEvent {
    user: DiscordUser,
    #[serde(default)]
    guilds: Vec<UnavailableGuild>,
}

#[derive(Debug, Deserialize)]
struct GuildCreateEvent {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessageCreateEvent {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: DiscordUser,
    #[serde(default)]
    content: String,
}

impl From<MessageCreateEvent> for IncomingMessage {
    fn from(m: MessageCreateEvent) -> Self {
        IncomingMessage {
            message_id: m.id,
            channel_id: m.channel_id,
            guild_id: m.guild_id,
            author: m.author.into(),
            text: m.content,
        }
    }
}

/// Discord connector: keeps a gateway session alive and sends replies via the REST API.
pub struct DiscordChannel {
    id: String,
    token: String,
    api_base: String,
    gateway_url: String,
    activity: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(token: String, config: &DiscordConfig) -> Self {
        Self {
            id: "discord".to_string(),
            token,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            gateway_url: config.gateway_url.clone(),
            activity: config.activity.clone(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the gateway loop and forward events to the router. Returns a handle to await on
    /// shutdown. The task ends with an error when the gateway rejects the bot for good; the
    /// event sender is dropped then, so the receiver sees the stream close.
    pub fn start(
        self: Arc<Self>,
        events: mpsc::Sender<PlatformEvent>,
    ) -> JoinHandle<Result<(), String>> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("discord channel: starting gateway loop");
        tokio::spawn(run_gateway_loop(self, events))
    }

    /// One gateway session: hello, identify, then heartbeat and dispatch until the socket
    /// closes or the gateway asks us to reconnect. Ok carries the reason the session ended.
    async fn run_session(
        &self,
        events: &mpsc::Sender<PlatformEvent>,
        known_guilds: &mut HashSet<String>,
    ) -> Result<String, GatewayError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.gateway_url.as_str())
            .await
            .map_err(|e| format!("gateway connect failed: {}", e))?;
        let (mut sink, mut stream) = ws.split();

        let hello = loop {
            let frame = stream
                .next()
                .await
                .ok_or("gateway closed before hello")?
                .map_err(|e| e.to_string())?;
            let Message::Text(text) = frame else { continue };
            let payload: GatewayPayload = serde_json::from_str(&text).map_err(|e| e.to_string())?;
            if payload.op == OP_HELLO {
                break serde_json::from_value::<Hello>(payload.d).map_err(|e| e.to_string())?;
            }
        };
        log::debug!("discord gateway hello, heartbeat every {}ms", hello.heartbeat_interval);

        sink.send(Message::Text(
            identify_payload(&self.token, &self.activity).to_string(),
        ))
        .await
        .map_err(|e| format!("identify failed: {}", e))?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(hello.heartbeat_interval));
        heartbeat.tick().await;
        let mut seq: Option<u64> = None;
        let mut acked = true;

        while self.running() {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if !acked {
                        return Err("heartbeat not acknowledged".into());
                    }
                    acked = false;
                    sink.send(Message::Text(heartbeat_payload(seq).to_string()))
                        .await
                        .map_err(|e| format!("heartbeat failed: {}", e))?;
                }
                frame = stream.next() => {
                    let Some(frame) = frame else {
                        return Ok("gateway stream ended".to_string());
                    };
                    let frame = frame.map_err(|e| e.to_string())?;
                    let text = match frame {
                        Message::Text(text) => text,
                        Message::Close(close) => {
                            return match close {
                                Some(c) => close_outcome(u16::from(c.code), &c.reason),
                                None => Ok("closed by gateway".to_string()),
                            };
                        }
                        _ => continue,
                    };
                    let payload: GatewayPayload = match serde_json::from_str(&text) {
                        Ok(p) => p,
                        Err(e) => {
                            log::debug!("discord: undecodable gateway frame: {}", e);
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        seq = payload.s;
                    }
                    match payload.op {
                        OP_DISPATCH => {
                            let event = payload.t.as_deref().unwrap_or_default();
                            if let Some(ev) = decode_dispatch(event, payload.d, known_guilds) {
                                if events.send(ev).await.is_err() {
                                    self.stop();
                                    return Ok("event receiver closed".to_string());
                                }
                            }
                        }
                        OP_HEARTBEAT => {
                            sink.send(Message::Text(heartbeat_payload(seq).to_string()))
                                .await
                                .map_err(|e| format!("heartbeat failed: {}", e))?;
                        }
                        OP_HEARTBEAT_ACK => acked = true,
                        OP_RECONNECT => return Ok("gateway requested reconnect".to_string()),
                        OP_INVALID_SESSION => return Ok("session invalidated".to_string()),
                        _ => {}
                    }
                }
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        Ok("stopped".to_string())
    }

    /// POST /channels/{id}/messages with a JSON body.
    pub async fn send_message(&self, target: &ReplyTarget, text: &str) -> Result<(), ChannelError> {
        let url = format!("{}/channels/{}/messages", self.api_base, target.channel_id);
        let body = reply_payload(Some(text), target, None);
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .json(&body)
            .send()
            .await?;
        check_response(res, "send message").await
    }

    /// POST /channels/{id}/messages as multipart with `payload_json` and `files[0]`.
    pub async fn send_file(
        &self,
        target: &ReplyTarget,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ChannelError> {
        let url = format!("{}/channels/{}/messages", self.api_base, target.channel_id);
        let payload = reply_payload(None, target, Some(file_name));
        let form = Form::new().text("payload_json", payload.to_string()).part(
            "files[0]",
            Part::bytes(bytes)
                .file_name(file_name.to_string())
                .mime_str("image/png")?,
        );
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .multipart(form)
            .send()
            .await?;
        check_response(res, "send file").await
    }
}

async fn check_response(res: reqwest::Response, what: &str) -> Result<(), ChannelError> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(ChannelError::Api(format!("{} failed: {} {}", what, status, body)));
    }
    Ok(())
}

/// Session end for a close frame: fatal codes stop the connector, others reconnect.
fn close_outcome(code: u16, reason: &str) -> Result<String, GatewayError> {
    if FATAL_CLOSE_CODES.contains(&code) {
        Err(GatewayError::Fatal(format!(
            "gateway rejected the bot: {} {}",
            code, reason
        )))
    } else {
        Ok(format!("closed by gateway: {} {}", code, reason))
    }
}

async fn run_gateway_loop(
    channel: Arc<DiscordChannel>,
    events: mpsc::Sender<PlatformEvent>,
) -> Result<(), String> {
    let mut known_guilds = HashSet::new();
    while channel.running() {
        let reason = match channel.run_session(&events, &mut known_guilds).await {
            Ok(reason) => reason,
            Err(GatewayError::Transient(e)) => e,
            Err(GatewayError::Fatal(e)) => {
                log::error!("discord: {}, not reconnecting", e);
                channel.stop();
                let _ = events
                    .send(PlatformEvent::Disconnected { reason: e.clone() })
                    .await;
                return Err(e);
            }
        };
        if events
            .send(PlatformEvent::Disconnected { reason })
            .await
            .is_err()
        {
            log::debug!("discord: event channel closed, stopping loop");
            return Ok(());
        }
        if !channel.running() {
            break;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
    log::info!("discord channel: gateway loop stopped");
    Ok(())
}

/// Map a dispatch (op 0) payload to a platform event. Guilds listed in READY are remembered so
/// their GUILD_CREATE is not reported as a join. Unknown events yield None.
fn decode_dispatch(
    event: &str,
    d: serde_json::Value,
    known_guilds: &mut HashSet<String>,
) -> Option<PlatformEvent> {
    match event {
        "READY" => match serde_json::from_value::<ReadyEvent>(d) {
            Ok(ready) => {
                let guild_ids: Vec<String> = ready.guilds.into_iter().map(|g| g.id).collect();
                known_guilds.extend(guild_ids.iter().cloned());
                Some(PlatformEvent::Connected {
                    user: ready.user.into(),
                    guild_ids,
                })
            }
            Err(e) => Some(decode_error(event, e)),
        },
        "GUILD_CREATE" => match serde_json::from_value::<GuildCreateEvent>(d) {
            Ok(g) => {
                if known_guilds.insert(g.id.clone()) {
                    Some(PlatformEvent::GuildJoined(Guild {
                        id: g.id,
                        name: g.name,
                    }))
                } else {
                    log::info!("guild available: {} ({})", g.name, g.id);
                    None
                }
            }
            Err(e) => Some(decode_error(event, e)),
        },
        "GUILD_DELETE" => {
            if let Some(id) = d.get("id").and_then(|v| v.as_str()) {
                known_guilds.remove(id);
            }
            None
        }
        "MESSAGE_CREATE" => match serde_json::from_value::<MessageCreateEvent>(d) {
            Ok(m) => Some(PlatformEvent::MessageReceived(m.into())),
            Err(e) => Some(decode_error(event, e)),
        },
        _ => None,
    }
}

fn decode_error(event: &str, e: serde_json::Error) -> PlatformEvent {
    PlatformEvent::Error {
        event: event.to_string(),
        detail: e.to_string(),
    }
}

fn heartbeat_payload(seq: Option<u64>) -> serde_json::Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

/// Identify (op 2) frame: token, intents and the bot's presence.
pub fn identify_payload(token: &str, activity: &str) -> serde_json::Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "texbot",
                "device": "texbot"
            },
            "presence": {
                "since": null,
                "activities": [{ "name": activity, "type": 0 }],
                "status": "online",
                "afk": false
            }
        }
    })
}

/// Message body for a reply: optional text, a reference to the triggering message, no pings.
/// With `attachment`, the body describes `files[0]` of a multipart upload.
pub fn reply_payload(
    content: Option<&str>,
    target: &ReplyTarget,
    attachment: Option<&str>,
) -> serde_json::Value {
    let mut body = json!({
        "message_reference": {
            "message_id": target.message_id,
            "channel_id": target.channel_id,
            "fail_if_not_exists": false
        },
        "allowed_mentions": { "parse": [], "replied_user": false }
    });
    if let Some(text) = content {
        body["content"] = serde_json::Value::String(text.to_string());
    }
    if let Some(name) = attachment {
        body["attachments"] = json!([{ "id": 0, "filename": name }]);
    }
    body
}

#[async_trait]
impl ChannelHandle for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, target: &ReplyTarget, text: &str) -> Result<(), ChannelError> {
        DiscordChannel::send_message(self, target, text).await
    }

    async fn send_file(
        &self,
        target: &ReplyTarget,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ChannelError> {
        DiscordChannel::send_file(self, target, file_name, bytes).await
    }
}
