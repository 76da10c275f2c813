//! # Bot Module
//!
//! Discord glue for Open Music Bot.
//!
//! This module contains:
//! - Text command parsing ([`commands`])
//! - Command execution against the room registry ([`dispatcher`])
//! - Worker notifications sent back to chat ([`events`])
//! - The Serenity [`EventHandler`] that ties them together ([`OpenMusicBot`])

use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod dispatcher;
pub mod events;

use crate::audio::{songbird_transport::SongbirdTransport, RoomEvent, RoomId};
use commands::{Command, ParseError};
use dispatcher::{CommandContext, CommandDispatcher};

/// Main Discord bot handler for Open Music Bot.
///
/// Reads prefixed text commands from guild messages, runs them through the
/// [`CommandDispatcher`] and answers in the same channel. Worker
/// notifications ("now playing", failures) go to the last channel each guild
/// was commanded from.
pub struct OpenMusicBot {
    dispatcher: Arc<CommandDispatcher<SongbirdTransport>>,
    /// Último canal de texto usado por sala
    text_channels: Arc<DashMap<RoomId, ChannelId>>,
    /// Se consume una sola vez, en el primer `ready`
    room_events: Mutex<Option<mpsc::UnboundedReceiver<RoomEvent>>>,
}

impl OpenMusicBot {
    pub fn new(
        dispatcher: Arc<CommandDispatcher<SongbirdTransport>>,
        room_events: mpsc::UnboundedReceiver<RoomEvent>,
    ) -> Self {
        Self {
            dispatcher,
            text_channels: Arc::new(DashMap::new()),
            room_events: Mutex::new(Some(room_events)),
        }
    }
}

#[async_trait]
impl EventHandler for OpenMusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        let events = self.room_events.lock().take();
        if let Some(events) = events {
            tokio::spawn(events::forward_room_events(
                ctx.http.clone(),
                self.text_channels.clone(),
                events,
            ));
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let command = match Command::parse(self.dispatcher.prefix(), &msg.content) {
            Ok(command) => command,
            Err(ParseError::NotACommand) => return,
            Err(e) => {
                reply(&ctx, msg.channel_id, e.to_string()).await;
                return;
            }
        };

        info!(
            "📝 Comando {}{} usado por {} en guild {}",
            self.dispatcher.prefix(),
            command.name(),
            msg.author.name,
            guild_id
        );

        let room = RoomId::from(guild_id);
        self.text_channels.insert(room, msg.channel_id);

        let command_ctx = CommandContext {
            room,
            user: Some(msg.author.id.get()),
            user_voice_channel: user_voice_channel(&ctx, guild_id, msg.author.id),
        };

        let text = self.dispatcher.dispatch(&command_ctx, command).await;
        reply(&ctx, msg.channel_id, text).await;
    }

    /// Handles the bot being disconnected from voice by something other than `leave`.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);
        let room = RoomId::from(guild_id);
        if self.dispatcher.registry().remove(room).await {
            debug!("Sala {} desmontada tras desconexión externa", room);
        }
        self.text_channels.remove(&room);
    }
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<u64> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .map(|channel_id| channel_id.get())
}

async fn reply(ctx: &Context, channel_id: ChannelId, text: String) {
    if text.is_empty() {
        warn!("Respuesta vacía para canal {}", channel_id);
        return;
    }
    if let Err(e) = channel_id.say(&ctx.http, text).await {
        error!("Error al responder en canal {}: {:?}", channel_id, e);
    }
}
