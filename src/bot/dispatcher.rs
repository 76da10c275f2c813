use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

use super::commands::{help_text, Command};
use crate::{
    audio::{
        AudioTransport, PlaybackState, QueueClosed, QueueItem, RoomId, RoomRegistry, TrackControl,
        TransportError,
    },
    sources::{resolve_with_timeout, MediaResolver, ResolutionError},
};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub resolve_timeout: Duration,
    /// Upper bound for `volume`; 100 is unity gain.
    pub max_volume_percent: u32,
    pub prefix: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(30),
            max_volume_percent: 200,
            prefix: "!".to_string(),
        }
    }
}

/// Who sent the command and where they are.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pub room: RoomId,
    pub user: Option<u64>,
    /// Canal de voz en el que está el usuario, si está en alguno
    pub user_voice_channel: Option<u64>,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("You're not in a voice channel.")]
    UserNotInVoice,
    #[error("I'm not in a voice channel.")]
    NotInVoice,
    #[error("⚠️ Failed to find or load audio: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("⚠️ Voice error: {0}")]
    Transport(#[from] TransportError),
    #[error("⚠️ The queue for this server was just closed, try again.")]
    QueueClosed(#[from] QueueClosed),
}

const NOTHING_PLAYING: &str = "Nothing is playing.";

/// Turns parsed commands into registry/queue/transport operations and a
/// reply line for the chat.
pub struct CommandDispatcher<T: AudioTransport> {
    registry: Arc<RoomRegistry<T>>,
    resolver: Arc<dyn MediaResolver>,
    settings: DispatchSettings,
}

impl<T: AudioTransport> CommandDispatcher<T> {
    pub fn new(
        registry: Arc<RoomRegistry<T>>,
        resolver: Arc<dyn MediaResolver>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            resolver,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry<T>> {
        &self.registry
    }

    pub fn prefix(&self) -> &str {
        &self.settings.prefix
    }

    /// Runs `command` and returns the text to send back. Errors become replies;
    /// none of them outlive the command.
    pub async fn dispatch(&self, ctx: &CommandContext, command: Command) -> String {
        let name = command.name();
        match self.execute(ctx, command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Comando {} falló en sala {}: {}", name, ctx.room, e);
                e.to_string()
            }
        }
    }

    async fn execute(&self, ctx: &CommandContext, command: Command) -> Result<String, CommandError> {
        match command {
            Command::Join => self.join(ctx).await,
            Command::Leave => self.leave(ctx).await,
            Command::Play(query) => self.play(ctx, &query).await,
            Command::Skip => self.skip(ctx).await,
            Command::Pause => self.pause(ctx).await,
            Command::Resume => self.resume(ctx).await,
            Command::Volume(percent) => self.volume(ctx, percent).await,
            Command::Queue => Ok(self.queue(ctx)),
            Command::Help => Ok(help_text(&self.settings.prefix)),
        }
    }

    async fn join(&self, ctx: &CommandContext) -> Result<String, CommandError> {
        let channel = ctx.user_voice_channel.ok_or(CommandError::UserNotInVoice)?;
        self.registry.transport().connect(ctx.room, channel).await?;
        Ok(format!("🔊 Joined <#{}>.", channel))
    }

    /// Drops the connection together with the room's queue and worker.
    async fn leave(&self, ctx: &CommandContext) -> Result<String, CommandError> {
        let transport = self.registry.transport();
        let connected = transport.is_connected(ctx.room).await;
        let removed = self.registry.remove(ctx.room).await;

        if !connected && !removed {
            return Err(CommandError::NotInVoice);
        }
        if connected {
            transport.disconnect(ctx.room).await?;
        }
        Ok("👋 Left the voice channel.".to_string())
    }

    async fn play(&self, ctx: &CommandContext, query: &str) -> Result<String, CommandError> {
        if !self.registry.transport().is_connected(ctx.room).await {
            self.join(ctx).await?;
        }

        // Resolver antes de tocar el registro: si falla, la sala queda igual
        let track = resolve_with_timeout(self.resolver.as_ref(), query, self.settings.resolve_timeout).await?;

        let room = self.registry.get_or_create(ctx.room);
        let position = room.queue().enqueue(QueueItem::new(track.clone(), ctx.user))?;
        info!("🔁 Sala {}: {} en posición {}", ctx.room, track.title(), position);

        Ok(format!("🔁 Queued: **{}**\n🔗 {}", track.title(), track.page_url()))
    }

    async fn skip(&self, ctx: &CommandContext) -> Result<String, CommandError> {
        let Some(control) = self.session(ctx).await? else {
            return Ok(NOTHING_PLAYING.to_string());
        };
        if control.state().await != PlaybackState::Playing {
            return Ok(NOTHING_PLAYING.to_string());
        }
        control.stop().await?;
        Ok("⏭️ Skipped current track.".to_string())
    }

    async fn pause(&self, ctx: &CommandContext) -> Result<String, CommandError> {
        let Some(control) = self.session(ctx).await? else {
            return Ok(NOTHING_PLAYING.to_string());
        };
        match control.state().await {
            PlaybackState::Playing => {
                control.pause().await?;
                Ok("⏸️ Paused.".to_string())
            }
            PlaybackState::Paused => Ok("Already paused.".to_string()),
            PlaybackState::Stopped => Ok(NOTHING_PLAYING.to_string()),
        }
    }

    async fn resume(&self, ctx: &CommandContext) -> Result<String, CommandError> {
        let Some(control) = self.session(ctx).await? else {
            return Ok(NOTHING_PLAYING.to_string());
        };
        match control.state().await {
            PlaybackState::Paused => {
                control.resume().await?;
                Ok("▶️ Resumed.".to_string())
            }
            PlaybackState::Playing => Ok("Already playing.".to_string()),
            PlaybackState::Stopped => Ok(NOTHING_PLAYING.to_string()),
        }
    }

    async fn volume(&self, ctx: &CommandContext, percent: i64) -> Result<String, CommandError> {
        let Some(session) = self.registry.get(ctx.room).and_then(|room| room.now_playing()) else {
            return Ok(NOTHING_PLAYING.to_string());
        };

        let effective = clamp_volume(percent, self.settings.max_volume_percent);
        session.control.set_volume(effective as f32 / 100.0).await?;
        Ok(format!("🔊 Volume set to {}%", effective))
    }

    fn queue(&self, ctx: &CommandContext) -> String {
        let items = self
            .registry
            .get(ctx.room)
            .map(|room| room.queue().snapshot())
            .unwrap_or_default();

        if items.is_empty() {
            return "🕳️ Queue is empty.".to_string();
        }

        let lines = items
            .iter()
            .enumerate()
            .map(|(i, item)| match item.requested_by {
                Some(user) => format!("{}. {} (requested by <@{}>)", i + 1, item.title(), user),
                None => format!("{}. {}", i + 1, item.title()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("📜 **Current Queue:**\n{}", lines)
    }

    /// Current session's control, or `NotInVoice` when the room has no
    /// connection at all.
    async fn session(&self, ctx: &CommandContext) -> Result<Option<T::Handle>, CommandError> {
        if !self.registry.transport().is_connected(ctx.room).await {
            return Err(CommandError::NotInVoice);
        }
        Ok(self
            .registry
            .get(ctx.room)
            .and_then(|room| room.now_playing())
            .map(|session| session.control))
    }
}

fn clamp_volume(percent: i64, max: u32) -> u32 {
    percent.clamp(0, i64::from(max)) as u32
}
