use async_trait::async_trait;
use reqwest::header::RANGE;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{num::NonZeroU64, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    transport::{AudioTransport, PlaybackState, TrackControl, TransportError},
    RoomId,
};
use crate::sources::Track;

/// Discord voice transport backed by songbird.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    client: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { manager, client })
    }

    fn guild(room: RoomId) -> Result<GuildId, TransportError> {
        NonZeroU64::new(room.get())
            .map(GuildId::from)
            .ok_or(TransportError::NotConnected(room))
    }
}

#[async_trait]
impl AudioTransport for SongbirdTransport {
    type Source = Input;
    type Handle = SongbirdTrack;

    async fn connect(&self, room: RoomId, channel: u64) -> Result<(), TransportError> {
        let guild_id = Self::guild(room)?;
        let channel_id = NonZeroU64::new(channel)
            .map(ChannelId::from)
            .ok_or_else(|| TransportError::Connect(format!("canal inválido: {}", channel)))?;

        match self.manager.join(guild_id, channel_id).await {
            Ok(_call) => {
                info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
                Ok(())
            }
            Err(e) => {
                error!("Error al conectar al canal de voz: {:?}", e);
                Err(TransportError::Connect(e.to_string()))
            }
        }
    }

    async fn disconnect(&self, room: RoomId) -> Result<(), TransportError> {
        let guild_id = Self::guild(room)?;
        self.manager
            .remove(guild_id)
            .await
            .map_err(|_| TransportError::NotConnected(room))?;
        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }

    async fn is_connected(&self, room: RoomId) -> bool {
        let Ok(guild_id) = Self::guild(room) else {
            return false;
        };
        match self.manager.get(guild_id) {
            Some(call) => call.lock().await.current_channel().is_some(),
            None => false,
        }
    }

    async fn build_source(&self, track: &Track) -> Result<Input, TransportError> {
        let url = track.stream_url();

        // Pedir el primer byte detecta URLs vencidas antes de entregarlas al driver
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| TransportError::Construction(e.to_string()))?;
        if let Err(e) = response.error_for_status_ref() {
            warn!("❌ Stream no disponible para {}: {}", track.title(), e);
            return Err(TransportError::Construction(e.to_string()));
        }

        debug!("🎯 Stream verificado para {}", track.title());
        Ok(Input::from(HttpRequest::new(self.client.clone(), url.to_string())))
    }

    async fn play(&self, room: RoomId, source: Input) -> Result<SongbirdTrack, TransportError> {
        let guild_id = Self::guild(room)?;
        let call = self
            .manager
            .get(guild_id)
            .ok_or(TransportError::NotConnected(room))?;

        let handle = call.lock().await.play_input(source);

        let (ended, ended_rx) = watch::channel(false);
        let notifier = TrackEndNotifier {
            room,
            ended: Arc::new(ended),
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(Event::Track(event), notifier.clone())
                .map_err(|e| TransportError::Control(e.to_string()))?;
        }

        Ok(SongbirdTrack {
            handle,
            ended: ended_rx,
        })
    }
}

/// Handle over a songbird track plus its completion signal.
#[derive(Clone)]
pub struct SongbirdTrack {
    handle: TrackHandle,
    ended: watch::Receiver<bool>,
}

#[async_trait]
impl TrackControl for SongbirdTrack {
    async fn pause(&self) -> Result<(), TransportError> {
        self.handle
            .pause()
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn resume(&self) -> Result<(), TransportError> {
        self.handle
            .play()
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.handle
            .stop()
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn set_volume(&self, gain: f32) -> Result<(), TransportError> {
        self.handle
            .set_volume(gain)
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn state(&self) -> PlaybackState {
        match self.handle.get_info().await {
            Ok(info) => match info.playing {
                PlayMode::Play => PlaybackState::Playing,
                PlayMode::Pause => PlaybackState::Paused,
                _ => PlaybackState::Stopped,
            },
            // El driver ya soltó el track
            Err(_) => PlaybackState::Stopped,
        }
    }

    fn end_signal(&self) -> Option<watch::Receiver<bool>> {
        Some(self.ended.clone())
    }
}

/// Handler para cuando un track termina o falla
#[derive(Clone)]
struct TrackEndNotifier {
    room: RoomId,
    ended: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _handle) in *tracks {
                if let PlayMode::Errored(e) = &state.playing {
                    error!("❌ Error en track para sala {}: {:?}", self.room, e);
                }
            }
        }
        debug!("🎵 Track terminó en sala {}", self.room);
        self.ended.send_replace(true);
        None
    }
}
