use dashmap::DashMap;
use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::audio::{RoomEvent, RoomId};

/// Texto para el canal de la sala, si el evento merece un mensaje.
pub fn render(event: &RoomEvent) -> Option<String> {
    match event {
        RoomEvent::NowPlaying { track, .. } => Some(format!("🎶 Now playing: **{}**", track.title())),
        RoomEvent::TrackFailed { track, reason, .. } => {
            Some(format!("⚠️ Error playing **{}**: {}", track.title(), reason))
        }
        RoomEvent::Stopped { .. } => None,
    }
}

fn room_of(event: &RoomEvent) -> RoomId {
    match event {
        RoomEvent::NowPlaying { room, .. }
        | RoomEvent::TrackFailed { room, .. }
        | RoomEvent::Stopped { room, .. } => *room,
    }
}

/// Forwards worker notifications to the last text channel each room was
/// commanded from. Runs until every registry sender is gone.
pub async fn forward_room_events(
    http: Arc<Http>,
    channels: Arc<DashMap<RoomId, ChannelId>>,
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
) {
    info!("📣 Reenvío de eventos de sala iniciado");

    while let Some(event) = events.recv().await {
        let room = room_of(&event);
        if let RoomEvent::Stopped { .. } = event {
            channels.remove(&room);
        }

        let Some(text) = render(&event) else {
            debug!("Evento sin mensaje para sala {}: {:?}", room, event);
            continue;
        };
        let Some(channel_id) = channels.get(&room).map(|entry| *entry.value()) else {
            debug!("Sala {} sin canal de texto conocido", room);
            continue;
        };

        if let Err(e) = channel_id
            .send_message(&*http, CreateMessage::new().content(text))
            .await
        {
            error!("Error al enviar mensaje a sala {}: {:?}", room, e);
        }
    }

    info!("📣 Reenvío de eventos de sala terminado");
}
