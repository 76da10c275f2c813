use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use super::{
    queue::{QueueClosed, QueueItem},
    registry::RoomState,
    transport::{AudioTransport, TrackControl, TransportError},
    RoomId,
};
use crate::sources::Track;

/// Estado observable del worker de una sala.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Esperando el siguiente track de la cola
    Idle,
    /// Entregando un track al transporte
    Loading,
    /// Sonando (o en pausa)
    Playing,
    /// Terminal; la sala fue desmontada
    Stopped,
}

/// Notificaciones que el worker deja para el canal de texto de la sala.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    NowPlaying { room: RoomId, track: Track },
    TrackFailed { room: RoomId, track: Track, reason: String },
    Stopped { room: RoomId, discarded: usize },
}

/// Session currently held by a worker.
#[derive(Debug, Clone)]
pub struct NowPlaying<H> {
    pub item: QueueItem,
    pub control: H,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How often the worker polls the transport while a track is active.
    pub poll_interval: Duration,
    /// Ganancia aplicada a cada track nuevo (1.0 = unidad)
    pub default_volume: f32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            default_volume: 1.0,
        }
    }
}

enum Flow {
    Next,
    Exit,
}

enum TrackEnd {
    Finished,
    Teardown,
    Disconnected,
}

/// Drives one room's queue through the transport for the room's whole life.
pub struct PlaybackWorker<T: AudioTransport> {
    room: Arc<RoomState<T>>,
    transport: Arc<T>,
    settings: WorkerSettings,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl<T: AudioTransport> PlaybackWorker<T> {
    pub fn new(
        room: Arc<RoomState<T>>,
        transport: Arc<T>,
        settings: WorkerSettings,
        events: mpsc::UnboundedSender<RoomEvent>,
    ) -> Self {
        Self {
            room,
            transport,
            settings,
            events,
        }
    }

    pub async fn run(self) {
        let room_id = self.room.id();
        info!("🎧 Worker iniciado para sala {}", room_id);

        loop {
            self.room.set_state(WorkerState::Idle);

            let item = tokio::select! {
                biased;
                _ = self.room.cancelled() => break,
                next = self.room.queue().dequeue() => match next {
                    Ok(item) => item,
                    Err(QueueClosed) => break,
                },
            };

            debug!(
                "⏳ {} esperó {} en la cola de sala {}",
                item.title(),
                humantime::format_duration(item.waited()),
                room_id
            );
            self.room.set_state(WorkerState::Loading);
            match self.play(item).await {
                Flow::Next => continue,
                Flow::Exit => break,
            }
        }

        let discarded = self.room.teardown();
        self.emit(RoomEvent::Stopped {
            room: room_id,
            discarded,
        });
        self.room.set_state(WorkerState::Stopped);
        info!(
            "⏹️ Worker detenido para sala {} ({} tracks reproducidos, {} descartados)",
            room_id,
            self.room.tracks_started(),
            discarded
        );
    }

    async fn play(&self, item: QueueItem) -> Flow {
        let room_id = self.room.id();

        if !self.transport.is_connected(room_id).await {
            warn!("🔌 Sala {} sin conexión de voz, deteniendo worker", room_id);
            return Flow::Exit;
        }

        let source = tokio::select! {
            biased;
            _ = self.room.cancelled() => return Flow::Exit,
            built = self.transport.build_source(&item.track) => built,
        };
        let source = match source {
            Ok(source) => source,
            Err(e) => {
                self.report_failure(&item, &e);
                return Flow::Next;
            }
        };

        let control = match self.transport.play(room_id, source).await {
            Ok(control) => control,
            Err(TransportError::NotConnected(_)) => {
                warn!("🔌 Conexión perdida al iniciar {} en sala {}", item.title(), room_id);
                return Flow::Exit;
            }
            Err(e) => {
                self.report_failure(&item, &e);
                return Flow::Next;
            }
        };

        if let Err(e) = control.set_volume(self.settings.default_volume).await {
            debug!("No se pudo aplicar volumen por defecto: {}", e);
        }

        info!("🎵 Reproduciendo en sala {}: {}", room_id, item.title());
        self.room.start_session(NowPlaying {
            item: item.clone(),
            control: control.clone(),
        });
        self.room.set_state(WorkerState::Playing);
        self.emit(RoomEvent::NowPlaying {
            room: room_id,
            track: item.track.clone(),
        });

        let end = self.wait_for_end(&control).await;
        self.room.end_session();

        match end {
            TrackEnd::Finished => {
                debug!("Track terminado en sala {}: {}", room_id, item.title());
                Flow::Next
            }
            TrackEnd::Teardown | TrackEnd::Disconnected => {
                if let Err(e) = control.stop().await {
                    debug!("stop() tras desmontar sala {}: {}", room_id, e);
                }
                Flow::Exit
            }
        }
    }

    /// Waits until the track is neither playing nor paused.
    ///
    /// The transport's end signal wins when it has one; the poll keeps running
    /// regardless so a lost event or a dropped voice connection is still seen.
    async fn wait_for_end(&self, control: &T::Handle) -> TrackEnd {
        let room_id = self.room.id();
        let mut end_signal = control.end_signal();

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.room.cancelled() => return TrackEnd::Teardown,
                _ = ended(&mut end_signal) => return TrackEnd::Finished,
                _ = ticker.tick() => {
                    if !self.transport.is_connected(room_id).await {
                        warn!("🔌 Conexión de voz perdida en sala {}", room_id);
                        return TrackEnd::Disconnected;
                    }
                    if !control.state().await.is_active() {
                        return TrackEnd::Finished;
                    }
                }
            }
        }
    }

    fn report_failure(&self, item: &QueueItem, err: &TransportError) {
        error!("❌ Error reproduciendo {} en sala {}: {}", item.title(), self.room.id(), err);
        self.emit(RoomEvent::TrackFailed {
            room: self.room.id(),
            track: item.track.clone(),
            reason: err.to_string(),
        });
    }

    fn emit(&self, event: RoomEvent) {
        // Sin receptor no hay a quién avisar; la reproducción sigue igual
        let _ = self.events.send(event);
    }
}

async fn ended(signal: &mut Option<watch::Receiver<bool>>) {
    match signal {
        // Un emisor caído también significa que el track no volverá a sonar
        Some(rx) => {
            let _ = rx.wait_for(|done| *done).await;
        }
        None => std::future::pending::<()>().await,
    }
}
