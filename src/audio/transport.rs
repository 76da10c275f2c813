use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use super::RoomId;
use crate::sources::Track;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The room has no live voice connection.
    #[error("no hay conexión de voz en la sala {0}")]
    NotConnected(RoomId),
    /// A resolved stream could not be turned into an audio source (expired URL, bad codec...).
    #[error("no se pudo crear la fuente de audio: {0}")]
    Construction(String),
    #[error("error al conectar al canal de voz: {0}")]
    Connect(String),
    #[error("el track ya no está disponible: {0}")]
    Control(String),
}

/// Point-in-time state of a playing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Paused,
    /// Terminó, fue detenido o falló; en cualquier caso no volverá a sonar.
    Stopped,
}

impl PlaybackState {
    /// Playing and paused both hold the session; only `Stopped` ends it.
    pub fn is_active(self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }
}

/// Control surface over one playing source.
#[async_trait]
pub trait TrackControl: Clone + Send + Sync + 'static {
    async fn pause(&self) -> Result<(), TransportError>;
    async fn resume(&self) -> Result<(), TransportError>;
    async fn stop(&self) -> Result<(), TransportError>;
    async fn set_volume(&self, gain: f32) -> Result<(), TransportError>;
    async fn state(&self) -> PlaybackState;

    /// Flips to `true` once the transport reports the end of the track.
    ///
    /// `None` means the transport can only be polled through [`state`](Self::state).
    fn end_signal(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Voice transport for every room of the process.
#[async_trait]
pub trait AudioTransport: Send + Sync + 'static {
    type Source: Send + 'static;
    type Handle: TrackControl;

    /// Joins `channel` in `room`, or moves there if already connected.
    async fn connect(&self, room: RoomId, channel: u64) -> Result<(), TransportError>;
    async fn disconnect(&self, room: RoomId) -> Result<(), TransportError>;
    async fn is_connected(&self, room: RoomId) -> bool;

    async fn build_source(&self, track: &Track) -> Result<Self::Source, TransportError>;
    async fn play(&self, room: RoomId, source: Self::Source) -> Result<Self::Handle, TransportError>;
}
