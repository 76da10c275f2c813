//! # Audio Module
//!
//! Per-room playback core for Open Music Bot.
//!
//! Every voice room (a Discord guild) gets its own FIFO queue and exactly one
//! long-lived playback worker. The worker pulls tracks from the queue, hands
//! them to the voice transport and waits for each one to finish before taking
//! the next.
//!
//! ## Architecture
//!
//! ### [`queue`] - Room Queue
//! - Unbounded FIFO with async dequeue
//! - Explicit teardown that wakes a blocked worker
//! - Non-consuming snapshots for `!queue`
//!
//! ### [`worker`] - Playback Worker
//! - `Idle → Loading → Playing → Idle` loop, `Stopped` on teardown
//! - Event-driven completion with polling as fallback
//!
//! ### [`registry`] - Room Registry
//! - Room id → queue + worker, created on first play
//! - Teardown on leave or external disconnect
//!
//! ### [`transport`] - Transport seam
//! - Traits the worker drives; [`songbird_transport`] implements them for Discord voice
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let registry = RoomRegistry::new(transport, WorkerSettings::default());
//! let room = registry.get_or_create(RoomId::new(123456789));
//! room.queue().enqueue(QueueItem::new(track, None))?;
//! ```

pub mod queue;
pub mod registry;
pub mod songbird_transport;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub mod testing;

use std::fmt;

pub use queue::{QueueClosed, QueueItem, RoomQueue};
pub use registry::{RoomRegistry, RoomState};
pub use transport::{AudioTransport, PlaybackState, TrackControl, TransportError};
pub use worker::{NowPlaying, RoomEvent, WorkerSettings, WorkerState};

/// Identificador opaco de una sala (guild de Discord)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(u64);

impl RoomId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<serenity::model::id::GuildId> for RoomId {
    fn from(guild_id: serenity::model::id::GuildId) -> Self {
        Self(guild_id.get())
    }
}
