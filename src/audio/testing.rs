//! In-memory transport for worker, registry and dispatcher tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::sync::watch;

use super::{
    queue::QueueItem,
    transport::{AudioTransport, PlaybackState, TrackControl, TransportError},
    worker::WorkerState,
    RoomId,
};
use crate::sources::Track;

pub fn track(title: &str) -> Track {
    Track::new(
        title,
        format!("https://cdn.example/{title}"),
        format!("https://example.com/watch/{title}"),
    )
}

pub fn item(title: &str) -> QueueItem {
    QueueItem::from(track(title))
}

pub async fn wait_for_state(rx: &mut watch::Receiver<WorkerState>, target: WorkerState) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|state| *state == target))
        .await
        .unwrap_or_else(|_| panic!("worker never reached {target:?}"))
        .expect("worker state channel closed");
}

#[derive(Debug)]
struct HandleShared {
    state: Mutex<PlaybackState>,
    volume: Mutex<f32>,
    ended: watch::Sender<bool>,
    with_signal: bool,
}

#[derive(Debug, Clone)]
pub struct FakeHandle {
    shared: Arc<HandleShared>,
}

impl FakeHandle {
    fn new(with_signal: bool) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            shared: Arc::new(HandleShared {
                state: Mutex::new(PlaybackState::Playing),
                volume: Mutex::new(1.0),
                ended,
                with_signal,
            }),
        }
    }

    fn end(&self) {
        *self.shared.state.lock() = PlaybackState::Stopped;
        self.shared.ended.send_replace(true);
    }

    pub fn volume(&self) -> f32 {
        *self.shared.volume.lock()
    }

    pub fn current_state(&self) -> PlaybackState {
        *self.shared.state.lock()
    }
}

#[async_trait]
impl TrackControl for FakeHandle {
    async fn pause(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if *state == PlaybackState::Playing {
            *state = PlaybackState::Paused;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if *state == PlaybackState::Paused {
            *state = PlaybackState::Playing;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.end();
        Ok(())
    }

    async fn set_volume(&self, gain: f32) -> Result<(), TransportError> {
        *self.shared.volume.lock() = gain;
        Ok(())
    }

    async fn state(&self) -> PlaybackState {
        *self.shared.state.lock()
    }

    fn end_signal(&self) -> Option<watch::Receiver<bool>> {
        self.shared.with_signal.then(|| self.shared.ended.subscribe())
    }
}

#[derive(Debug, Default)]
struct Inner {
    connected: HashMap<RoomId, u64>,
    failing: HashSet<String>,
    held: HashSet<String>,
    build_attempts: HashMap<String, usize>,
    plays: Vec<String>,
    current: HashMap<RoomId, FakeHandle>,
}

/// Records every call and lets tests end tracks or drop connections by hand.
#[derive(Debug)]
pub struct FakeTransport {
    inner: Mutex<Inner>,
    with_signal: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            with_signal: true,
        }
    }

    /// A transport that never signals completion; the worker has to poll.
    pub fn polling_only() -> Self {
        Self {
            with_signal: false,
            ..Self::new()
        }
    }

    pub fn fail_source(&self, title: &str) {
        self.inner.lock().failing.insert(title.to_string());
    }

    /// `build_source` for `title` never completes; only cancellation gets the worker out.
    pub fn hold_source(&self, title: &str) {
        self.inner.lock().held.insert(title.to_string());
    }

    pub fn build_attempts(&self, title: &str) -> usize {
        self.inner.lock().build_attempts.get(title).copied().unwrap_or(0)
    }

    pub fn plays(&self) -> Vec<String> {
        self.inner.lock().plays.clone()
    }

    pub fn connected_channel(&self, room: RoomId) -> Option<u64> {
        self.inner.lock().connected.get(&room).copied()
    }

    pub fn current(&self, room: RoomId) -> Option<FakeHandle> {
        self.inner.lock().current.get(&room).cloned()
    }

    pub fn current_volume(&self, room: RoomId) -> Option<f32> {
        self.current(room).map(|handle| handle.volume())
    }

    pub fn current_state(&self, room: RoomId) -> Option<PlaybackState> {
        self.current(room).map(|handle| handle.current_state())
    }

    /// Natural end of the room's current track.
    pub fn finish_current(&self, room: RoomId) {
        if let Some(handle) = self.current(room) {
            handle.end();
        }
    }

    /// Connection vanishes without anyone calling `disconnect`.
    pub fn drop_connection(&self, room: RoomId) {
        self.inner.lock().connected.remove(&room);
    }

    pub async fn wait_for_plays(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let plays = self.plays();
                if plays.len() >= count {
                    return plays;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} plays, got {:?}", self.plays()))
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    type Source = Track;
    type Handle = FakeHandle;

    async fn connect(&self, room: RoomId, channel: u64) -> Result<(), TransportError> {
        self.inner.lock().connected.insert(room, channel);
        Ok(())
    }

    async fn disconnect(&self, room: RoomId) -> Result<(), TransportError> {
        let current = {
            let mut inner = self.inner.lock();
            if inner.connected.remove(&room).is_none() {
                return Err(TransportError::NotConnected(room));
            }
            inner.current.get(&room).cloned()
        };
        if let Some(handle) = current {
            handle.end();
        }
        Ok(())
    }

    async fn is_connected(&self, room: RoomId) -> bool {
        self.inner.lock().connected.contains_key(&room)
    }

    async fn build_source(&self, track: &Track) -> Result<Track, TransportError> {
        let held = {
            let mut inner = self.inner.lock();
            *inner.build_attempts.entry(track.title().to_string()).or_insert(0) += 1;
            if inner.failing.contains(track.title()) {
                return Err(TransportError::Construction(format!(
                    "stream expired for {}",
                    track.title()
                )));
            }
            inner.held.contains(track.title())
        };
        if held {
            std::future::pending::<()>().await;
        }
        Ok(track.clone())
    }

    async fn play(&self, room: RoomId, source: Track) -> Result<FakeHandle, TransportError> {
        let mut inner = self.inner.lock();
        if !inner.connected.contains_key(&room) {
            return Err(TransportError::NotConnected(room));
        }
        let handle = FakeHandle::new(self.with_signal);
        inner.plays.push(source.title().to_string());
        inner.current.insert(room, handle.clone());
        Ok(handle)
    }
}
