use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, RwLock};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    queue::RoomQueue,
    transport::AudioTransport,
    worker::{NowPlaying, PlaybackWorker, RoomEvent, WorkerSettings, WorkerState},
    RoomId,
};

/// Everything that lives and dies with one room's worker.
pub struct RoomState<T: AudioTransport> {
    id: RoomId,
    queue: RoomQueue,
    now_playing: RwLock<Option<NowPlaying<T::Handle>>>,
    state: watch::Sender<WorkerState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    tracks_started: AtomicUsize,
}

impl<T: AudioTransport> RoomState<T> {
    fn new(id: RoomId, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            id,
            queue: RoomQueue::new(),
            now_playing: RwLock::new(None),
            state,
            cancel,
            worker: Mutex::new(None),
            tracks_started: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn queue(&self) -> &RoomQueue {
        &self.queue
    }

    /// Sesión activa, si el worker está reproduciendo (o en pausa)
    pub fn now_playing(&self) -> Option<NowPlaying<T::Handle>> {
        self.now_playing.read().clone()
    }

    #[cfg(test)]
    pub fn worker_state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Number of tracks the worker has handed to the transport so far.
    pub fn tracks_started(&self) -> usize {
        self.tracks_started.load(Ordering::Relaxed)
    }

    /// Signals the worker to stop and closes the queue. Returns the number of
    /// queued tracks that were discarded.
    pub fn teardown(&self) -> usize {
        self.cancel.cancel();
        self.queue.close()
    }

    pub(super) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub(super) fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    pub(super) fn start_session(&self, session: NowPlaying<T::Handle>) {
        self.tracks_started.fetch_add(1, Ordering::Relaxed);
        *self.now_playing.write() = Some(session);
    }

    pub(super) fn end_session(&self) {
        self.now_playing.write().take();
    }
}

/// Room id → queue + worker for the whole process.
///
/// Injected into the dispatcher; rooms are created on the first `play` and
/// destroyed on `leave`, on an external disconnect or on [`shutdown`](Self::shutdown).
pub struct RoomRegistry<T: AudioTransport> {
    rooms: Arc<DashMap<RoomId, Arc<RoomState<T>>>>,
    transport: Arc<T>,
    settings: WorkerSettings,
    events: mpsc::UnboundedSender<RoomEvent>,
    shutdown: CancellationToken,
    workers_started: AtomicUsize,
}

impl<T: AudioTransport> RoomRegistry<T> {
    /// Creates an empty registry plus the stream of worker notifications.
    pub fn new(
        transport: Arc<T>,
        settings: WorkerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            rooms: Arc::new(DashMap::new()),
            transport,
            settings,
            events,
            shutdown: CancellationToken::new(),
            workers_started: AtomicUsize::new(0),
        };
        (registry, events_rx)
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn get(&self, room: RoomId) -> Option<Arc<RoomState<T>>> {
        self.rooms.get(&room).map(|entry| entry.value().clone())
    }

    /// Returns the room's state, starting its worker if there is none.
    ///
    /// Creation happens under the map's entry lock, so concurrent callers for
    /// the same room all get the same state and only one worker is spawned.
    pub fn get_or_create(&self, room: RoomId) -> Arc<RoomState<T>> {
        if let Some(existing) = self.get(room) {
            if !existing.queue().is_closed() {
                return existing;
            }
        }

        match self.rooms.entry(room) {
            // Un worker saliendo todavía no se borró del mapa: se reemplaza
            Entry::Occupied(mut entry) if entry.get().queue().is_closed() => {
                let state = self.spawn_room(room);
                entry.insert(state.clone());
                state
            }
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let state = self.spawn_room(room);
                entry.insert(state.clone());
                state
            }
        }
    }

    /// Tears the room down and waits for its worker to exit. No-op when the
    /// room has no state.
    pub async fn remove(&self, room: RoomId) -> bool {
        let Some((_, state)) = self.rooms.remove(&room) else {
            debug!("Sala {} sin estado, nada que remover", room);
            return false;
        };

        let discarded = state.teardown();
        info!("🧹 Desmontando sala {} ({} tracks descartados)", room, discarded);

        let worker = state.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Worker de sala {} terminó con error: {:?}", room, e);
            }
        }
        true
    }

    /// Tears every room down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if self.is_empty() {
            info!("👋 Sin salas activas que desmontar");
            return;
        }

        info!("🛑 Desmontando {} salas", self.len());
        let rooms: Vec<RoomId> = self.rooms.iter().map(|entry| *entry.key()).collect();
        for room in rooms {
            self.remove(room).await;
        }
        info!("👋 Registro de salas vacío");
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Total workers spawned since the registry was created.
    #[cfg(test)]
    pub fn workers_started(&self) -> usize {
        self.workers_started.load(Ordering::SeqCst)
    }

    fn spawn_room(&self, room: RoomId) -> Arc<RoomState<T>> {
        let state = Arc::new(RoomState::new(room, self.shutdown.child_token()));
        let worker = PlaybackWorker::new(
            state.clone(),
            self.transport.clone(),
            self.settings.clone(),
            self.events.clone(),
        );

        let rooms = self.rooms.clone();
        let own_state = state.clone();
        let handle = tokio::spawn(async move {
            worker.run().await;
            // Solo borrar la entrada si sigue siendo la nuestra
            rooms.remove_if(&room, |_, current| Arc::ptr_eq(current, &own_state));
        });
        *state.worker.lock() = Some(handle);

        self.workers_started.fetch_add(1, Ordering::SeqCst);
        info!("🆕 Sala {} creada con su worker", room);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        testing::{item, wait_for_state, FakeTransport},
        PlaybackState,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn registry() -> (RoomRegistry<FakeTransport>, mpsc::UnboundedReceiver<RoomEvent>) {
        RoomRegistry::new(
            Arc::new(FakeTransport::new()),
            WorkerSettings {
                poll_interval: Duration::from_millis(10),
                default_volume: 1.0,
            },
        )
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (registry, _events) = registry();
        let room = RoomId::new(1);

        assert!(registry.get(room).is_none());
        let first = registry.get_or_create(room);
        let second = registry.get_or_create(room);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.workers_started(), 1);
        registry.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_create_spawns_one_worker() {
        let (registry, _events) = registry();
        let registry = Arc::new(registry);
        let room = RoomId::new(7);

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.get_or_create(room) }));
        }

        let mut states = Vec::new();
        for task in tasks {
            states.push(task.await.unwrap());
        }

        assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.workers_started(), 1);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn rooms_are_independent() {
        let (registry, _events) = registry();
        let a = registry.get_or_create(RoomId::new(1));
        let b = registry.get_or_create(RoomId::new(2));

        a.queue().enqueue(item("only in a")).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.workers_started(), 2);
        assert!(b.queue().is_empty());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn remove_stops_idle_worker() {
        let (registry, _events) = registry();
        let room = RoomId::new(3);
        let state = registry.get_or_create(room);
        let mut worker_state = state.subscribe();

        assert!(registry.remove(room).await);
        wait_for_state(&mut worker_state, WorkerState::Stopped).await;

        assert!(registry.get(room).is_none());
        assert!(state.queue().is_closed());
        assert!(state.queue().enqueue(item("too late")).is_err());
    }

    #[tokio::test]
    async fn remove_stops_the_playing_track() {
        let (registry, _events) = registry();
        let transport = registry.transport().clone();
        let room = RoomId::new(4);
        transport.connect(room, 9).await.unwrap();

        let state = registry.get_or_create(room);
        let mut worker_state = state.subscribe();
        state.queue().enqueue(item("A")).unwrap();
        state.queue().enqueue(item("B")).unwrap();
        wait_for_state(&mut worker_state, WorkerState::Playing).await;

        assert!(registry.remove(room).await);

        assert_eq!(*worker_state.borrow(), WorkerState::Stopped);
        // Nadie llamó a disconnect: el stop lo pidió el worker
        assert_eq!(transport.connected_channel(room), Some(9));
        assert_eq!(transport.current_state(room), Some(PlaybackState::Stopped));
        assert_eq!(transport.plays(), vec!["A"]);
    }

    #[tokio::test]
    async fn remove_cancels_a_track_stuck_loading() {
        let (registry, _events) = registry();
        let transport = registry.transport().clone();
        let room = RoomId::new(6);
        transport.connect(room, 9).await.unwrap();
        transport.hold_source("slow");

        let state = registry.get_or_create(room);
        let mut worker_state = state.subscribe();
        state.queue().enqueue(item("slow")).unwrap();
        wait_for_state(&mut worker_state, WorkerState::Loading).await;

        tokio::time::timeout(Duration::from_secs(1), registry.remove(room))
            .await
            .expect("loading worker must honour teardown");

        assert_eq!(*worker_state.borrow(), WorkerState::Stopped);
        assert_eq!(transport.build_attempts("slow"), 1);
        assert!(transport.plays().is_empty());
    }

    #[tokio::test]
    async fn remove_without_state_is_noop() {
        let (registry, _events) = registry();
        assert!(!registry.remove(RoomId::new(99)).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn room_is_recreated_after_remove() {
        let (registry, _events) = registry();
        let room = RoomId::new(5);
        let first = registry.get_or_create(room);
        registry.remove(room).await;

        let second = registry.get_or_create(room);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.queue().is_closed());
        assert_eq!(registry.workers_started(), 2);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_clears_every_room() {
        let (registry, _events) = registry();
        let states: Vec<_> = (1..=3)
            .map(|id| registry.get_or_create(RoomId::new(id)))
            .collect();

        registry.shutdown().await;

        assert!(registry.is_empty());
        for state in states {
            assert_eq!(state.worker_state(), WorkerState::Stopped);
        }
    }
}
