use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::sources::Track;

/// A pending play request.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub track: Track,
    /// Usuario que pidió el track, si se conoce
    pub requested_by: Option<u64>,
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(track: Track, requested_by: Option<u64>) -> Self {
        Self {
            track,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &str {
        self.track.title()
    }

    /// Time spent in the queue so far, truncated to whole milliseconds.
    pub fn waited(&self) -> Duration {
        let millis = (Utc::now() - self.added_at).num_milliseconds().max(0);
        Duration::from_millis(millis as u64)
    }
}

impl From<Track> for QueueItem {
    fn from(track: Track) -> Self {
        Self::new(track, None)
    }
}

/// The queue was torn down; no more items go in or come out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("la cola de la sala fue cerrada")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    closed: bool,
}

/// FIFO de tracks pendientes de una sala.
///
/// Any number of producers may [`enqueue`](Self::enqueue); the room's worker
/// is the single consumer and suspends in [`dequeue`](Self::dequeue) while
/// the queue is empty. [`close`](Self::close) wakes it with [`QueueClosed`].
#[derive(Debug, Default)]
pub struct RoomQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl RoomQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola. Nunca bloquea.
    pub fn enqueue(&self, item: QueueItem) -> Result<usize, QueueClosed> {
        let position = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueClosed);
            }
            info!("➕ Agregado a la cola: {}", item.title());
            state.items.push_back(item);
            state.items.len()
        };

        self.available.notify_one();
        Ok(position)
    }

    /// Waits for the next item in insertion order.
    pub async fn dequeue(&self) -> Result<QueueItem, QueueClosed> {
        loop {
            // Registrarse antes de mirar el estado para no perder un close() concurrente
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                if let Some(item) = state.items.pop_front() {
                    debug!("➡️ Siguiente en cola (FIFO): {}", item.title());
                    return Ok(item);
                }
            }

            notified.await;
        }
    }

    /// Copia ordenada de la cola en este instante; no consume nada.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.state.lock().items.iter().cloned().collect()
    }

    /// Tears the queue down: pending items are discarded and every waiting
    /// dequeue returns [`QueueClosed`]. Returns how many items were dropped.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            let dropped = state.items.len();
            state.items.clear();
            dropped
        };

        self.available.notify_waiters();
        if dropped > 0 {
            info!("🗑️ Cola cerrada, {} tracks descartados", dropped);
        }
        dropped
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{sync::Arc, time::Duration};

    fn item(title: &str) -> QueueItem {
        QueueItem::from(Track::new(
            title,
            format!("https://cdn.example/{title}"),
            format!("https://example.com/{title}"),
        ))
    }

    fn titles(items: &[QueueItem]) -> Vec<String> {
        items.iter().map(|i| i.title().to_string()).collect()
    }

    #[test]
    fn waited_counts_from_enqueue_time() {
        let mut queued = QueueItem::new(item("A").track, Some(7));
        assert_eq!(queued.requested_by, Some(7));

        queued.added_at = Utc::now() - chrono::Duration::seconds(90);
        let waited = queued.waited();
        assert!(waited >= Duration::from_secs(90) && waited < Duration::from_secs(95));

        // Relojes desfasados no producen esperas negativas
        queued.added_at = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(queued.waited(), Duration::ZERO);
    }

    #[tokio::test]
    async fn snapshot_and_dequeue_follow_insertion_order() {
        let queue = RoomQueue::new();
        for title in ["A", "B", "C"] {
            queue.enqueue(item(title)).unwrap();
        }

        assert_eq!(titles(&queue.snapshot()), vec!["A", "B", "C"]);
        assert_eq!(queue.dequeue().await.unwrap().title(), "A");
        assert_eq!(titles(&queue.snapshot()), vec!["B", "C"]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn fifo_holds_for_many_items() {
        let queue = RoomQueue::new();
        let expected: Vec<String> = (0..50).map(|i| format!("track-{i}")).collect();
        for title in &expected {
            queue.enqueue(item(title)).unwrap();
        }

        let mut got = Vec::new();
        for _ in 0..expected.len() {
            got.push(queue.dequeue().await.unwrap().title().to_string());
        }
        assert_eq!(got, expected);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(RoomQueue::new());
        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(item("late")).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("dequeue should wake up")
            .unwrap()
            .unwrap();
        assert_eq!(got.title(), "late");
    }

    #[tokio::test]
    async fn close_unblocks_pending_dequeue() {
        let queue = Arc::new(RoomQueue::new());
        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("close must not leave dequeue hanging")
            .unwrap();
        assert_eq!(result.unwrap_err(), QueueClosed);
    }

    #[tokio::test]
    async fn operations_after_close_fail_cleanly() {
        let queue = RoomQueue::new();
        queue.enqueue(item("A")).unwrap();
        queue.enqueue(item("B")).unwrap();

        assert_eq!(queue.close(), 2);
        assert!(queue.is_closed());
        assert!(queue.snapshot().is_empty());
        assert_eq!(queue.enqueue(item("C")), Err(QueueClosed));
        assert_eq!(queue.dequeue().await.unwrap_err(), QueueClosed);
        assert_eq!(queue.close(), 0);
    }

    #[tokio::test]
    async fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(RoomQueue::new());
        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    queue.enqueue(item(&format!("{p}-{i}"))).unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let snapshot = titles(&queue.snapshot());
        assert_eq!(snapshot.len(), 100);
        // Cada productor conserva su propio orden relativo
        for p in 0..4 {
            let mine: Vec<_> = snapshot
                .iter()
                .filter(|t| t.starts_with(&format!("{p}-")))
                .cloned()
                .collect();
            let expected: Vec<_> = (0..25).map(|i| format!("{p}-{i}")).collect();
            assert_eq!(mine, expected);
        }
    }
}
