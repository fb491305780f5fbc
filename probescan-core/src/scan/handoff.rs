//! Multi-producer, single-consumer handoff between probe workers and the
//! persisting consumer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::config::HandoffOrder;
use crate::ids::Identifier;
use crate::probe::Payload;

/// One probe result waiting to be persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    pub id: Identifier,
    pub payload: Option<Payload>,
}

impl QueueEntry {
    pub fn new(id: Identifier, payload: Option<Payload>) -> Self {
        Self { id, payload }
    }
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<QueueEntry>,
    producers: usize,
}

/// Unbounded buffer with a configurable removal end.
///
/// The buffer closes once every [`Producer`] has been dropped and the last
/// entry was removed.
#[derive(Debug)]
pub struct HandoffBuffer {
    state: Mutex<State>,
    notify: Notify,
    order: HandoffOrder,
}

impl HandoffBuffer {
    pub fn new(order: HandoffOrder) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            order,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, state: &mut State) -> Option<QueueEntry> {
        match self.order {
            HandoffOrder::Lifo => state.entries.pop_back(),
            HandoffOrder::Fifo => state.entries.pop_front(),
        }
    }

    /// Register a new append handle.
    pub fn producer(self: &Arc<Self>) -> Producer {
        self.lock().producers += 1;
        Producer {
            buffer: Arc::clone(self),
        }
    }

    pub fn order(&self) -> HandoffOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Live producer handles.
    pub fn producers(&self) -> usize {
        self.lock().producers
    }

    /// Remove the next entry without waiting.
    pub fn try_pop(&self) -> Option<QueueEntry> {
        let mut state = self.lock();
        self.take(&mut state)
    }

    /// Wait for the next entry. Returns `None` once the buffer is empty and
    /// no producer remains.
    pub async fn recv(&self) -> Option<QueueEntry> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a push in between is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(entry) = self.take(&mut state) {
                    return Some(entry);
                }
                if state.producers == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    fn push(&self, entry: QueueEntry) {
        self.lock().entries.push_back(entry);
        self.notify.notify_one();
    }
}

/// Append handle held by one worker.
#[derive(Debug)]
pub struct Producer {
    buffer: Arc<HandoffBuffer>,
}

impl Producer {
    pub fn send(&self, entry: QueueEntry) {
        self.buffer.push(entry);
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        {
            let mut state = self.buffer.lock();
            state.producers = state.producers.saturating_sub(1);
        }
        self.buffer.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ids(buffer: &HandoffBuffer) -> Vec<Identifier> {
        std::iter::from_fn(|| buffer.try_pop())
            .map(|entry| entry.id)
            .collect()
    }

    #[test]
    fn lifo_returns_newest_first() {
        let buffer = Arc::new(HandoffBuffer::new(HandoffOrder::Lifo));
        let producer = buffer.producer();
        for id in 1..=4 {
            producer.send(QueueEntry::new(id, None));
        }
        assert_eq!(ids(&buffer), vec![4, 3, 2, 1]);
    }

    #[test]
    fn fifo_returns_oldest_first() {
        let buffer = Arc::new(HandoffBuffer::new(HandoffOrder::Fifo));
        let producer = buffer.producer();
        for id in 1..=4 {
            producer.send(QueueEntry::new(id, None));
        }
        assert_eq!(ids(&buffer), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn recv_drains_then_closes_after_last_producer() {
        let buffer = Arc::new(HandoffBuffer::new(HandoffOrder::Fifo));
        let first = buffer.producer();
        let second = buffer.producer();
        assert_eq!(buffer.producers(), 2);

        first.send(QueueEntry::new(1, None));
        drop(first);
        second.send(QueueEntry::new(2, None));
        drop(second);

        assert_eq!(buffer.recv().await.map(|e| e.id), Some(1));
        assert_eq!(buffer.recv().await.map(|e| e.id), Some(2));
        assert_eq!(buffer.recv().await, None);
    }

    #[tokio::test]
    async fn recv_wakes_on_late_push() {
        let buffer = Arc::new(HandoffBuffer::new(HandoffOrder::Lifo));
        let producer = buffer.producer();

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.send(QueueEntry::new(9, Some(serde_json::json!({"k": 1}))));

        let entry = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer woke")
            .expect("consumer task");
        assert_eq!(entry.map(|e| e.id), Some(9));
    }

    #[tokio::test]
    async fn recv_wakes_when_last_producer_leaves() {
        let buffer = Arc::new(HandoffBuffer::new(HandoffOrder::Lifo));
        let producer = buffer.producer();

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(producer);

        let entry = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer woke")
            .expect("consumer task");
        assert_eq!(entry, None);
    }
}
