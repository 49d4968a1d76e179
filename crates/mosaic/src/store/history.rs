//! Bounded record history with change notification

use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Ring buffer of decoded records
///
/// Appends happen under the write lock, so readers never observe a partially
/// appended record. Each appended record is also broadcast to subscribers.
pub struct HistoryBuffer<T: Clone> {
    entries: RwLock<VecDeque<T>>,
    capacity: usize,
    updates: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> HistoryBuffer<T> {
    /// Create a buffer holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            updates,
        }
    }

    /// Append a record, evicting the oldest one when full
    pub fn push(&self, value: T) {
        {
            let mut entries = self.entries.write();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(value.clone());
        }
        // No subscribers is fine
        let _ = self.updates.send(value);
    }

    pub fn latest(&self) -> Option<T> {
        self.entries.read().back().cloned()
    }

    /// Record at `index`, oldest first
    pub fn get(&self, index: usize) -> Option<T> {
        self.entries.read().get(index).cloned()
    }

    /// Copy of every record, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receive every record appended after this call
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.updates.subscribe()
    }
}
