//! The page store: single source of truth for the current page.
//!
//! Mutated only by the visit manager, and only with a complete next-state
//! page produced by the merger, so subscribers never observe a partially
//! reconciled prop tree.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use passage_types::page::Page;

type Subscriber = Box<dyn FnMut(&Arc<Page>) + Send>;

/// Holds the current [`Page`] and notifies subscribers on every swap.
pub struct PageStore {
    current: RwLock<Arc<Page>>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_id: Mutex<u64>,
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("current", &self.current.read().component)
            .finish_non_exhaustive()
    }
}

impl PageStore {
    /// A store seeded with the initially embedded page.
    #[must_use]
    pub fn new(initial: Arc<Page>) -> Self {
        Self {
            current: RwLock::new(initial),
            subscribers: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    /// The current page.
    #[must_use]
    pub fn current(&self) -> Arc<Page> {
        Arc::clone(&self.current.read())
    }

    /// Replace the current page and notify every subscriber.
    pub fn swap(&self, next: Arc<Page>) {
        *self.current.write() = Arc::clone(&next);
        let mut subscribers = self.subscribers.lock();
        for (_, subscriber) in subscribers.iter_mut() {
            subscriber(&next);
        }
    }

    /// Register a change subscriber; returns an unsubscribe id.
    pub fn subscribe(&self, subscriber: impl FnMut(&Arc<Page>) + Send + 'static) -> u64 {
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        self.subscribers.lock().push((id, Box::new(subscriber)));
        id
    }

    /// Remove a subscriber. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }
}
