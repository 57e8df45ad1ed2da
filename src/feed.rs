//! Push-based subscription feeds
//!
//! `Feed<T>` fans a value out to every current subscriber; `StateCell<S>`
//! holds a lifecycle state and publishes only actual changes.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use crate::types::Lifecycle;

/// Buffered notifications per subscriber before it starts lagging
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Multi-subscriber notification feed
///
/// Publishing never blocks and never fails: with no subscribers the value is
/// dropped, and a lagging subscriber loses the oldest values.
#[derive(Debug, Clone)]
pub struct Feed<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Feed<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Deliver a value to all current subscribers
    pub fn publish(&self, value: T) {
        let _ = self.sender.send(value);
    }

    /// Subscribe to values published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for Feed<T> {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// Lifecycle state with a change-only notification feed
#[derive(Debug)]
pub struct StateCell<S> {
    current: Mutex<S>,
    changes: Feed<S>,
}

impl<S: Lifecycle> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            current: Mutex::new(initial),
            changes: Feed::default(),
        }
    }

    pub fn get(&self) -> S {
        *self.current.lock()
    }

    /// Move to `next`
    ///
    /// Returns true when the state changed. Same-state requests are silent
    /// no-ops; invalid transitions are refused and logged.
    pub fn transition(&self, next: S) -> bool {
        let mut current = self.current.lock();
        if *current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            warn!("Refusing invalid transition {:?} -> {:?}", *current, next);
            return false;
        }
        *current = next;
        // Published under the lock so subscribers see transitions in order
        self.changes.publish(next);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<S> {
        self.changes.subscribe()
    }
}
