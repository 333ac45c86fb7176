//! Small synchronization primitives shared by the pool and its connections.
//!
//! Both are thin wrappers over [`tokio::sync::watch`]: a value that waiters
//! can block on, where some updates deliberately do not wake anyone.

use tokio::sync::watch;

/// A slot holding at most one value.
///
/// Readers block in [`get`](Self::get) until a value is present. `set`
/// publishes and wakes every waiter; `clear` removes the value without
/// waking anyone, so stale readers keep waiting for the next `set`.
#[derive(Debug)]
pub struct SharedSlot<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> SharedSlot<T> {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publish a value, replacing any previous one.
    pub fn set(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// Remove the value, returning it.
    pub fn clear(&self) -> Option<T> {
        let mut previous = None;
        self.tx.send_if_modified(|slot| {
            previous = slot.take();
            false
        });
        previous
    }

    /// Get the current value without waiting.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Check whether a value is present.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until a value is present and return a clone of it.
    pub async fn get(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            // The sender lives in `self`, so this only fails if `self` is gone.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl<T: Clone> Default for SharedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A level-triggered event.
///
/// Setting an already set flag is a no-op, and one [`take`](Self::take)
/// consumes any number of sets.
#[derive(Debug)]
pub struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    /// Create a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Set the flag, waking waiters on the transition.
    pub fn set(&self) {
        self.tx.send_if_modified(|value| !std::mem::replace(value, true));
    }

    /// Clear the flag.
    pub fn clear(&self) {
        self.tx.send_if_modified(|value| {
            *value = false;
            false
        });
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        let mut was_set = false;
        self.tx.send_if_modified(|value| {
            was_set = std::mem::replace(value, false);
            false
        });
        was_set
    }

    /// Check whether the flag is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|value| *value).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}
