//! Coalescing signal slot.
//!
//! At most one signal is pending at any time. Raising while a signal is
//! pending merges into it instead of queueing a second one, so a slow
//! consumer sees the latest intent exactly once.

use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

pub struct Signal<T> {
    pending: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Raise `sig`, replacing any pending signal.
    ///
    /// Returns `true` if nothing was pending before.
    pub fn raise(&self, sig: T) -> bool {
        self.raise_with(sig, |pending, sig| *pending = sig)
    }

    /// Raise `sig`, folding it into a pending signal with `merge`.
    pub fn raise_with(&self, sig: T, merge: impl FnOnce(&mut T, T)) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = match pending.as_mut() {
            Some(current) => {
                merge(current, sig);
                false
            }
            None => {
                *pending = Some(sig);
                true
            }
        };
        drop(pending);
        if fresh {
            self.notify.notify_one();
        }
        fresh
    }

    /// Take the pending signal without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait for the next signal.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(sig) = self.try_take() {
                return sig;
            }
            self.notify.notified().await;
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
