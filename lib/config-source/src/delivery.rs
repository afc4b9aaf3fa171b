//! Callback hand-off shared by the source implementations.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::{Change, OnChange, SourceError};

/// Owns the change callback and the cancellation token of a watch task.
///
/// The callback runs under the lock, and [`Delivery::close`] takes the same
/// lock before dropping it, so no delivery can start after `close` returns.
pub(crate) struct Delivery {
    name: String,
    callback: Mutex<Slot>,
    cancel: CancellationToken,
}

enum Slot {
    Idle,
    Armed(OnChange),
    Closed,
}

impl Delivery {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            callback: Mutex::new(Slot::Idle),
            cancel: CancellationToken::new(),
        }
    }

    /// Installs the callback. A source can only be watched once.
    pub(crate) fn arm(&self, on_change: OnChange) -> Result<(), SourceError> {
        let mut slot = self.lock();
        match *slot {
            Slot::Idle => {
                *slot = Slot::Armed(on_change);
                Ok(())
            }
            Slot::Armed(_) => Err(SourceError::AlreadyWatching {
                name: self.name.clone(),
            }),
            Slot::Closed => Err(SourceError::Closed {
                name: self.name.clone(),
            }),
        }
    }

    /// Hands `change` to the callback. Returns false once closed.
    pub(crate) fn deliver(&self, change: Change) -> bool {
        match &*self.lock() {
            Slot::Armed(on_change) => {
                on_change(change);
                true
            }
            Slot::Idle | Slot::Closed => false,
        }
    }

    pub(crate) fn close(&self) {
        *self.lock() = Slot::Closed;
        self.cancel.cancel();
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, OnChange) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (
            count,
            Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn delivers_only_while_armed() {
        let delivery = Delivery::new("test".to_string());
        let (count, on_change) = counting();

        assert!(!delivery.deliver(Change::Deleted));
        delivery.arm(on_change).expect("arm");
        assert!(delivery.deliver(Change::Deleted));
        delivery.close();
        assert!(!delivery.deliver(Change::Deleted));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(delivery.token().is_cancelled());
    }

    #[test]
    fn second_arm_is_rejected() {
        let delivery = Delivery::new("test".to_string());
        delivery.arm(counting().1).expect("arm");
        assert!(matches!(
            delivery.arm(counting().1),
            Err(SourceError::AlreadyWatching { .. })
        ));
    }

    #[test]
    fn arm_after_close_is_rejected() {
        let delivery = Delivery::new("test".to_string());
        delivery.close();
        delivery.close();
        assert!(matches!(
            delivery.arm(counting().1),
            Err(SourceError::Closed { .. })
        ));
    }
}
