use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

use super::SyncStatus;

/// Opaque handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Callback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

/// Broadcasts sync status transitions to registered callbacks.
///
/// Delivery is synchronous and in registration order. The registry lock is
/// released before callbacks run, so a callback may subscribe or unsubscribe
/// (itself included) without deadlocking; such changes apply from the next
/// broadcast. A panicking callback is logged and skipped.
#[derive(Default)]
pub struct SyncStatusPublisher {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionHandle, Callback>>,
}

impl SyncStatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers().insert(handle, Arc::new(callback));
        handle
    }

    /// Remove a callback. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers().remove(&handle).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    pub fn publish(&self, status: &SyncStatus) {
        let mut callbacks: Vec<(SubscriptionHandle, Callback)> = self
            .subscribers()
            .iter()
            .map(|(handle, cb)| (*handle, Arc::clone(cb)))
            .collect();
        callbacks.sort_by_key(|(handle, _)| handle.0);

        for (handle, callback) in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(status))) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                error!(
                    subscriber = handle.0,
                    phase = ?status.phase,
                    panic = %message,
                    "Sync status subscriber panicked"
                );
            }
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriptionHandle, Callback>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncPhase;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_and_publish() {
        let publisher = SyncStatusPublisher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        publisher.subscribe(move |s| sink.lock().unwrap().push(s.phase));

        publisher.publish(&SyncStatus::idle());
        assert_eq!(*seen.lock().unwrap(), vec![SyncPhase::Idle]);
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let publisher = SyncStatusPublisher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = publisher.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(publisher.unsubscribe(handle));
        assert!(!publisher.unsubscribe(handle));
        publisher.publish(&SyncStatus::idle());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let publisher = Arc::new(SyncStatusPublisher::new());
        let count = Arc::new(AtomicUsize::new(0));
        let handle_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let p = Arc::clone(&publisher);
        let c = Arc::clone(&count);
        let slot = Arc::clone(&handle_slot);
        let handle = publisher.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(h) = *slot.lock().unwrap() {
                p.unsubscribe(h);
            }
        });
        *handle_slot.lock().unwrap() = Some(handle);

        publisher.publish(&SyncStatus::idle());
        publisher.publish(&SyncStatus::idle());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let publisher = SyncStatusPublisher::new();
        publisher.subscribe(|_| panic!("subscriber bug"));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        publisher.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        publisher.publish(&SyncStatus::idle());
        publisher.publish(&SyncStatus::idle());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
