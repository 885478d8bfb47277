// src/io/events.rs
//
// Observer lists for device notifications and the per-device error monitor.
//
// Observers are registered with a closure and removed with the returned
// `EventSubscription` handle. When the runtime carries a callback context the
// observers run on that context, otherwise on whichever task raised the event.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::device::CanDevice;
use super::listener::CallbackContext;
use super::types::ErrorInfo;
use super::DeviceId;

/// Default cadence of the error monitor.
pub const DEFAULT_ERROR_POLLING_INTERVAL_MS: u64 = 500;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Event Payloads
// ============================================================================

/// Raised once per connection when a connected device stops responding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionLost {
    pub device_id: DeviceId,
    /// Device label at the time of loss, e.g. "UsbCan1#0/0"
    pub device: String,
    /// Failed driver call or reported condition
    pub reason: String,
}

/// Raised when the controller reports a new error state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorOccurred {
    pub device_id: DeviceId,
    pub device: String,
    pub info: ErrorInfo,
}

// ============================================================================
// Event Hub
// ============================================================================

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by `EventHub::subscribe`. Ids are unique across hubs, so
/// removing a handle from the wrong hub is a harmless no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventSubscription {
    id: u64,
}

/// Observer list for one kind of event.
pub struct EventHub<T> {
    name: &'static str,
    observers: Mutex<Vec<(u64, Observer<T>)>>,
    context: Option<Arc<dyn CallbackContext>>,
}

impl<T> EventHub<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, context: Option<Arc<dyn CallbackContext>>) -> Self {
        Self {
            name,
            observers: Mutex::new(Vec::new()),
            context,
        }
    }

    fn observers(&self) -> MutexGuard<'_, Vec<(u64, Observer<T>)>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe<F>(&self, observer: F) -> EventSubscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        self.observers().push((id, Arc::new(observer)));
        EventSubscription { id }
    }

    /// Remove an observer. Returns false if the handle was not registered here.
    pub fn unsubscribe(&self, subscription: &EventSubscription) -> bool {
        let removed = {
            let mut observers = self.observers();
            observers
                .iter()
                .position(|(id, _)| *id == subscription.id)
                .map(|pos| observers.remove(pos))
        };
        // Dropped here, outside the lock.
        removed.is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Deliver `event` to a snapshot of the current observers.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Observer<T>> =
            self.observers().iter().map(|(_, o)| o.clone()).collect();
        if snapshot.is_empty() {
            return;
        }

        match &self.context {
            Some(context) => {
                let event = event.clone();
                context.post(Box::new(move || {
                    for observer in &snapshot {
                        observer(&event);
                    }
                }));
            }
            None => {
                for observer in &snapshot {
                    observer(event);
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub").field("name", &self.name).finish()
    }
}

// ============================================================================
// Error Monitor
// ============================================================================

/// Poll the controller's error state every `interval` until `stop_flag` is
/// set, the device is dropped, or the device is lost.
///
/// Unchanged error states are not reported again. "Device already open"
/// (0x0100) is not an error. "Device does not exist" (0x1000) is reported
/// and then treated as a lost connection, as is a failed read.
pub(crate) fn spawn_error_monitor(
    handle: &Handle,
    weak: Weak<CanDevice>,
    interval: Duration,
    initial: Option<ErrorInfo>,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut last = initial;

        loop {
            tokio::time::sleep(interval).await;
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            // Only the blocking job holds a strong reference across the await,
            // so a final drop lands on the blocking pool.
            let Some(job_device) = weak.upgrade() else {
                break;
            };
            let result = tokio::task::spawn_blocking(move || job_device.read_error_info()).await;
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            let Some(device) = weak.upgrade() else {
                break;
            };

            let info = match result {
                Ok(Ok(info)) => info,
                Ok(Err(e)) => {
                    // A failed read already ran the device's failure policy.
                    tlog!("[monitor] {} error monitor stopped: {}", device.label(), e);
                    break;
                }
                Err(e) => {
                    tlog!("[monitor] {} error read task failed: {}", device.label(), e);
                    break;
                }
            };

            if last == Some(info) {
                continue;
            }
            last = Some(info);

            if info.is_device_opened() {
                continue;
            }

            tlog!(
                "[monitor] {} reported error code 0x{:08X}",
                device.label(),
                info.error_code
            );
            device.notify_error(info);

            if info.is_device_not_exist() {
                device.mark_lost("device does not exist");
                break;
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::listener::QueuedContext;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let hub: EventHub<u32> = EventHub::new("test", None);
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let sub = hub.subscribe(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });
        hub.emit(&3);
        hub.emit(&4);
        assert_eq!(total.load(Ordering::SeqCst), 7);

        assert!(hub.unsubscribe(&sub));
        assert!(!hub.unsubscribe(&sub));
        hub.emit(&100);
        assert_eq!(total.load(Ordering::SeqCst), 7);
        assert_eq!(hub.observer_count(), 0);
    }

    #[test]
    fn test_subscription_from_other_hub_is_ignored() {
        let a: EventHub<u32> = EventHub::new("a", None);
        let b: EventHub<u32> = EventHub::new("b", None);
        let sub = a.subscribe(|_| {});
        assert!(!b.unsubscribe(&sub));
        assert_eq!(a.observer_count(), 1);
    }

    #[test]
    fn test_same_closure_registered_twice_gets_two_handles() {
        let hub: EventHub<u32> = EventHub::new("test", None);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let observer = move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        };
        let first = hub.subscribe(observer.clone());
        let _second = hub.subscribe(observer);
        hub.emit(&0);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        hub.unsubscribe(&first);
        hub.emit(&0);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_emit_through_context_is_deferred() {
        let (context, mut pump) = QueuedContext::new();
        let hub: EventHub<String> = EventHub::new("test", Some(context));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        hub.subscribe(move |v: &String| s.lock().unwrap().push(v.clone()));
        hub.emit(&"first".to_string());
        hub.emit(&"second".to_string());
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(pump.run_pending(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }
}
