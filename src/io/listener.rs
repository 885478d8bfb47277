// src/io/listener.rs
//
// Listener registry: one background polling task per
// (device, polling interval, wait time) key, fanning each drained batch out
// to every callback registered under that key.
//
// Lifecycle:
// - subscribe() spawns the task for a new key, or adds the callback to the
//   live task already serving the key
// - unsubscribe() of the last callback cancels the task
// - a device failure or disconnect cancels every key of that device
//
// Cancellation is cooperative: tasks check their stop flag after each sleep
// and each drain, so one in-flight batch may still be delivered after the
// key is cancelled. Cancelled task handles are parked so callers that need a
// deterministic teardown can await them with `join_cancelled()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::device::CanDevice;
use super::error::{CanError, Result};
use super::{CanFrame, DeviceId};

/// Callback invoked with each drained batch. Identity is the `Arc` allocation,
/// so keep a clone to unsubscribe later.
pub type FrameCallback = Arc<dyn Fn(&[CanFrame]) + Send + Sync>;

type Job = Box<dyn FnOnce() + Send + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn same_callback(a: &FrameCallback, b: &FrameCallback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}

// ============================================================================
// Callback Context
// ============================================================================

/// Execution context that callbacks are marshalled onto, such as a UI loop.
/// Jobs posted to one context must run one at a time in posting order.
pub trait CallbackContext: Send + Sync {
    fn post(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// FIFO callback context drained by its owner through a `ContextPump`.
pub struct QueuedContext {
    tx: mpsc::UnboundedSender<Job>,
}

/// Receiving half of a `QueuedContext`, owned by the thread that should run
/// the callbacks.
pub struct ContextPump {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl QueuedContext {
    pub fn new() -> (Arc<QueuedContext>, ContextPump) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(QueuedContext { tx }), ContextPump { rx })
    }
}

impl CallbackContext for QueuedContext {
    fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tlog!("[listener] Callback context pump dropped, discarding callback");
        }
    }
}

impl ContextPump {
    /// Run every job queued so far without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for the next job and run it. Returns false once every
    /// `QueuedContext` handle has been dropped.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs as they arrive for `duration`. Returns how many ran.
    pub async fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + duration;
        let mut ran = 0;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(job)) => {
                    job();
                    ran += 1;
                }
                Ok(None) | Err(_) => return ran,
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Identifies one polling task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerKey {
    pub device_id: DeviceId,
    pub polling_interval_ms: u64,
    /// Receive wait passed to the driver; -1 waits indefinitely
    pub wait_time_ms: i32,
}

struct ListenerSession {
    stop_flag: Arc<AtomicBool>,
    callbacks: Arc<Mutex<Vec<FrameCallback>>>,
    task: JoinHandle<()>,
}

impl ListenerSession {
    fn cancel(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

/// Map of listener key -> polling task and its callbacks.
pub struct ListenerRegistry {
    sessions: Mutex<HashMap<ListenerKey, ListenerSession>>,
    cancelled: Mutex<Vec<JoinHandle<()>>>,
    handle: Option<Handle>,
    context: Option<Arc<dyn CallbackContext>>,
}

impl ListenerRegistry {
    pub fn new(handle: Option<Handle>, context: Option<Arc<dyn CallbackContext>>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            handle,
            context,
        }
    }

    /// Tokio runtime the polling tasks are spawned on.
    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }

    pub fn context(&self) -> Option<&Arc<dyn CallbackContext>> {
        self.context.as_ref()
    }

    /// Register `callback` for batches drained from `device` every
    /// `polling_interval_ms`. The device must be connected.
    pub fn subscribe(
        &self,
        device: &CanDevice,
        polling_interval_ms: u64,
        wait_time_ms: i32,
        callback: FrameCallback,
    ) -> Result<ListenerKey> {
        if !device.is_connected() {
            return Err(CanError::invalid_state(
                &device.label(),
                "subscribe requires a connected device",
            ));
        }
        let handle = self.handle.as_ref().ok_or_else(|| {
            CanError::invalid_state(&device.label(), "no tokio runtime to run listeners on")
        })?;

        let key = ListenerKey {
            device_id: device.id(),
            polling_interval_ms,
            wait_time_ms,
        };

        let (started, finished) = {
            let mut sessions = lock(&self.sessions);

            let live = sessions
                .get(&key)
                .map(|session| !session.task.is_finished())
                .unwrap_or(false);
            if live {
                let mut callbacks = lock(&sessions[&key].callbacks);
                if !callbacks.iter().any(|c| same_callback(c, &callback)) {
                    callbacks.push(callback);
                    tlog!(
                        "[listener] Added callback to {} every {}ms (callbacks: {})",
                        device.label(),
                        polling_interval_ms,
                        callbacks.len()
                    );
                }
                (false, None)
            } else {
                // A finished task under the key is replaced.
                let finished = sessions.remove(&key);

                let stop_flag = Arc::new(AtomicBool::new(false));
                let callbacks = Arc::new(Mutex::new(vec![callback]));
                let task = handle.spawn(poll_loop(
                    device.weak(),
                    key,
                    stop_flag.clone(),
                    callbacks.clone(),
                    self.context.clone(),
                ));
                sessions.insert(
                    key,
                    ListenerSession {
                        stop_flag,
                        callbacks,
                        task,
                    },
                );
                (true, finished)
            }
        };
        drop(finished);

        // A loss or disconnect clears connected before cancelling listeners,
        // so a key inserted after that cancellation is caught here.
        if !device.is_connected() {
            self.unsubscribe_all(key.device_id);
            return Err(CanError::invalid_state(
                &device.label(),
                "device disconnected while subscribing",
            ));
        }

        if started {
            tlog!(
                "[listener] Started polling {} every {}ms (wait {}ms)",
                device.label(),
                polling_interval_ms,
                wait_time_ms
            );
        }
        Ok(key)
    }

    /// Remove one callback. The key's task is cancelled when its last
    /// callback goes. Returns false if the callback was not registered.
    pub fn unsubscribe(&self, key: &ListenerKey, callback: &FrameCallback) -> bool {
        let (removed, emptied) = {
            let mut sessions = lock(&self.sessions);
            let Some(session) = sessions.get(key) else {
                return false;
            };

            let (removed, now_empty) = {
                let mut callbacks = lock(&session.callbacks);
                let removed = callbacks
                    .iter()
                    .position(|c| same_callback(c, callback))
                    .map(|pos| callbacks.remove(pos));
                (removed, callbacks.is_empty())
            };

            let emptied = if now_empty {
                sessions.remove(key)
            } else {
                None
            };
            (removed, emptied)
        };

        if let Some(session) = emptied {
            tlog!(
                "[listener] Last callback removed, stopping {} every {}ms",
                key.device_id,
                key.polling_interval_ms
            );
            self.retire(vec![session]);
        }
        removed.is_some()
    }

    /// Cancel every key of `device_id`. Returns how many keys were cancelled.
    pub fn unsubscribe_all(&self, device_id: DeviceId) -> usize {
        let removed: Vec<ListenerSession> = {
            let mut sessions = lock(&self.sessions);
            let keys: Vec<ListenerKey> = sessions
                .keys()
                .filter(|k| k.device_id == device_id)
                .copied()
                .collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };

        let count = removed.len();
        if count > 0 {
            tlog!("[listener] Cancelled {} listener(s) for {}", count, device_id);
        }
        self.retire(removed);
        count
    }

    /// Callbacks registered under `key` (0 if the key is unknown).
    pub fn callback_count(&self, key: &ListenerKey) -> usize {
        lock(&self.sessions)
            .get(key)
            .map(|s| lock(&s.callbacks).len())
            .unwrap_or(0)
    }

    /// True while a live task serves `key`.
    pub fn is_listening(&self, key: &ListenerKey) -> bool {
        lock(&self.sessions)
            .get(key)
            .map(|s| !s.task.is_finished())
            .unwrap_or(false)
    }

    pub fn keys_for(&self, device_id: DeviceId) -> Vec<ListenerKey> {
        let mut keys: Vec<ListenerKey> = lock(&self.sessions)
            .keys()
            .filter(|k| k.device_id == device_id)
            .copied()
            .collect();
        keys.sort_by_key(|k| (k.polling_interval_ms, k.wait_time_ms));
        keys
    }

    /// Number of registered keys across all devices.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep a cancelled background task so `join_cancelled` can await it.
    pub(crate) fn park(&self, task: JoinHandle<()>) {
        let mut cancelled = lock(&self.cancelled);
        cancelled.retain(|t| !t.is_finished());
        cancelled.push(task);
    }

    fn retire(&self, sessions: Vec<ListenerSession>) {
        for session in sessions {
            session.cancel();
            self.park(session.task);
        }
    }

    /// Wait for every cancelled task to exit.
    pub async fn join_cancelled(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.cancelled));
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tlog!("[listener] Background task panicked: {}", e);
                }
            }
        }
    }

    /// Cancel every key and wait for all tasks to exit.
    pub async fn shutdown(&self) {
        let removed: Vec<ListenerSession> = {
            let mut sessions = lock(&self.sessions);
            sessions.drain().map(|(_, s)| s).collect()
        };
        self.retire(removed);
        self.join_cancelled().await;
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("keys", &self.len())
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

// ============================================================================
// Polling Task
// ============================================================================

async fn poll_loop(
    device: Weak<CanDevice>,
    key: ListenerKey,
    stop_flag: Arc<AtomicBool>,
    callbacks: Arc<Mutex<Vec<FrameCallback>>>,
    context: Option<Arc<dyn CallbackContext>>,
) {
    let interval = Duration::from_millis(key.polling_interval_ms.max(1));

    loop {
        tokio::time::sleep(interval).await;
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }
        let Some(device) = device.upgrade() else {
            break;
        };

        // receive() checks the pending count first and issues no read when
        // the adapter buffer is empty.
        let label = device.label();
        let result =
            tokio::task::spawn_blocking(move || device.receive(key.wait_time_ms)).await;

        let frames = match result {
            Ok(Ok(frames)) => frames,
            Ok(Err(e)) => {
                tlog!("[listener] Polling {} stopped: {}", label, e);
                break;
            }
            Err(e) => {
                tlog!("[listener] Polling {} task failed: {}", label, e);
                break;
            }
        };

        if frames.is_empty() {
            continue;
        }
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        let snapshot: Vec<FrameCallback> = lock(&callbacks).clone();
        dispatch(snapshot, frames, context.as_ref());
    }
}

fn dispatch(
    callbacks: Vec<FrameCallback>,
    frames: Vec<CanFrame>,
    context: Option<&Arc<dyn CallbackContext>>,
) {
    match context {
        Some(context) => context.post(Box::new(move || {
            for callback in &callbacks {
                callback(&frames);
            }
        })),
        None => {
            for callback in &callbacks {
                callback(&frames);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::device::UsbCanConfig;
    use crate::io::mock::{MockDriver, MockOp};
    use crate::runtime::{CanRuntime, RuntimeOptions};
    use std::sync::atomic::AtomicUsize;

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    fn connected_device(runtime: &CanRuntime) -> Arc<CanDevice> {
        let device = runtime
            .usb_device(UsbCanConfig::default().with_error_polling(None))
            .expect("valid config");
        device.connect().expect("mock connect");
        device
    }

    fn frames(count: u32) -> Vec<CanFrame> {
        (0..count)
            .map(|i| CanFrame::new(0x100 + i, &[i as u8]).unwrap())
            .collect()
    }

    fn counting_callback(counter: Arc<AtomicUsize>) -> FrameCallback {
        Arc::new(move |batch: &[CanFrame]| {
            counter.fetch_add(batch.len(), Ordering::SeqCst);
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_requires_connection() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = runtime.usb_device(UsbCanConfig::default()).unwrap();

        let err = device
            .subscribe(10, 0, counting_callback(Arc::new(AtomicUsize::new(0))))
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert!(runtime.listeners().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_key_survives_concurrent_disconnect() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = runtime
            .usb_device(UsbCanConfig::default().with_error_polling(None))
            .unwrap();

        for round in 0..50u64 {
            device.connect().unwrap();
            let subscriber = {
                let device = device.clone();
                std::thread::spawn(move || {
                    device.subscribe(1 + round, 0, Arc::new(|_: &[CanFrame]| {}))
                })
            };
            device.disconnect();
            let outcome = subscriber.join().unwrap();

            if let Err(e) = outcome {
                assert!(e.is_invalid_state());
            }
            assert!(runtime.listeners().keys_for(device.id()).is_empty());
        }

        runtime.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batches_reach_every_callback() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = connected_device(&runtime);
        let identity = device.identity().unwrap();

        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let key = device.subscribe(5, 0, counting_callback(a.clone())).unwrap();
        let key_b = device.subscribe(5, 0, counting_callback(b.clone())).unwrap();
        assert_eq!(key, key_b);
        assert_eq!(runtime.listeners().callback_count(&key), 2);
        assert_eq!(runtime.listeners().keys_for(device.id()), vec![key]);

        driver.push_frames(identity, &frames(3));
        assert!(wait_until(|| a.load(Ordering::SeqCst) == 3 && b.load(Ordering::SeqCst) == 3).await);

        runtime.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscription_dedup() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = connected_device(&runtime);
        let registry = runtime.listeners();

        let counter = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(counter.clone());
        let other = counting_callback(Arc::new(AtomicUsize::new(0)));

        let key = device.subscribe(5, 0, callback.clone()).unwrap();
        device.subscribe(5, 0, callback.clone()).unwrap();
        assert_eq!(registry.callback_count(&key), 1);

        // Single delivery per batch despite the double subscribe.
        driver.push_frames(device.identity().unwrap(), &frames(2));
        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 2).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        device.subscribe(5, 0, other.clone()).unwrap();
        assert_eq!(registry.callback_count(&key), 2);

        assert!(device.unsubscribe(&key, &callback));
        assert!(!device.unsubscribe(&key, &callback));
        assert_eq!(registry.callback_count(&key), 1);
        assert!(registry.is_listening(&key));

        assert!(device.unsubscribe(&key, &other));
        assert_eq!(registry.callback_count(&key), 0);
        assert!(!registry.is_listening(&key));
        assert!(registry.keys_for(device.id()).is_empty());

        registry.join_cancelled().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_distinct_keys_get_distinct_tasks() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = connected_device(&runtime);
        let callback = counting_callback(Arc::new(AtomicUsize::new(0)));

        let fast = device.subscribe(5, 0, callback.clone()).unwrap();
        let slow = device.subscribe(50, 0, callback.clone()).unwrap();
        let waiting = device.subscribe(5, 10, callback).unwrap();
        assert_ne!(fast, slow);
        assert_ne!(fast, waiting);
        assert_eq!(runtime.listeners().keys_for(device.id()).len(), 3);

        device.disconnect();
        assert!(runtime.listeners().keys_for(device.id()).is_empty());
        runtime.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batches_arrive_in_drain_order() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = connected_device(&runtime);
        let identity = device.identity().unwrap();

        let seen = Arc::new(Mutex::new(Vec::<u32>::new()));
        let s = seen.clone();
        let callback: FrameCallback = Arc::new(move |batch: &[CanFrame]| {
            s.lock().unwrap().extend(batch.iter().map(|f| f.id));
        });
        device.subscribe(2, 0, callback).unwrap();

        let all = frames(40);
        for chunk in all.chunks(10) {
            driver.push_frames(identity, chunk);
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        assert!(wait_until(|| seen.lock().unwrap().len() == 40).await);
        let expected: Vec<u32> = all.iter().map(|f| f.id).collect();
        assert_eq!(*seen.lock().unwrap(), expected);

        runtime.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_receive_failure_tears_down_and_reports_lost_once() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = connected_device(&runtime);
        let identity = device.identity().unwrap();

        let lost = Arc::new(AtomicUsize::new(0));
        let l = lost.clone();
        device.on_connection_lost(move |_| {
            l.fetch_add(1, Ordering::SeqCst);
        });

        let counter = Arc::new(AtomicUsize::new(0));
        let key_a = device.subscribe(5, 0, counting_callback(counter.clone())).unwrap();
        let key_b = device.subscribe(7, 0, counting_callback(counter.clone())).unwrap();

        driver.fail(MockOp::Receive);
        driver.push_frames(identity, &frames(1));

        assert!(wait_until(|| lost.load(Ordering::SeqCst) == 1).await);
        assert!(!device.is_connected());
        assert!(!runtime.listeners().is_listening(&key_a));
        assert!(!runtime.listeners().is_listening(&key_b));

        runtime.listeners().join_cancelled().await;
        let receives = driver.call_count(MockOp::Receive);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(driver.call_count(MockOp::Receive), receives);
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_device_ends_polling() {
        let driver = Arc::new(MockDriver::new());
        let runtime = CanRuntime::new(driver.clone());
        let device = connected_device(&runtime);
        let key = device
            .subscribe(5, 0, counting_callback(Arc::new(AtomicUsize::new(0))))
            .unwrap();

        drop(device);
        assert!(wait_until(|| !runtime.listeners().is_listening(&key)).await);
        assert!(wait_until(|| !driver.is_open(crate::io::DeviceType::UsbCan1, 0)).await);
        runtime.listeners().join_cancelled().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_callbacks_run_on_captured_context() {
        let driver = Arc::new(MockDriver::new());
        let (context, mut pump) = QueuedContext::new();
        let runtime = CanRuntime::with_options(
            driver.clone(),
            RuntimeOptions {
                callback_context: Some(context),
                ..Default::default()
            },
        );
        let device = connected_device(&runtime);
        let identity = device.identity().unwrap();

        let pump_thread = std::thread::current().id();
        let ran_on = Arc::new(Mutex::new(Vec::new()));
        let r = ran_on.clone();
        let callback: FrameCallback = Arc::new(move |batch: &[CanFrame]| {
            r.lock().unwrap().push((std::thread::current().id(), batch.len()));
        });
        device.subscribe(5, 0, callback).unwrap();

        driver.push_frames(identity, &frames(4));
        let mut ran = 0;
        for _ in 0..50 {
            ran += pump.run_for(Duration::from_millis(10)).await;
            if ran > 0 {
                break;
            }
        }
        assert_eq!(ran, 1);
        assert_eq!(*ran_on.lock().unwrap(), vec![(pump_thread, 4)]);

        runtime.shutdown().await;
    }
}
