// src/runtime.rs
//
// The object that owns everything device sessions share: the driver, the
// device index allocator and the listener registry. Sessions created from
// the same runtime never collide on a driver index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::io::{
    CallbackContext, CanDevice, CanDriver, DeviceId, DeviceIndexAllocator, ListenerRegistry,
    Result, TcpCanConfig, UsbCanConfig,
};

/// Optional runtime wiring.
#[derive(Default)]
pub struct RuntimeOptions {
    /// Tokio runtime for listener and monitor tasks. Defaults to the runtime
    /// current at construction, if any.
    pub handle: Option<Handle>,
    /// Context that callbacks and device events are posted to.
    pub callback_context: Option<Arc<dyn CallbackContext>>,
}

struct RuntimeInner {
    driver: Arc<dyn CanDriver>,
    allocator: DeviceIndexAllocator,
    listeners: ListenerRegistry,
    next_device_id: AtomicU64,
}

/// Shared state for a group of device sessions. Cheap to clone.
#[derive(Clone)]
pub struct CanRuntime {
    inner: Arc<RuntimeInner>,
}

impl CanRuntime {
    pub fn new(driver: Arc<dyn CanDriver>) -> Self {
        Self::with_options(driver, RuntimeOptions::default())
    }

    pub fn with_options(driver: Arc<dyn CanDriver>, options: RuntimeOptions) -> Self {
        let handle = options.handle.or_else(|| Handle::try_current().ok());
        if handle.is_none() {
            tlog!("[runtime] No tokio runtime available, listeners and error monitoring disabled");
        }
        Self {
            inner: Arc::new(RuntimeInner {
                driver,
                allocator: DeviceIndexAllocator::new(),
                listeners: ListenerRegistry::new(handle, options.callback_context),
                next_device_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn driver(&self) -> &Arc<dyn CanDriver> {
        &self.inner.driver
    }

    pub fn allocator(&self) -> &DeviceIndexAllocator {
        &self.inner.allocator
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    pub(crate) fn next_device_id(&self) -> DeviceId {
        DeviceId(self.inner.next_device_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn usb_device(&self, config: UsbCanConfig) -> Result<Arc<CanDevice>> {
        CanDevice::usb(self, config)
    }

    pub fn tcp_device(&self, config: TcpCanConfig) -> Result<Arc<CanDevice>> {
        CanDevice::tcp(self, config)
    }

    /// Cancel every listener and wait for all background tasks to exit.
    pub async fn shutdown(&self) {
        self.inner.listeners.shutdown().await;
    }
}

impl std::fmt::Debug for CanRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanRuntime")
            .field("driver", &self.inner.driver.name())
            .field("listeners", &self.inner.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MockDriver;

    #[test]
    fn test_device_ids_are_unique() {
        let runtime = CanRuntime::new(Arc::new(MockDriver::new()));
        let a = runtime.usb_device(UsbCanConfig::default()).unwrap();
        let b = runtime.usb_device(UsbCanConfig::default()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_without_tokio_runtime_listeners_are_unavailable() {
        let runtime = CanRuntime::new(Arc::new(MockDriver::new()));
        assert!(runtime.listeners().handle().is_none());

        // The monitor is skipped; the session still connects.
        let device = runtime.usb_device(UsbCanConfig::default()).unwrap();
        device.connect().unwrap();
        let err = device
            .subscribe(10, 0, Arc::new(|_: &[crate::io::CanFrame]| {}))
            .unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[tokio::test]
    async fn test_captures_current_tokio_runtime() {
        let runtime = CanRuntime::new(Arc::new(MockDriver::new()));
        assert!(runtime.listeners().handle().is_some());
        runtime.shutdown().await;
    }
}
