// src/io/device.rs
//
// Device session for one CAN channel of a ZLG adapter.
//
// State machine:
//   Created --connect--> Connected --disconnect--> Disconnected --connect--> ...
//   any state --dispose--> Disposed (terminal)
//
// A driver failure while connected marks the session not connected, cancels
// its listeners and error monitor, and raises `ConnectionLost` exactly once
// for that connection. The native handle stays open until `disconnect()`.
// Nothing reconnects automatically.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::codec::{encode_ip_reference, encode_u32_reference};
use super::error::{CanError, Result};
use super::events::{
    spawn_error_monitor, ConnectionLost, ErrorOccurred, EventHub, EventSubscription,
    DEFAULT_ERROR_POLLING_INTERVAL_MS,
};
use super::listener::{FrameCallback, ListenerKey};
use super::types::{BoardInfo, ControllerStatus, ErrorInfo, InitConfig, ReferenceCommand, TcpMode};
use super::{CanFrame, DeviceId, DeviceIdentity, DeviceType};
use crate::runtime::CanRuntime;

/// Largest number of frames requested from the driver in one receive call.
pub const MAX_RECEIVE_BATCH: u32 = 2500;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn default_error_polling() -> Option<u64> {
    Some(DEFAULT_ERROR_POLLING_INTERVAL_MS)
}

fn check_reference_len(command: ReferenceCommand, len: usize) -> Result<()> {
    if len != command.payload_len() {
        return Err(CanError::configuration(format!(
            "{:?} takes a {} byte payload, got {}",
            command,
            command.payload_len(),
            len
        )));
    }
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

/// USB-CAN adapter channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbCanConfig {
    #[serde(default = "UsbCanConfig::default_device_type")]
    pub device_type: DeviceType,
    /// Physical adapter slot; allocated from the lowest free index when unset
    #[serde(default)]
    pub device_index: Option<u32>,
    #[serde(default)]
    pub can_index: u32,
    #[serde(default)]
    pub init: InitConfig,
    /// Error monitor cadence; `None` disables the monitor
    #[serde(default = "default_error_polling")]
    pub error_polling_interval_ms: Option<u64>,
}

impl UsbCanConfig {
    fn default_device_type() -> DeviceType {
        DeviceType::UsbCan1
    }

    pub fn new(device_type: DeviceType, can_index: u32) -> Self {
        Self {
            device_type,
            can_index,
            ..Self::default()
        }
    }

    pub fn with_device_index(mut self, device_index: u32) -> Self {
        self.device_index = Some(device_index);
        self
    }

    pub fn with_init(mut self, init: InitConfig) -> Self {
        self.init = init;
        self
    }

    pub fn with_error_polling(mut self, interval_ms: Option<u64>) -> Self {
        self.error_polling_interval_ms = interval_ms;
        self
    }
}

impl Default for UsbCanConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::UsbCan1,
            device_index: None,
            can_index: 0,
            init: InitConfig::default(),
            error_polling_interval_ms: default_error_polling(),
        }
    }
}

/// CANET network bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpCanConfig {
    #[serde(default = "TcpCanConfig::default_device_type")]
    pub device_type: DeviceType,
    /// Bridge address, IPv4 or IPv6 literal
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub can_index: u32,
    /// Working mode to set before starting; left at the adapter's setting when unset
    #[serde(default)]
    pub tcp_mode: Option<TcpMode>,
    #[serde(default = "default_error_polling")]
    pub error_polling_interval_ms: Option<u64>,
}

impl TcpCanConfig {
    fn default_device_type() -> DeviceType {
        DeviceType::CanetTcp
    }

    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            device_type: DeviceType::CanetTcp,
            ip: ip.into(),
            port,
            can_index: 0,
            tcp_mode: None,
            error_polling_interval_ms: default_error_polling(),
        }
    }

    pub fn with_can_index(mut self, can_index: u32) -> Self {
        self.can_index = can_index;
        self
    }

    pub fn with_tcp_mode(mut self, mode: TcpMode) -> Self {
        self.tcp_mode = Some(mode);
        self
    }

    pub fn with_error_polling(mut self, interval_ms: Option<u64>) -> Self {
        self.error_polling_interval_ms = interval_ms;
        self
    }
}

// ============================================================================
// Session State
// ============================================================================

#[derive(Debug)]
enum Transport {
    Usb {
        device_index: Option<u32>,
        init: InitConfig,
    },
    Tcp {
        ip: IpAddr,
        port: u16,
        tcp_mode: Option<TcpMode>,
    },
}

#[derive(Debug, Default)]
struct HandleState {
    device_index: Option<u32>,
    opened: bool,
}

#[derive(Debug, Default)]
struct Telemetry {
    board_info: Option<BoardInfo>,
    error_info: Option<ErrorInfo>,
    status: Option<ControllerStatus>,
}

struct MonitorTask {
    stop_flag: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// One CAN channel of an adapter.
pub struct CanDevice {
    id: DeviceId,
    device_type: DeviceType,
    can_index: u32,
    transport: Transport,
    error_polling_interval: Option<Duration>,
    runtime: CanRuntime,
    weak_self: Weak<CanDevice>,

    /// Serialises connect, disconnect, reset and dispose.
    lifecycle: Mutex<()>,
    handle: Mutex<HandleState>,
    connected: AtomicBool,
    disposed: AtomicBool,
    telemetry: Mutex<Telemetry>,
    monitor: Mutex<Option<MonitorTask>>,

    connection_lost: EventHub<ConnectionLost>,
    error_occurred: EventHub<ErrorOccurred>,
}

impl CanDevice {
    /// Session for a USB-CAN adapter channel.
    pub fn usb(runtime: &CanRuntime, config: UsbCanConfig) -> Result<Arc<Self>> {
        if config.device_type.is_network() {
            return Err(CanError::configuration(format!(
                "{} is a network adapter, use a TCP configuration",
                config.device_type
            )));
        }
        Ok(Self::build(
            runtime,
            config.device_type,
            config.can_index,
            Transport::Usb {
                device_index: config.device_index,
                init: config.init,
            },
            config.error_polling_interval_ms,
        ))
    }

    /// Session for a CANET bridge reached over the network.
    pub fn tcp(runtime: &CanRuntime, config: TcpCanConfig) -> Result<Arc<Self>> {
        if !config.device_type.is_network() {
            return Err(CanError::configuration(format!(
                "{} is not a network adapter",
                config.device_type
            )));
        }
        let ip: IpAddr = config
            .ip
            .trim()
            .parse()
            .map_err(|_| CanError::configuration(format!("invalid IP address '{}'", config.ip)))?;
        if config.port == 0 {
            return Err(CanError::configuration("port must be non-zero"));
        }
        Ok(Self::build(
            runtime,
            config.device_type,
            config.can_index,
            Transport::Tcp {
                ip,
                port: config.port,
                tcp_mode: config.tcp_mode,
            },
            config.error_polling_interval_ms,
        ))
    }

    fn build(
        runtime: &CanRuntime,
        device_type: DeviceType,
        can_index: u32,
        transport: Transport,
        error_polling_interval_ms: Option<u64>,
    ) -> Arc<Self> {
        let context = runtime.listeners().context().cloned();
        Arc::new_cyclic(|weak_self| CanDevice {
            id: runtime.next_device_id(),
            device_type,
            can_index,
            transport,
            error_polling_interval: error_polling_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            runtime: runtime.clone(),
            weak_self: weak_self.clone(),
            lifecycle: Mutex::new(()),
            handle: Mutex::new(HandleState::default()),
            connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            telemetry: Mutex::new(Telemetry::default()),
            monitor: Mutex::new(None),
            connection_lost: EventHub::new("connection_lost", context.clone()),
            error_occurred: EventHub::new("error_occurred", context),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn can_index(&self) -> u32 {
        self.can_index
    }

    /// Driver index, held only while the handle is open.
    pub fn device_index(&self) -> Option<u32> {
        lock(&self.handle).device_index
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.device_index().map(|device_index| DeviceIdentity {
            device_type: self.device_type,
            device_index,
            can_index: self.can_index,
        })
    }

    /// "UsbCan1#0/0" style label for logs and errors.
    pub fn label(&self) -> String {
        match self.device_index() {
            Some(index) => format!("{}#{}/{}", self.device_type, index, self.can_index),
            None => format!("{}#?/{}", self.device_type, self.can_index),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_opened(&self) -> bool {
        lock(&self.handle).opened
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn error_polling_interval(&self) -> Option<Duration> {
        self.error_polling_interval
    }

    pub fn runtime(&self) -> &CanRuntime {
        &self.runtime
    }

    pub(crate) fn weak(&self) -> Weak<CanDevice> {
        self.weak_self.clone()
    }

    /// Last board info read successfully.
    pub fn board_info(&self) -> Option<BoardInfo> {
        lock(&self.telemetry).board_info.clone()
    }

    /// Last error info read successfully.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        lock(&self.telemetry).error_info
    }

    /// Last controller status read successfully.
    pub fn status(&self) -> Option<ControllerStatus> {
        lock(&self.telemetry).status
    }

    // ========================================================================
    // Guards
    // ========================================================================

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(CanError::invalid_state(&self.label(), "device has been disposed"));
        }
        Ok(())
    }

    fn opened_identity(&self) -> Result<DeviceIdentity> {
        self.ensure_not_disposed()?;
        // label() locks the handle again, so the guard must be gone first.
        let (opened, device_index) = {
            let state = lock(&self.handle);
            (state.opened, state.device_index)
        };
        match (opened, device_index) {
            (true, Some(device_index)) => Ok(DeviceIdentity {
                device_type: self.device_type,
                device_index,
                can_index: self.can_index,
            }),
            _ => Err(CanError::invalid_state(&self.label(), "device is not open")),
        }
    }

    fn connected_identity(&self) -> Result<DeviceIdentity> {
        self.ensure_not_disposed()?;
        if !self.is_connected() {
            return Err(CanError::invalid_state(&self.label(), "device is not connected"));
        }
        self.opened_identity()
    }

    /// Build the error for a failed driver call and apply the failure policy.
    fn fail(&self, operation: &str) -> CanError {
        let err = CanError::device_operation(&self.label(), operation);
        self.mark_lost(operation);
        err
    }

    /// Failure policy. Only the transition out of the connected state acts,
    /// so concurrent failures raise a single `ConnectionLost`.
    pub(crate) fn mark_lost(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let label = self.label();
        tlog!("[device] {} lost: {}", label, reason);
        self.stop_background();
        self.connection_lost.emit(&ConnectionLost {
            device_id: self.id,
            device: label,
            reason: reason.to_string(),
        });
    }

    pub(crate) fn notify_error(&self, info: ErrorInfo) {
        lock(&self.telemetry).error_info = Some(info);
        self.error_occurred.emit(&ErrorOccurred {
            device_id: self.id,
            device: self.label(),
            info,
        });
    }

    fn stop_background(&self) {
        self.runtime.listeners().unsubscribe_all(self.id);
        let monitor = lock(&self.monitor).take();
        if let Some(monitor) = monitor {
            monitor.stop_flag.store(true, Ordering::SeqCst);
            self.runtime.listeners().park(monitor.task);
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the adapter, configure the channel and start it.
    ///
    /// All or nothing: if any step fails the handle is closed, the index is
    /// released and the session stays disconnected. Connecting an already
    /// connected session is a no-op.
    pub fn connect(&self) -> Result<()> {
        let _guard = lock(&self.lifecycle);
        self.ensure_not_disposed()?;
        if self.is_connected() {
            return Ok(());
        }

        let identity = self.open_handle()?;
        let initial_error = match self.bring_up(&identity) {
            Ok(info) => info,
            Err(e) => {
                tlog!("[device] {} connect failed: {}", identity, e);
                self.close_handle();
                return Err(e);
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        self.start_monitor(initial_error);
        tlog!(
            "[device] Connected {} via {}",
            identity,
            self.runtime.driver().name()
        );
        Ok(())
    }

    fn open_handle(&self) -> Result<DeviceIdentity> {
        if let Ok(identity) = self.opened_identity() {
            // Reconnect after reset(): handle and index are still held.
            return Ok(identity);
        }

        let allocator = self.runtime.allocator();
        let index = match &self.transport {
            Transport::Usb {
                device_index: Some(index),
                ..
            } => {
                if !allocator.reserve(self.device_type, *index) {
                    return Err(CanError::invalid_state(
                        &format!("{}#{}/{}", self.device_type, index, self.can_index),
                        "device index is held by another session",
                    ));
                }
                *index
            }
            _ => allocator.allocate(self.device_type),
        };

        if !self.runtime.driver().open(self.device_type, index, 0) {
            allocator.release(self.device_type, index);
            return Err(CanError::device_operation(
                &format!("{}#{}/{}", self.device_type, index, self.can_index),
                "VCI_OpenDevice",
            ));
        }

        let mut state = lock(&self.handle);
        state.device_index = Some(index);
        state.opened = true;
        Ok(DeviceIdentity {
            device_type: self.device_type,
            device_index: index,
            can_index: self.can_index,
        })
    }

    /// Type-specific configuration, error snapshot, then channel start.
    fn bring_up(&self, identity: &DeviceIdentity) -> Result<Option<ErrorInfo>> {
        let driver = self.runtime.driver();
        let label = identity.to_string();

        match &self.transport {
            Transport::Usb { init, .. } => {
                if !driver.init_channel(identity, init) {
                    return Err(CanError::device_operation(&label, "VCI_InitCAN"));
                }
                if !driver.clear_buffer(identity) {
                    return Err(CanError::device_operation(&label, "VCI_ClearBuffer"));
                }
            }
            Transport::Tcp { ip, port, tcp_mode } => {
                let ip_payload = encode_ip_reference(&ip.to_string());
                if !driver.set_reference(
                    identity,
                    ReferenceCommand::SetDestinationIp.code(),
                    &ip_payload,
                ) {
                    return Err(CanError::device_operation(
                        &label,
                        "VCI_SetReference(SetDestinationIp)",
                    ));
                }
                if !driver.set_reference(
                    identity,
                    ReferenceCommand::SetDestinationPort.code(),
                    &encode_u32_reference(u32::from(*port)),
                ) {
                    return Err(CanError::device_operation(
                        &label,
                        "VCI_SetReference(SetDestinationPort)",
                    ));
                }
                if let Some(mode) = tcp_mode {
                    if !driver.set_reference(
                        identity,
                        ReferenceCommand::TcpMode.code(),
                        &encode_u32_reference(mode.reference_value()),
                    ) {
                        return Err(CanError::device_operation(
                            &label,
                            "VCI_SetReference(TcpMode)",
                        ));
                    }
                }
            }
        }

        // Best effort: the snapshot only seeds the error monitor.
        let initial_error = driver.read_error_info(identity);
        if let Some(info) = initial_error {
            lock(&self.telemetry).error_info = Some(info);
        }

        if !driver.start_channel(identity) {
            return Err(CanError::device_operation(&label, "VCI_StartCAN"));
        }
        Ok(initial_error)
    }

    fn start_monitor(&self, initial: Option<ErrorInfo>) {
        let Some(interval) = self.error_polling_interval else {
            return;
        };
        let Some(handle) = self.runtime.listeners().handle() else {
            tlog!(
                "[device] {} has no tokio runtime, error monitor disabled",
                self.label()
            );
            return;
        };

        let stop_flag = Arc::new(AtomicBool::new(false));
        let task = spawn_error_monitor(
            handle,
            self.weak_self.clone(),
            interval,
            initial,
            stop_flag.clone(),
        );
        let previous = lock(&self.monitor).replace(MonitorTask { stop_flag, task });
        if let Some(previous) = previous {
            previous.stop_flag.store(true, Ordering::SeqCst);
            self.runtime.listeners().park(previous.task);
        }
    }

    /// Release the native handle and index. The session stays usable and may
    /// connect again. Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        let _guard = lock(&self.lifecycle);
        self.disconnect_locked();
    }

    fn disconnect_locked(&self) {
        let label = self.label();
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.stop_background();
        let closed = self.close_handle();
        *lock(&self.telemetry) = Telemetry::default();
        if was_connected || closed {
            tlog!("[device] Disconnected {}", label);
        }
    }

    /// Close the handle if open and release the index. Returns true if a
    /// handle was held.
    fn close_handle(&self) -> bool {
        let (index, opened) = {
            let mut state = lock(&self.handle);
            (state.device_index.take(), std::mem::take(&mut state.opened))
        };
        let Some(index) = index else {
            return false;
        };
        if opened && !self.runtime.driver().close(self.device_type, index) {
            tlog!(
                "[device] VCI_CloseDevice failed for {}#{}",
                self.device_type,
                index
            );
        }
        self.runtime.allocator().release(self.device_type, index);
        opened
    }

    /// Disconnect and make the session unusable.
    pub fn dispose(&self) {
        let _guard = lock(&self.lifecycle);
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.disconnect_locked();
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Reset the channel. Cancels listeners and the error monitor and leaves
    /// the session not connected; the handle stays open so `connect()`
    /// restarts the channel.
    pub fn reset(&self) -> Result<()> {
        let _guard = lock(&self.lifecycle);
        let identity = self.opened_identity()?;
        if !self.runtime.driver().reset_channel(&identity) {
            return Err(self.fail("VCI_ResetCAN"));
        }
        self.connected.store(false, Ordering::SeqCst);
        self.stop_background();
        tlog!("[device] Reset {}", identity);
        Ok(())
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    pub fn read_board_info(&self) -> Result<BoardInfo> {
        let identity = self.opened_identity()?;
        let info = self
            .runtime
            .driver()
            .read_board_info(identity.device_type, identity.device_index)
            .ok_or_else(|| self.fail("VCI_ReadBoardInfo"))?;
        lock(&self.telemetry).board_info = Some(info.clone());
        Ok(info)
    }

    pub fn read_error_info(&self) -> Result<ErrorInfo> {
        let identity = self.opened_identity()?;
        let info = self
            .runtime
            .driver()
            .read_error_info(&identity)
            .ok_or_else(|| self.fail("VCI_ReadErrInfo"))?;
        lock(&self.telemetry).error_info = Some(info);
        Ok(info)
    }

    pub fn read_status(&self) -> Result<ControllerStatus> {
        let identity = self.opened_identity()?;
        let status = self
            .runtime
            .driver()
            .read_status(&identity)
            .ok_or_else(|| self.fail("VCI_ReadCANStatus"))?;
        lock(&self.telemetry).status = Some(status);
        Ok(status)
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Frames waiting in the adapter's receive buffer.
    pub fn pending_frame_count(&self) -> Result<u32> {
        let identity = self.connected_identity()?;
        Ok(self.runtime.driver().pending_frame_count(&identity))
    }

    /// Drain the frames pending when the call starts.
    ///
    /// Reads at most `MAX_RECEIVE_BATCH` frames per driver call and stops
    /// early if a read comes back empty. Frames that arrive during the drain
    /// are left for the next call. Returns an empty vector when nothing is
    /// pending.
    pub fn receive(&self, wait_time_ms: i32) -> Result<Vec<CanFrame>> {
        let identity = self.connected_identity()?;
        let driver = self.runtime.driver();

        let mut outstanding = driver.pending_frame_count(&identity);
        let mut frames = Vec::with_capacity(outstanding.min(MAX_RECEIVE_BATCH) as usize);

        while outstanding > 0 {
            let batch = outstanding.min(MAX_RECEIVE_BATCH);
            let received = driver
                .receive(&identity, batch, wait_time_ms)
                .ok_or_else(|| self.fail("VCI_Receive"))?;
            if received.is_empty() {
                break;
            }
            outstanding = outstanding.saturating_sub(received.len() as u32);
            frames.extend(received);
        }
        Ok(frames)
    }

    /// Queue frames for transmission. Returns how many the driver accepted,
    /// which may be fewer than requested.
    pub fn transmit(&self, frames: &[CanFrame]) -> Result<u32> {
        if frames.is_empty() {
            return Err(CanError::invalid_state(&self.label(), "nothing to transmit"));
        }
        let identity = self.connected_identity()?;
        let accepted = self.runtime.driver().transmit(&identity, frames);
        if accepted == 0 {
            return Err(self.fail("VCI_Transmit"));
        }
        Ok(accepted)
    }

    /// Send one normal standard data frame. True if the driver accepted it.
    pub fn transmit_data(&self, id: u32, data: &[u8]) -> Result<bool> {
        let frame = CanFrame::new(id, data)?;
        Ok(self.transmit(&[frame])? == 1)
    }

    // ========================================================================
    // Adapter References
    // ========================================================================

    /// Send an adapter configuration command. `payload` must be exactly
    /// `command.payload_len()` bytes.
    pub fn set_reference(&self, command: ReferenceCommand, payload: &[u8]) -> Result<()> {
        check_reference_len(command, payload.len())?;
        let identity = self.opened_identity()?;
        if !self
            .runtime
            .driver()
            .set_reference(&identity, command.code(), payload)
        {
            return Err(self.fail("VCI_SetReference"));
        }
        Ok(())
    }

    /// Read an adapter configuration value into `payload`, which must be
    /// exactly `command.payload_len()` bytes.
    pub fn get_reference(&self, command: ReferenceCommand, payload: &mut [u8]) -> Result<()> {
        check_reference_len(command, payload.len())?;
        let identity = self.opened_identity()?;
        if !self
            .runtime
            .driver()
            .get_reference(&identity, command.code(), payload)
        {
            return Err(self.fail("VCI_GetReference"));
        }
        Ok(())
    }

    // ========================================================================
    // Listeners and Events
    // ========================================================================

    /// Deliver received batches to `callback` every `polling_interval_ms`.
    pub fn subscribe(
        &self,
        polling_interval_ms: u64,
        wait_time_ms: i32,
        callback: FrameCallback,
    ) -> Result<ListenerKey> {
        self.ensure_not_disposed()?;
        self.runtime
            .listeners()
            .subscribe(self, polling_interval_ms, wait_time_ms, callback)
    }

    pub fn unsubscribe(&self, key: &ListenerKey, callback: &FrameCallback) -> bool {
        key.device_id == self.id && self.runtime.listeners().unsubscribe(key, callback)
    }

    /// Cancel every listener of this device.
    pub fn unsubscribe_all(&self) -> usize {
        self.runtime.listeners().unsubscribe_all(self.id)
    }

    pub fn listener_keys(&self) -> Vec<ListenerKey> {
        self.runtime.listeners().keys_for(self.id)
    }

    pub fn on_connection_lost<F>(&self, observer: F) -> EventSubscription
    where
        F: Fn(&ConnectionLost) + Send + Sync + 'static,
    {
        self.connection_lost.subscribe(observer)
    }

    pub fn remove_connection_lost(&self, subscription: &EventSubscription) -> bool {
        self.connection_lost.unsubscribe(subscription)
    }

    pub fn on_error_occurred<F>(&self, observer: F) -> EventSubscription
    where
        F: Fn(&ErrorOccurred) + Send + Sync + 'static,
    {
        self.error_occurred.subscribe(observer)
    }

    pub fn remove_error_occurred(&self, subscription: &EventSubscription) -> bool {
        self.error_occurred.unsubscribe(subscription)
    }
}

impl Drop for CanDevice {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) {
            self.disconnect_locked();
        }
    }
}

impl std::fmt::Debug for CanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanDevice")
            .field("id", &self.id)
            .field("label", &self.label())
            .field("connected", &self.is_connected())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
