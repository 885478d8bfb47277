// src/io/driver.rs
//
// The boundary to the vendor call surface. Device sessions never touch FFI
// directly; they call through `CanDriver`, which is implemented by the
// native binding and by the scripted mock used in tests.

use super::types::{BoardInfo, ControllerStatus, ErrorInfo, InitConfig};
use super::{CanFrame, DeviceIdentity, DeviceType};

/// Synchronous driver port.
///
/// Every method may block (USB round trips, TCP bridges, receive waits) and
/// must therefore be called from the blocking pool when used in async code.
/// Failures carry no detail: the vendor driver only reports them as a zero
/// return, mirrored here as `false`, `None` or `0`.
pub trait CanDriver: Send + Sync + 'static {
    /// Short name for logging ("controlcan", "mock").
    fn name(&self) -> &str;

    fn open(&self, device_type: DeviceType, device_index: u32, reserved: u32) -> bool;

    fn close(&self, device_type: DeviceType, device_index: u32) -> bool;

    fn init_channel(&self, identity: &DeviceIdentity, config: &InitConfig) -> bool;

    fn start_channel(&self, identity: &DeviceIdentity) -> bool;

    fn reset_channel(&self, identity: &DeviceIdentity) -> bool;

    fn clear_buffer(&self, identity: &DeviceIdentity) -> bool;

    /// Number of frames waiting in the adapter's receive buffer.
    fn pending_frame_count(&self, identity: &DeviceIdentity) -> u32;

    /// Read up to `max_frames` frames, waiting at most `wait_time_ms`
    /// (-1 waits indefinitely). `None` means the driver reported a fault;
    /// an empty vector means nothing arrived in time.
    fn receive(
        &self,
        identity: &DeviceIdentity,
        max_frames: u32,
        wait_time_ms: i32,
    ) -> Option<Vec<CanFrame>>;

    /// Queue frames for transmission. Returns the number accepted.
    fn transmit(&self, identity: &DeviceIdentity, frames: &[CanFrame]) -> u32;

    fn read_board_info(&self, device_type: DeviceType, device_index: u32) -> Option<BoardInfo>;

    fn read_error_info(&self, identity: &DeviceIdentity) -> Option<ErrorInfo>;

    fn read_status(&self, identity: &DeviceIdentity) -> Option<ControllerStatus>;

    /// Adapter-specific configuration command (see `ReferenceCommand`).
    fn set_reference(&self, identity: &DeviceIdentity, command: u32, payload: &[u8]) -> bool;

    fn get_reference(&self, identity: &DeviceIdentity, command: u32, payload: &mut [u8]) -> bool;
}
