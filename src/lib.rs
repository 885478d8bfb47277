// src/lib.rs
//
// Device session, listener and event-dispatch core for ZLG USB-CAN and
// CANET adapters driven through the vendor `controlcan` library.

#[macro_use]
pub mod logging;

pub mod io;
pub mod runtime;
pub mod settings;

pub use io::{
    AsyncCanDevice, CanDevice, CanDriver, CanError, CanFrame, DeviceId, DeviceIdentity,
    DeviceType, FrameCallback, ListenerKey, Result, TcpCanConfig, UsbCanConfig,
};
pub use runtime::{CanRuntime, RuntimeOptions};
pub use settings::{DeviceProfile, Settings};
