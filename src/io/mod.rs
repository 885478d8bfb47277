// src/io/mod.rs
//
// Device abstraction over the ZLG controlcan driver.
// Provides device sessions for USB-CAN and CANET adapters, a polling listener
// registry that fans received batches out to callbacks, and the event hubs
// that report device loss and controller errors.

// Core modules
pub mod codec; // Native struct mirrors and conversions
pub mod driver; // CanDriver port
mod error;
pub mod types;

// Sessions and dispatch
pub mod async_ext;
pub mod device;
pub mod events;
pub mod listener;
pub mod registry;

// Driver implementations
#[cfg(feature = "controlcan")]
pub mod controlcan;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use async_ext::AsyncCanDevice;
pub use device::{CanDevice, TcpCanConfig, UsbCanConfig, MAX_RECEIVE_BATCH};
pub use driver::CanDriver;
pub use error::{CanError, Result};
pub use events::{EventHub, EventSubscription};
pub use listener::{
    CallbackContext, ContextPump, FrameCallback, ListenerKey, ListenerRegistry, QueuedContext,
};
pub use registry::DeviceIndexAllocator;
pub use types::{
    BoardInfo, ControllerStatus, ErrorInfo, InitConfig, ReferenceCommand, TcpMode,
};

#[cfg(feature = "controlcan")]
pub use controlcan::ControlCanDriver;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockDriver;

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Device Identity
// ============================================================================

/// Vendor device-type codes accepted by the driver's open call.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    UsbCan1 = 3,
    UsbCan2 = 4,
    CanetUdp = 12,
    CanetTcp = 17,
    #[serde(rename = "UsbCanEU")]
    UsbCanEu = 20,
    #[serde(rename = "UsbCan2EU")]
    UsbCan2Eu = 21,
}

impl DeviceType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            3 => Some(DeviceType::UsbCan1),
            4 => Some(DeviceType::UsbCan2),
            12 => Some(DeviceType::CanetUdp),
            17 => Some(DeviceType::CanetTcp),
            20 => Some(DeviceType::UsbCanEu),
            21 => Some(DeviceType::UsbCan2Eu),
            _ => None,
        }
    }

    /// True for the network bridges configured through reference commands.
    pub fn is_network(self) -> bool {
        matches!(self, DeviceType::CanetUdp | DeviceType::CanetTcp)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::UsbCan1 => "UsbCan1",
            DeviceType::UsbCan2 => "UsbCan2",
            DeviceType::CanetUdp => "CanetUdp",
            DeviceType::CanetTcp => "CanetTcp",
            DeviceType::UsbCanEu => "UsbCanEU",
            DeviceType::UsbCan2Eu => "UsbCan2EU",
        };
        f.write_str(name)
    }
}

/// The (type, index, channel) triple every driver call addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_type: DeviceType,
    pub device_index: u32,
    pub can_index: u32,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.device_type, self.device_index, self.can_index)
    }
}

/// Runtime-unique id assigned to a device session at construction.
/// Stable for the session's lifetime, unlike the driver index which only
/// exists while connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Transmission mode of an outgoing frame.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendType {
    #[default]
    Normal = 0,
    /// No automatic retransmission
    SingleShot = 1,
    /// Self reception
    Loopback = 2,
    SingleShotLoopback = 3,
}

impl SendType {
    /// Decode the driver byte; unknown values read as `Normal`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => SendType::SingleShot,
            2 => SendType::Loopback,
            3 => SendType::SingleShotLoopback,
            _ => SendType::Normal,
        }
    }
}

/// One classic CAN frame as exchanged with the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanFrame {
    /// 11-bit or 29-bit identifier (see `extern_flag`)
    pub id: u32,
    /// Hardware timestamp in 0.1 ms units; meaningful only when `time_flag` is set
    pub timestamp: u32,
    pub time_flag: bool,
    pub send_type: SendType,
    pub remote_flag: bool,
    /// Extended (29-bit) identifier
    pub extern_flag: bool,
    pub data_len: u8,
    pub data: [u8; 8],
    pub reserved: [u8; 3],
}

impl CanFrame {
    /// Maximum classic CAN payload.
    pub const MAX_DATA_LEN: usize = 8;

    /// Normal standard data frame carrying `payload`.
    pub fn new(id: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > Self::MAX_DATA_LEN {
            return Err(CanError::configuration(format!(
                "payload of {} bytes exceeds {} bytes",
                payload.len(),
                Self::MAX_DATA_LEN
            )));
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Ok(CanFrame {
            id,
            data_len: payload.len() as u8,
            data,
            ..Default::default()
        })
    }

    /// Same as `new` with a 29-bit identifier.
    pub fn new_extended(id: u32, payload: &[u8]) -> Result<Self> {
        let mut frame = Self::new(id, payload)?;
        frame.extern_flag = true;
        Ok(frame)
    }

    /// Remote request frame asking for `data_len` bytes.
    pub fn remote(id: u32, data_len: u8) -> Self {
        CanFrame {
            id,
            remote_flag: true,
            data_len: data_len.min(8),
            ..Default::default()
        }
    }

    pub fn with_send_type(mut self, send_type: SendType) -> Self {
        self.send_type = send_type;
        self
    }

    /// The first `data_len` bytes of `data`.
    pub fn payload(&self) -> &[u8] {
        let len = (self.data_len as usize).min(Self::MAX_DATA_LEN);
        &self.data[..len]
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extern_flag {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:03X}", self.id)?;
        }
        if self.remote_flag {
            write!(f, " R [{}]", self.data_len)
        } else {
            write!(f, " [{}] {}", self.data_len, hex::encode_upper(self.payload()))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_codes() {
        assert_eq!(DeviceType::UsbCan1.code(), 3);
        assert_eq!(DeviceType::CanetTcp.code(), 17);
        assert_eq!(DeviceType::UsbCan2Eu.code(), 21);
        assert_eq!(DeviceType::from_code(12), Some(DeviceType::CanetUdp));
        assert_eq!(DeviceType::from_code(99), None);
        assert!(DeviceType::CanetTcp.is_network());
        assert!(!DeviceType::UsbCan2.is_network());
    }

    #[test]
    fn test_new_frame_sets_length_and_pads() {
        let frame = CanFrame::new(0x411, &[1, 2, 3]).unwrap();
        assert_eq!(frame.data_len, 3);
        assert_eq!(frame.data, [1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.send_type, SendType::Normal);
        assert!(!frame.remote_flag);
        assert!(!frame.extern_flag);
    }

    #[test]
    fn test_new_frame_rejects_long_payload() {
        let err = CanFrame::new(0x1, &[0u8; 9]).unwrap_err();
        assert!(matches!(err, CanError::Configuration { .. }));
    }

    #[test]
    fn test_extended_and_remote_frames() {
        let ext = CanFrame::new_extended(0x18FE_F100, &[0xFF]).unwrap();
        assert!(ext.extern_flag);
        assert_eq!(ext.to_string(), "18FEF100 [1] FF");

        let rtr = CanFrame::remote(0x7DF, 12);
        assert!(rtr.remote_flag);
        assert_eq!(rtr.data_len, 8);
        assert_eq!(rtr.to_string(), "7DF R [8]");
    }

    #[test]
    fn test_frame_equality_is_structural() {
        let a = CanFrame::new(0x100, &[1, 2]).unwrap();
        let mut b = a;
        assert_eq!(a, b);
        b.timestamp = 5;
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_display() {
        let identity = DeviceIdentity {
            device_type: DeviceType::UsbCan2,
            device_index: 1,
            can_index: 0,
        };
        assert_eq!(identity.to_string(), "UsbCan2#1/0");
    }
}
