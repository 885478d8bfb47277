// src/io/codec.rs
//
// Byte-exact mirrors of the controlcan driver structs and conversions to the
// logical types. The native binding passes pointers to these across the FFI
// boundary, so field order, widths and padding must match the vendor header.
//
// VCI_CAN_OBJ layout (24 bytes):
//   ID(4) TimeStamp(4) TimeFlag(1) SendType(1) RemoteFlag(1) ExternFlag(1)
//   DataLen(1) Data(8) Reserved(3)

use super::types::{BoardInfo, ControllerStatus, ErrorInfo, InitConfig};
use super::{CanFrame, SendType};

// ============================================================================
// Frame Object
// ============================================================================

/// Mirror of `VCI_CAN_OBJ`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VciCanObj {
    pub id: u32,
    pub time_stamp: u32,
    pub time_flag: u8,
    pub send_type: u8,
    pub remote_flag: u8,
    pub extern_flag: u8,
    pub data_len: u8,
    pub data: [u8; 8],
    pub reserved: [u8; 3],
}

impl VciCanObj {
    pub const SIZE: usize = 24;

    /// Construct from a little-endian byte slice (at least 24 bytes).
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&data[13..21]);
        Some(VciCanObj {
            id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            time_stamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            time_flag: data[8],
            send_type: data[9],
            remote_flag: data[10],
            extern_flag: data[11],
            data_len: data[12],
            data: payload,
            reserved: [data[21], data[22], data[23]],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.time_stamp.to_le_bytes());
        out[8] = self.time_flag;
        out[9] = self.send_type;
        out[10] = self.remote_flag;
        out[11] = self.extern_flag;
        out[12] = self.data_len;
        out[13..21].copy_from_slice(&self.data);
        out[21..24].copy_from_slice(&self.reserved);
        out
    }
}

impl From<&CanFrame> for VciCanObj {
    fn from(frame: &CanFrame) -> Self {
        VciCanObj {
            id: frame.id,
            time_stamp: frame.timestamp,
            time_flag: frame.time_flag as u8,
            send_type: frame.send_type as u8,
            remote_flag: frame.remote_flag as u8,
            extern_flag: frame.extern_flag as u8,
            data_len: frame.data_len,
            data: frame.data,
            reserved: frame.reserved,
        }
    }
}

impl From<&VciCanObj> for CanFrame {
    fn from(obj: &VciCanObj) -> Self {
        CanFrame {
            id: obj.id,
            timestamp: obj.time_stamp,
            time_flag: obj.time_flag != 0,
            send_type: SendType::from_code(obj.send_type),
            remote_flag: obj.remote_flag != 0,
            extern_flag: obj.extern_flag != 0,
            data_len: obj.data_len.min(8),
            data: obj.data,
            reserved: obj.reserved,
        }
    }
}

// ============================================================================
// Channel Configuration
// ============================================================================

/// Mirror of `VCI_INIT_CONFIG`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VciInitConfig {
    pub acc_code: u32,
    pub acc_mask: u32,
    pub reserved: u32,
    pub filter: u8,
    pub timing0: u8,
    pub timing1: u8,
    pub mode: u8,
}

impl VciInitConfig {
    pub const SIZE: usize = 16;
}

impl From<&InitConfig> for VciInitConfig {
    fn from(config: &InitConfig) -> Self {
        VciInitConfig {
            acc_code: config.acceptance_code,
            acc_mask: config.acceptance_mask,
            reserved: config.reserved,
            filter: config.filter,
            timing0: config.timing0,
            timing1: config.timing1,
            mode: config.mode,
        }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Mirror of `VCI_BOARD_INFO`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VciBoardInfo {
    pub hw_version: u16,
    pub fw_version: u16,
    pub dr_version: u16,
    pub in_version: u16,
    pub irq_num: u16,
    pub can_num: u8,
    pub str_serial_num: [u8; 20],
    pub str_hw_type: [u8; 40],
    pub reserved: [u8; 8],
}

impl VciBoardInfo {
    pub const SIZE: usize = 80;
}

impl Default for VciBoardInfo {
    fn default() -> Self {
        VciBoardInfo {
            hw_version: 0,
            fw_version: 0,
            dr_version: 0,
            in_version: 0,
            irq_num: 0,
            can_num: 0,
            str_serial_num: [0; 20],
            str_hw_type: [0; 40],
            reserved: [0; 8],
        }
    }
}

impl From<&VciBoardInfo> for BoardInfo {
    fn from(raw: &VciBoardInfo) -> Self {
        BoardInfo {
            hardware_version: raw.hw_version,
            firmware_version: raw.fw_version,
            driver_version: raw.dr_version,
            interface_version: raw.in_version,
            irq_number: raw.irq_num,
            can_channel_count: raw.can_num,
            serial_number: raw.str_serial_num,
            hardware_type: raw.str_hw_type,
            reserved: raw.reserved,
        }
    }
}

/// Mirror of `VCI_ERR_INFO`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VciErrInfo {
    pub error_code: u32,
    pub passive_err_data: [u8; 3],
    pub arlost_err_data: u8,
}

impl VciErrInfo {
    pub const SIZE: usize = 8;
}

impl From<&VciErrInfo> for ErrorInfo {
    fn from(raw: &VciErrInfo) -> Self {
        ErrorInfo {
            error_code: raw.error_code,
            passive_error_data: raw.passive_err_data,
            arbitration_lost_error_data: raw.arlost_err_data,
        }
    }
}

/// Mirror of `VCI_CAN_STATUS`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VciCanStatus {
    pub err_interrupt: u8,
    pub reg_mode: u8,
    pub reg_status: u8,
    pub reg_al_capture: u8,
    pub reg_ec_capture: u8,
    pub reg_ew_limit: u8,
    pub reg_re_counter: u8,
    pub reg_te_counter: u8,
    pub reserved: [u8; 4],
}

impl VciCanStatus {
    pub const SIZE: usize = 12;
}

impl From<&VciCanStatus> for ControllerStatus {
    fn from(raw: &VciCanStatus) -> Self {
        ControllerStatus {
            error_interrupt: raw.err_interrupt,
            mode_register: raw.reg_mode,
            status_register: raw.reg_status,
            arbitration_lost_capture: raw.reg_al_capture,
            error_code_capture: raw.reg_ec_capture,
            error_warning_limit: raw.reg_ew_limit,
            receive_error_counter: raw.reg_re_counter,
            transmit_error_counter: raw.reg_te_counter,
            reserved: raw.reserved,
        }
    }
}

// ============================================================================
// Reference Payloads
// ============================================================================

/// Length of the destination-IP payload expected by the CANET reference call.
pub const IP_REFERENCE_LEN: usize = 50;

/// NUL-padded ASCII address for `ReferenceCommand::SetDestinationIp`.
/// Addresses longer than 49 bytes are truncated so the buffer stays terminated.
pub fn encode_ip_reference(ip: &str) -> [u8; IP_REFERENCE_LEN] {
    let mut buf = [0u8; IP_REFERENCE_LEN];
    let bytes = ip.as_bytes();
    let len = bytes.len().min(IP_REFERENCE_LEN - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// Little-endian u32 payload for port and mode reference commands.
pub fn encode_u32_reference(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes_match_vendor_header() {
        assert_eq!(std::mem::size_of::<VciCanObj>(), VciCanObj::SIZE);
        assert_eq!(std::mem::size_of::<VciInitConfig>(), VciInitConfig::SIZE);
        assert_eq!(std::mem::size_of::<VciErrInfo>(), VciErrInfo::SIZE);
        assert_eq!(std::mem::size_of::<VciCanStatus>(), VciCanStatus::SIZE);
        assert_eq!(std::mem::size_of::<VciBoardInfo>(), VciBoardInfo::SIZE);
    }

    #[test]
    fn test_frame_survives_native_layout() {
        let frame = CanFrame {
            id: 0x18DA_F110,
            timestamp: 123_456,
            time_flag: true,
            send_type: SendType::SingleShot,
            remote_flag: false,
            extern_flag: true,
            data_len: 3,
            data: [0xAA, 0xBB, 0xCC, 0, 0, 0, 0, 0],
            reserved: [1, 2, 3],
        };

        let obj = VciCanObj::from(&frame);
        let bytes = obj.to_bytes();
        assert_eq!(&bytes[0..4], &0x18DA_F110u32.to_le_bytes());
        assert_eq!(bytes[9], 1);
        assert_eq!(bytes[12], 3);

        let parsed = VciCanObj::from_bytes(&bytes).expect("24 bytes");
        assert_eq!(parsed, obj);
        assert_eq!(CanFrame::from(&parsed), frame);
    }

    #[test]
    fn test_from_bytes_too_short() {
        assert!(VciCanObj::from_bytes(&[0u8; 23]).is_none());
    }

    #[test]
    fn test_driver_data_len_is_clamped() {
        let obj = VciCanObj {
            data_len: 15,
            ..Default::default()
        };
        assert_eq!(CanFrame::from(&obj).data_len, 8);
    }

    #[test]
    fn test_init_config_conversion() {
        let raw = VciInitConfig::from(&InitConfig::default());
        assert_eq!(raw.acc_code, 0);
        assert_eq!(raw.acc_mask, 0xFFFF_FFFF);
        assert_eq!(raw.filter, 1);
        assert_eq!(raw.timing0, 0x01);
        assert_eq!(raw.timing1, 0x1C);
        assert_eq!(raw.mode, 0);
    }

    #[test]
    fn test_reference_payloads() {
        let ip = encode_ip_reference("192.168.0.178");
        assert_eq!(&ip[..13], b"192.168.0.178");
        assert!(ip[13..].iter().all(|b| *b == 0));

        let long = "x".repeat(80);
        assert_eq!(encode_ip_reference(&long)[IP_REFERENCE_LEN - 1], 0);

        assert_eq!(encode_u32_reference(4001), [0xA1, 0x0F, 0x00, 0x00]);
    }
}
