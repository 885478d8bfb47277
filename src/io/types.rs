// src/io/types.rs
//
// Channel configuration and telemetry records read from the adapter.
// Field order and widths follow the vendor structs; see codec.rs for the
// byte-exact mirrors.

use serde::{Deserialize, Serialize};

// ============================================================================
// Channel Configuration
// ============================================================================

/// Filter mode byte of `InitConfig`.
pub mod filter_mode {
    pub const DUAL: u8 = 0;
    pub const SINGLE: u8 = 1;
}

/// Working mode byte of `InitConfig`.
pub mod work_mode {
    pub const NORMAL: u8 = 0;
    pub const LISTEN_ONLY: u8 = 1;
}

/// Channel bring-up parameters passed to the driver's init call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitConfig {
    /// Acceptance code of the hardware filter
    pub acceptance_code: u32,
    /// Acceptance mask of the hardware filter (0xFFFFFFFF accepts everything)
    pub acceptance_mask: u32,
    #[serde(default)]
    pub reserved: u32,
    /// 1 = single filter, 0 = dual filter
    pub filter: u8,
    /// Bit timing register 0 (BTR0)
    pub timing0: u8,
    /// Bit timing register 1 (BTR1)
    pub timing1: u8,
    /// 0 = normal, 1 = listen only
    pub mode: u8,
}

impl Default for InitConfig {
    /// Accept-all filter, normal mode, 250 kbit/s.
    fn default() -> Self {
        Self {
            acceptance_code: 0x0000_0000,
            acceptance_mask: 0xFFFF_FFFF,
            reserved: 0,
            filter: filter_mode::SINGLE,
            timing0: 0x01,
            timing1: 0x1C,
            mode: work_mode::NORMAL,
        }
    }
}

/// Bit timing register pairs (BTR0, BTR1) for the adapter's 16 MHz SJA1000
/// clock, as published in the vendor's interface manual.
pub const COMMON_BITRATES: &[(u32, u8, u8)] = &[
    (10_000, 0x31, 0x1C),
    (20_000, 0x18, 0x1C),
    (40_000, 0x87, 0xFF),
    (50_000, 0x09, 0x1C),
    (80_000, 0x83, 0xFF),
    (100_000, 0x04, 0x1C),
    (125_000, 0x03, 0x1C),
    (200_000, 0x81, 0xFA),
    (250_000, 0x01, 0x1C),
    (400_000, 0x80, 0xFA),
    (500_000, 0x00, 0x1C),
    (666_000, 0x80, 0xB6),
    (800_000, 0x00, 0x16),
    (1_000_000, 0x00, 0x14),
];

/// Get the timing register pair for a common bitrate
pub fn get_timing_for_bitrate(bitrate: u32) -> Option<(u8, u8)> {
    COMMON_BITRATES
        .iter()
        .find(|(rate, _, _)| *rate == bitrate)
        .map(|(_, t0, t1)| (*t0, *t1))
}

impl InitConfig {
    /// Accept-all configuration at one of the `COMMON_BITRATES`.
    pub fn for_bitrate(bitrate: u32) -> Option<Self> {
        let (timing0, timing1) = get_timing_for_bitrate(bitrate)?;
        Some(Self {
            timing0,
            timing1,
            ..Self::default()
        })
    }

    pub fn with_listen_only(mut self, listen_only: bool) -> Self {
        self.mode = if listen_only {
            work_mode::LISTEN_ONLY
        } else {
            work_mode::NORMAL
        };
        self
    }

    pub fn with_filter(mut self, acceptance_code: u32, acceptance_mask: u32) -> Self {
        self.acceptance_code = acceptance_code;
        self.acceptance_mask = acceptance_mask;
        self
    }
}

// ============================================================================
// Reference Commands
// ============================================================================

/// Command codes for the driver's set/get reference calls on CANET adapters.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceCommand {
    SetDestinationIp = 0,
    SetDestinationPort = 1,
    SetSourcePort = 2,
    /// TCP working mode: 1 = server, 0 = client
    TcpMode = 4,
}

impl ReferenceCommand {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ReferenceCommand::SetDestinationIp),
            1 => Some(ReferenceCommand::SetDestinationPort),
            2 => Some(ReferenceCommand::SetSourcePort),
            4 => Some(ReferenceCommand::TcpMode),
            _ => None,
        }
    }

    /// Bytes the driver reads or writes for this command.
    pub fn payload_len(self) -> usize {
        match self {
            ReferenceCommand::SetDestinationIp => super::codec::IP_REFERENCE_LEN,
            _ => std::mem::size_of::<u32>(),
        }
    }
}

/// TCP working mode of a CANET-TCP adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    Client,
    Server,
}

impl TcpMode {
    pub fn reference_value(self) -> u32 {
        match self {
            TcpMode::Client => 0,
            TcpMode::Server => 1,
        }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Well-known error codes reported in `ErrorInfo::error_code`.
pub mod error_code {
    /// CAN controller internal FIFO overflow
    pub const CAN_OVERFLOW: u32 = 0x0001;
    /// CAN controller error warning
    pub const CAN_ERROR_ALARM: u32 = 0x0002;
    /// CAN controller error passive
    pub const CAN_PASSIVE: u32 = 0x0004;
    /// CAN controller arbitration lost
    pub const CAN_LOSE: u32 = 0x0008;
    /// CAN controller bus error
    pub const CAN_BUS_ERROR: u32 = 0x0010;
    /// Device already open
    pub const DEVICE_OPENED: u32 = 0x0100;
    /// Error opening device
    pub const DEVICE_OPEN: u32 = 0x0200;
    /// Device not open
    pub const DEVICE_NOT_OPEN: u32 = 0x0400;
    /// Buffer overflow
    pub const BUFFER_OVERFLOW: u32 = 0x0800;
    /// Device does not exist
    pub const DEVICE_NOT_EXIST: u32 = 0x1000;
    /// Failed to load the driver library
    pub const LOAD_KERNEL_DLL: u32 = 0x2000;
    /// Command failed
    pub const CMD_FAILED: u32 = 0x4000;
    /// Insufficient memory
    pub const BUFFER_CREATE: u32 = 0x8000;
}

/// Adapter identification read from the board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoardInfo {
    /// Hardware version, hex coded (0x0100 = V1.00)
    pub hardware_version: u16,
    pub firmware_version: u16,
    pub driver_version: u16,
    pub interface_version: u16,
    pub irq_number: u16,
    /// Number of CAN channels on the adapter
    pub can_channel_count: u8,
    /// NUL-terminated serial number
    pub serial_number: [u8; 20],
    /// NUL-terminated hardware type, e.g. "USBCAN V1.00"
    #[serde(with = "serde_bytes_40")]
    pub hardware_type: [u8; 40],
    pub reserved: [u8; 8],
}

impl Default for BoardInfo {
    fn default() -> Self {
        Self {
            hardware_version: 0,
            firmware_version: 0,
            driver_version: 0,
            interface_version: 0,
            irq_number: 0,
            can_channel_count: 0,
            serial_number: [0; 20],
            hardware_type: [0; 40],
            reserved: [0; 8],
        }
    }
}

impl BoardInfo {
    pub fn serial_number_str(&self) -> String {
        c_bytes_to_string(&self.serial_number)
    }

    pub fn hardware_type_str(&self) -> String {
        c_bytes_to_string(&self.hardware_type)
    }
}

/// serde only derives arrays up to 32 elements.
mod serde_bytes_40 {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8; 40], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(bytes.iter())
    }
}

/// Latest error recorded by the CAN controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub error_code: u32,
    pub passive_error_data: [u8; 3],
    pub arbitration_lost_error_data: u8,
}

impl ErrorInfo {
    /// Device reported as already open; not a fault.
    pub fn is_device_opened(&self) -> bool {
        self.error_code == error_code::DEVICE_OPENED
    }

    /// Device has gone away.
    pub fn is_device_not_exist(&self) -> bool {
        self.error_code == error_code::DEVICE_NOT_EXIST
    }
}

/// CAN controller register snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    /// Interrupt record (cleared by the read)
    pub error_interrupt: u8,
    pub mode_register: u8,
    pub status_register: u8,
    pub arbitration_lost_capture: u8,
    pub error_code_capture: u8,
    pub error_warning_limit: u8,
    pub receive_error_counter: u8,
    pub transmit_error_counter: u8,
    pub reserved: [u8; 4],
}

/// Convert a NUL-terminated byte buffer to a trimmed string.
pub fn c_bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_init_config_is_250k_accept_all() {
        let config = InitConfig::default();
        assert_eq!(config.acceptance_mask, 0xFFFF_FFFF);
        assert_eq!(config.filter, filter_mode::SINGLE);
        assert_eq!((config.timing0, config.timing1), (0x01, 0x1C));
        assert_eq!(Some(config), InitConfig::for_bitrate(250_000));
    }

    #[test]
    fn test_common_bitrates() {
        assert_eq!(get_timing_for_bitrate(500_000), Some((0x00, 0x1C)));
        assert_eq!(get_timing_for_bitrate(1_000_000), Some((0x00, 0x14)));
        assert_eq!(get_timing_for_bitrate(10_000), Some((0x31, 0x1C)));
        assert!(get_timing_for_bitrate(123_456).is_none());
        assert!(InitConfig::for_bitrate(123_456).is_none());
    }

    #[test]
    fn test_reference_command_payload_sizes() {
        for command in [
            ReferenceCommand::SetDestinationIp,
            ReferenceCommand::SetDestinationPort,
            ReferenceCommand::SetSourcePort,
            ReferenceCommand::TcpMode,
        ] {
            assert_eq!(ReferenceCommand::from_code(command.code()), Some(command));
        }
        assert_eq!(ReferenceCommand::SetDestinationIp.payload_len(), 50);
        assert_eq!(ReferenceCommand::SetDestinationPort.payload_len(), 4);
        assert_eq!(ReferenceCommand::TcpMode.payload_len(), 4);
        assert!(ReferenceCommand::from_code(3).is_none());
    }

    #[test]
    fn test_listen_only_and_filter_builders() {
        let config = InitConfig::default()
            .with_listen_only(true)
            .with_filter(0x1234_0000, 0x0000_FFFF);
        assert_eq!(config.mode, work_mode::LISTEN_ONLY);
        assert_eq!(config.acceptance_code, 0x1234_0000);
        assert_eq!(config.acceptance_mask, 0x0000_FFFF);
    }

    #[test]
    fn test_board_info_strings_stop_at_nul() {
        let mut info = BoardInfo::default();
        info.serial_number[..8].copy_from_slice(b"21A00001");
        info.hardware_type[..12].copy_from_slice(b"USBCAN V1.00");
        assert_eq!(info.serial_number_str(), "21A00001");
        assert_eq!(info.hardware_type_str(), "USBCAN V1.00");
    }

    #[test]
    fn test_error_info_well_known_codes() {
        let opened = ErrorInfo {
            error_code: error_code::DEVICE_OPENED,
            ..Default::default()
        };
        assert!(opened.is_device_opened());
        assert!(!opened.is_device_not_exist());

        let gone = ErrorInfo {
            error_code: error_code::DEVICE_NOT_EXIST,
            ..Default::default()
        };
        assert!(gone.is_device_not_exist());
    }
}
