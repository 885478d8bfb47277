// src/io/controlcan/mod.rs
//
// `CanDriver` over the vendor controlcan library. Only compiled with the
// `controlcan` feature so the crate builds and tests on hosts without the
// vendor library installed.

mod ffi;

use std::os::raw::c_void;

use super::codec::{VciBoardInfo, VciCanObj, VciCanStatus, VciErrInfo, VciInitConfig};
use super::driver::CanDriver;
use super::types::{BoardInfo, ControllerStatus, ErrorInfo, InitConfig, ReferenceCommand};
use super::{CanFrame, DeviceIdentity, DeviceType};

/// Native driver. Stateless: the vendor library keeps its own handle table
/// keyed by (type, index).
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlCanDriver;

impl ControlCanDriver {
    pub fn new() -> Self {
        ControlCanDriver
    }
}

fn triple(identity: &DeviceIdentity) -> (u32, u32, u32) {
    (
        identity.device_type.code(),
        identity.device_index,
        identity.can_index,
    )
}

/// Unknown commands are refused since their payload size is unknown.
fn reference_fits(command: u32, len: usize) -> bool {
    match ReferenceCommand::from_code(command) {
        Some(known) if len >= known.payload_len() => true,
        _ => {
            tlog!(
                "[controlcan] Refusing reference command {} with {} byte buffer",
                command,
                len
            );
            false
        }
    }
}

impl CanDriver for ControlCanDriver {
    fn name(&self) -> &str {
        "controlcan"
    }

    fn open(&self, device_type: DeviceType, device_index: u32, reserved: u32) -> bool {
        // SAFETY: plain integer arguments.
        unsafe { ffi::VCI_OpenDevice(device_type.code(), device_index, reserved) == 1 }
    }

    fn close(&self, device_type: DeviceType, device_index: u32) -> bool {
        // SAFETY: plain integer arguments.
        unsafe { ffi::VCI_CloseDevice(device_type.code(), device_index) == 1 }
    }

    fn init_channel(&self, identity: &DeviceIdentity, config: &InitConfig) -> bool {
        let (t, d, c) = triple(identity);
        let raw = VciInitConfig::from(config);
        // SAFETY: `raw` is a live repr(C) struct for the duration of the call.
        unsafe { ffi::VCI_InitCAN(t, d, c, &raw) == 1 }
    }

    fn start_channel(&self, identity: &DeviceIdentity) -> bool {
        let (t, d, c) = triple(identity);
        // SAFETY: plain integer arguments.
        unsafe { ffi::VCI_StartCAN(t, d, c) == 1 }
    }

    fn reset_channel(&self, identity: &DeviceIdentity) -> bool {
        let (t, d, c) = triple(identity);
        // SAFETY: plain integer arguments.
        unsafe { ffi::VCI_ResetCAN(t, d, c) == 1 }
    }

    fn clear_buffer(&self, identity: &DeviceIdentity) -> bool {
        let (t, d, c) = triple(identity);
        // SAFETY: plain integer arguments.
        unsafe { ffi::VCI_ClearBuffer(t, d, c) == 1 }
    }

    fn pending_frame_count(&self, identity: &DeviceIdentity) -> u32 {
        let (t, d, c) = triple(identity);
        // SAFETY: plain integer arguments.
        unsafe { ffi::VCI_GetReceiveNum(t, d, c) }
    }

    fn receive(
        &self,
        identity: &DeviceIdentity,
        max_frames: u32,
        wait_time_ms: i32,
    ) -> Option<Vec<CanFrame>> {
        if max_frames == 0 {
            return Some(Vec::new());
        }
        let (t, d, c) = triple(identity);
        let mut buffer = vec![VciCanObj::default(); max_frames as usize];
        // SAFETY: `buffer` holds exactly `max_frames` initialised objects and
        // the driver writes at most `len` of them.
        let count = unsafe { ffi::VCI_Receive(t, d, c, buffer.as_mut_ptr(), max_frames, wait_time_ms) };
        if count == ffi::RECEIVE_FAULT {
            return None;
        }
        let count = (count as usize).min(buffer.len());
        Some(buffer[..count].iter().map(CanFrame::from).collect())
    }

    fn transmit(&self, identity: &DeviceIdentity, frames: &[CanFrame]) -> u32 {
        if frames.is_empty() {
            return 0;
        }
        let (t, d, c) = triple(identity);
        let objs: Vec<VciCanObj> = frames.iter().map(VciCanObj::from).collect();
        // SAFETY: `objs` is a contiguous slice of repr(C) objects of length `len`.
        unsafe { ffi::VCI_Transmit(t, d, c, objs.as_ptr(), objs.len() as u32) }
    }

    fn read_board_info(&self, device_type: DeviceType, device_index: u32) -> Option<BoardInfo> {
        let mut raw = VciBoardInfo::default();
        // SAFETY: `raw` is a writable repr(C) struct of the size the driver expects.
        let ok = unsafe { ffi::VCI_ReadBoardInfo(device_type.code(), device_index, &mut raw) == 1 };
        ok.then(|| BoardInfo::from(&raw))
    }

    fn read_error_info(&self, identity: &DeviceIdentity) -> Option<ErrorInfo> {
        let (t, d, c) = triple(identity);
        let mut raw = VciErrInfo::default();
        // SAFETY: as above.
        let ok = unsafe { ffi::VCI_ReadErrInfo(t, d, c, &mut raw) == 1 };
        ok.then(|| ErrorInfo::from(&raw))
    }

    fn read_status(&self, identity: &DeviceIdentity) -> Option<ControllerStatus> {
        let (t, d, c) = triple(identity);
        let mut raw = VciCanStatus::default();
        // SAFETY: as above.
        let ok = unsafe { ffi::VCI_ReadCANStatus(t, d, c, &mut raw) == 1 };
        ok.then(|| ControllerStatus::from(&raw))
    }

    fn set_reference(&self, identity: &DeviceIdentity, command: u32, payload: &[u8]) -> bool {
        if !reference_fits(command, payload.len()) {
            return false;
        }
        let (t, d, c) = triple(identity);
        // SAFETY: reference_fits() checked that `payload` holds at least the
        // number of bytes the driver reads for this command.
        unsafe {
            ffi::VCI_SetReference(t, d, c, command, payload.as_ptr() as *const c_void) == 1
        }
    }

    fn get_reference(&self, identity: &DeviceIdentity, command: u32, payload: &mut [u8]) -> bool {
        if !reference_fits(command, payload.len()) {
            return false;
        }
        let (t, d, c) = triple(identity);
        // SAFETY: as for set_reference, with a writable buffer.
        unsafe {
            ffi::VCI_GetReference(t, d, c, command, payload.as_mut_ptr() as *mut c_void) == 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_buffer_must_cover_command() {
        assert!(reference_fits(ReferenceCommand::SetDestinationIp.code(), 50));
        assert!(!reference_fits(ReferenceCommand::SetDestinationIp.code(), 1));
        assert!(reference_fits(ReferenceCommand::TcpMode.code(), 4));
        assert!(!reference_fits(ReferenceCommand::SetDestinationPort.code(), 0));
        assert!(!reference_fits(3, 64));
    }
}
