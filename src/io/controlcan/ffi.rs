// src/io/controlcan/ffi.rs
//
// Raw declarations of the controlcan shared library (controlcan.dll on
// Windows, libcontrolcan.so on Linux). Every function returns 1 on success
// and 0 on failure, except VCI_Receive/VCI_Transmit/VCI_GetReceiveNum which
// return a count (VCI_Receive returns 0xFFFFFFFF on a device fault).

#![allow(non_snake_case)]

use std::os::raw::c_void;

use crate::io::codec::{VciBoardInfo, VciCanObj, VciCanStatus, VciErrInfo, VciInitConfig};

/// VCI_Receive return value signalling a device fault.
pub const RECEIVE_FAULT: u32 = 0xFFFF_FFFF;

#[link(name = "controlcan")]
extern "system" {
    pub fn VCI_OpenDevice(device_type: u32, device_index: u32, reserved: u32) -> u32;
    pub fn VCI_CloseDevice(device_type: u32, device_index: u32) -> u32;
    pub fn VCI_InitCAN(
        device_type: u32,
        device_index: u32,
        can_index: u32,
        init_config: *const VciInitConfig,
    ) -> u32;

    pub fn VCI_ReadBoardInfo(device_type: u32, device_index: u32, info: *mut VciBoardInfo) -> u32;
    pub fn VCI_ReadErrInfo(
        device_type: u32,
        device_index: u32,
        can_index: u32,
        err_info: *mut VciErrInfo,
    ) -> u32;
    pub fn VCI_ReadCANStatus(
        device_type: u32,
        device_index: u32,
        can_index: u32,
        status: *mut VciCanStatus,
    ) -> u32;

    pub fn VCI_GetReference(
        device_type: u32,
        device_index: u32,
        can_index: u32,
        ref_type: u32,
        data: *mut c_void,
    ) -> u32;
    pub fn VCI_SetReference(
        device_type: u32,
        device_index: u32,
        can_index: u32,
        ref_type: u32,
        data: *const c_void,
    ) -> u32;

    pub fn VCI_GetReceiveNum(device_type: u32, device_index: u32, can_index: u32) -> u32;
    pub fn VCI_ClearBuffer(device_type: u32, device_index: u32, can_index: u32) -> u32;
    pub fn VCI_StartCAN(device_type: u32, device_index: u32, can_index: u32) -> u32;
    pub fn VCI_ResetCAN(device_type: u32, device_index: u32, can_index: u32) -> u32;

    pub fn VCI_Transmit(
        device_type: u32,
        device_index: u32,
        can_index: u32,
        send: *const VciCanObj,
        len: u32,
    ) -> u32;
    pub fn VCI_Receive(
        device_type: u32,
        device_index: u32,
        can_index: u32,
        receive: *mut VciCanObj,
        len: u32,
        wait_time: i32,
    ) -> u32;
}
