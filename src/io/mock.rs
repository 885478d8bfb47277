// src/io/mock.rs
//
// Scripted in-memory driver for tests and dry runs.
// Records every call, serves queued receive frames (optionally in short
// chunks to exercise the drain loop), and lets a test flip any operation
// into failure to simulate an unplugged or faulted adapter.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::driver::CanDriver;
use super::types::{BoardInfo, ControllerStatus, ErrorInfo, InitConfig};
use super::{CanFrame, DeviceIdentity, DeviceType};

/// Driver operations, used both for the call log and for failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockOp {
    Open,
    Close,
    InitChannel,
    StartChannel,
    ResetChannel,
    ClearBuffer,
    PendingFrameCount,
    Receive,
    Transmit,
    ReadBoardInfo,
    ReadErrorInfo,
    ReadStatus,
    SetReference,
    GetReference,
}

/// One `set_reference` call as seen by the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceWrite {
    pub identity: DeviceIdentity,
    pub command: u32,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockOp>,
    failing: HashSet<MockOp>,
    open: HashSet<(DeviceType, u32)>,
    rx: HashMap<DeviceIdentity, VecDeque<CanFrame>>,
    receive_chunk: Option<u32>,
    receive_sizes: Vec<u32>,
    transmit_limit: Option<u32>,
    transmitted: Vec<CanFrame>,
    init_configs: Vec<(DeviceIdentity, InitConfig)>,
    reference_writes: Vec<ReferenceWrite>,
    references: HashMap<(DeviceIdentity, u32), Vec<u8>>,
    board_info: BoardInfo,
    status: ControllerStatus,
    error_script: VecDeque<ErrorInfo>,
    error_current: ErrorInfo,
    delays: HashMap<MockOp, Duration>,
}

/// In-memory `CanDriver`.
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log the call and report whether it has been scripted to fail.
    fn record(state: &mut MockState, op: MockOp) -> bool {
        state.calls.push(op);
        state.failing.contains(&op)
    }

    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    /// Make every subsequent `op` call fail.
    pub fn fail(&self, op: MockOp) {
        self.state().failing.insert(op);
    }

    /// Undo `fail`.
    pub fn succeed(&self, op: MockOp) {
        self.state().failing.remove(&op);
    }

    /// Fail every operation, as an unplugged adapter would.
    pub fn unplug(&self) {
        use MockOp::*;
        let mut state = self.state();
        for op in [
            Open, Close, InitChannel, StartChannel, ResetChannel, ClearBuffer,
            PendingFrameCount, Receive, Transmit, ReadBoardInfo, ReadErrorInfo,
            ReadStatus, SetReference, GetReference,
        ] {
            state.failing.insert(op);
        }
    }

    /// Queue frames to be received on `identity`.
    pub fn push_frames(&self, identity: DeviceIdentity, frames: &[CanFrame]) {
        self.state()
            .rx
            .entry(identity)
            .or_default()
            .extend(frames.iter().copied());
    }

    /// Cap how many frames a single receive call returns.
    pub fn set_receive_chunk(&self, chunk: Option<u32>) {
        self.state().receive_chunk = chunk;
    }

    /// Cap how many frames a single transmit call accepts.
    pub fn set_transmit_limit(&self, limit: Option<u32>) {
        self.state().transmit_limit = limit;
    }

    pub fn set_board_info(&self, info: BoardInfo) {
        self.state().board_info = info;
    }

    pub fn set_status(&self, status: ControllerStatus) {
        self.state().status = status;
    }

    /// Make calls to `op` block for `delay` after being logged, so a test can
    /// act while the call is in flight. Honoured by `receive` and
    /// `read_error_info`.
    pub fn set_delay(&self, op: MockOp, delay: Option<Duration>) {
        let mut state = self.state();
        match delay {
            Some(delay) => state.delays.insert(op, delay),
            None => state.delays.remove(&op),
        };
    }

    fn pause(&self, op: MockOp) {
        let delay = self.state().delays.get(&op).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    /// Queue error-info values; each read consumes one, then the last one
    /// keeps being reported.
    pub fn push_error_info(&self, info: ErrorInfo) {
        self.state().error_script.push_back(info);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn calls(&self) -> Vec<MockOp> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: MockOp) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn is_open(&self, device_type: DeviceType, device_index: u32) -> bool {
        self.state().open.contains(&(device_type, device_index))
    }

    /// Frames accepted by `transmit`, in order.
    pub fn transmitted(&self) -> Vec<CanFrame> {
        self.state().transmitted.clone()
    }

    /// The `max_frames` argument of every receive call, in order.
    pub fn receive_sizes(&self) -> Vec<u32> {
        self.state().receive_sizes.clone()
    }

    pub fn init_configs(&self) -> Vec<(DeviceIdentity, InitConfig)> {
        self.state().init_configs.clone()
    }

    pub fn reference_writes(&self) -> Vec<ReferenceWrite> {
        self.state().reference_writes.clone()
    }

    pub fn queued_frames(&self, identity: &DeviceIdentity) -> usize {
        self.state().rx.get(identity).map(|q| q.len()).unwrap_or(0)
    }
}

impl CanDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&self, device_type: DeviceType, device_index: u32, _reserved: u32) -> bool {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::Open) {
            return false;
        }
        state.open.insert((device_type, device_index))
    }

    fn close(&self, device_type: DeviceType, device_index: u32) -> bool {
        let mut state = self.state();
        let failed = Self::record(&mut state, MockOp::Close);
        // The handle is gone either way.
        let was_open = state.open.remove(&(device_type, device_index));
        !failed && was_open
    }

    fn init_channel(&self, identity: &DeviceIdentity, config: &InitConfig) -> bool {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::InitChannel) {
            return false;
        }
        state.init_configs.push((*identity, *config));
        state.open.contains(&(identity.device_type, identity.device_index))
    }

    fn start_channel(&self, identity: &DeviceIdentity) -> bool {
        let mut state = self.state();
        !Self::record(&mut state, MockOp::StartChannel)
            && state.open.contains(&(identity.device_type, identity.device_index))
    }

    fn reset_channel(&self, identity: &DeviceIdentity) -> bool {
        let mut state = self.state();
        !Self::record(&mut state, MockOp::ResetChannel)
            && state.open.contains(&(identity.device_type, identity.device_index))
    }

    fn clear_buffer(&self, identity: &DeviceIdentity) -> bool {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::ClearBuffer) {
            return false;
        }
        state.rx.remove(identity);
        true
    }

    fn pending_frame_count(&self, identity: &DeviceIdentity) -> u32 {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::PendingFrameCount) {
            return 0;
        }
        state.rx.get(identity).map(|q| q.len() as u32).unwrap_or(0)
    }

    fn receive(
        &self,
        identity: &DeviceIdentity,
        max_frames: u32,
        _wait_time_ms: i32,
    ) -> Option<Vec<CanFrame>> {
        if Self::record(&mut self.state(), MockOp::Receive) {
            return None;
        }
        self.pause(MockOp::Receive);
        let mut state = self.state();
        state.receive_sizes.push(max_frames);
        let limit = state
            .receive_chunk
            .map(|chunk| chunk.min(max_frames))
            .unwrap_or(max_frames) as usize;
        let queue = state.rx.entry(*identity).or_default();
        let take = limit.min(queue.len());
        Some(queue.drain(..take).collect())
    }

    fn transmit(&self, _identity: &DeviceIdentity, frames: &[CanFrame]) -> u32 {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::Transmit) {
            return 0;
        }
        let accepted = state
            .transmit_limit
            .map(|limit| (limit as usize).min(frames.len()))
            .unwrap_or(frames.len());
        state.transmitted.extend_from_slice(&frames[..accepted]);
        accepted as u32
    }

    fn read_board_info(&self, _device_type: DeviceType, _device_index: u32) -> Option<BoardInfo> {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::ReadBoardInfo) {
            return None;
        }
        Some(state.board_info.clone())
    }

    fn read_error_info(&self, _identity: &DeviceIdentity) -> Option<ErrorInfo> {
        if Self::record(&mut self.state(), MockOp::ReadErrorInfo) {
            return None;
        }
        self.pause(MockOp::ReadErrorInfo);
        let mut state = self.state();
        if let Some(next) = state.error_script.pop_front() {
            state.error_current = next;
        }
        Some(state.error_current)
    }

    fn read_status(&self, _identity: &DeviceIdentity) -> Option<ControllerStatus> {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::ReadStatus) {
            return None;
        }
        Some(state.status)
    }

    fn set_reference(&self, identity: &DeviceIdentity, command: u32, payload: &[u8]) -> bool {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::SetReference) {
            return false;
        }
        state.reference_writes.push(ReferenceWrite {
            identity: *identity,
            command,
            payload: payload.to_vec(),
        });
        state.references.insert((*identity, command), payload.to_vec());
        true
    }

    fn get_reference(&self, identity: &DeviceIdentity, command: u32, payload: &mut [u8]) -> bool {
        let mut state = self.state();
        if Self::record(&mut state, MockOp::GetReference) {
            return false;
        }
        match state.references.get(&(*identity, command)) {
            Some(stored) => {
                let len = stored.len().min(payload.len());
                payload[..len].copy_from_slice(&stored[..len]);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_type: DeviceType::UsbCan1,
            device_index: 0,
            can_index: 0,
        }
    }

    #[test]
    fn test_receive_honours_chunk_and_max() {
        let driver = MockDriver::new();
        let frames: Vec<CanFrame> = (0..5).map(|i| CanFrame::new(i, &[i as u8]).unwrap()).collect();
        driver.push_frames(identity(), &frames);
        driver.set_receive_chunk(Some(2));

        assert_eq!(driver.pending_frame_count(&identity()), 5);
        let first = driver.receive(&identity(), 10, 0).unwrap();
        assert_eq!(first, frames[..2].to_vec());
        let second = driver.receive(&identity(), 1, 0).unwrap();
        assert_eq!(second, frames[2..3].to_vec());
        assert_eq!(driver.receive_sizes(), vec![10, 1]);
        assert_eq!(driver.pending_frame_count(&identity()), 2);
    }

    #[test]
    fn test_fail_and_succeed() {
        let driver = MockDriver::new();
        driver.fail(MockOp::Open);
        assert!(!driver.open(DeviceType::UsbCan1, 0, 0));
        driver.succeed(MockOp::Open);
        assert!(driver.open(DeviceType::UsbCan1, 0, 0));
        assert!(driver.is_open(DeviceType::UsbCan1, 0));
        assert_eq!(driver.call_count(MockOp::Open), 2);
    }

    #[test]
    fn test_error_script_sticks_on_last_value() {
        let driver = MockDriver::new();
        driver.push_error_info(ErrorInfo {
            error_code: 0x0002,
            ..Default::default()
        });
        assert_eq!(driver.read_error_info(&identity()).unwrap().error_code, 0x0002);
        assert_eq!(driver.read_error_info(&identity()).unwrap().error_code, 0x0002);
    }

    #[test]
    fn test_reference_round_trip() {
        let driver = MockDriver::new();
        assert!(driver.set_reference(&identity(), 1, &4001u32.to_le_bytes()));
        let mut out = [0u8; 4];
        assert!(driver.get_reference(&identity(), 1, &mut out));
        assert_eq!(u32::from_le_bytes(out), 4001);
        assert!(!driver.get_reference(&identity(), 2, &mut out));
    }
}
