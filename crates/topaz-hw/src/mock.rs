//! In-process simulation of the acquisition library.
//!
//! Behaves like a single Topaz camera behind the `PiGentlSdk*` calls: a
//! register file seeded from the address map, a buffer pool with input
//! queue accounting, and frames generated from the current width, height
//! and pixel-format registers. Faults can be injected per call, and every
//! call is logged so tests can assert on ordering.
//!
//! Clones share state, so a test can keep a clone to inspect the library
//! after the session that owned it has been dropped.

use crate::sdk::{ops, BufferToken, CameraHandle, DeviceInfo, RawBuffer, Sdk, SdkResult, Status};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;
use topaz_core::{AddressMap, AddressMapError, ImagePixelType, PixelFormat};

const MOCK_HANDLE: usize = 0x70A2;

/// One recorded library call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Initialize,
    Terminate,
    UpdateCameraList,
    CameraInfo(u32),
    OpenCamera(u32),
    CloseCamera,
    SetNumberOfBuffers(usize),
    StartAcquisition,
    StopAcquisition,
    FlushBuffers,
    GetBuffer(u64),
    RequeueBuffer(usize),
    ReadRegister(u32, usize),
    WriteRegister(u32, Vec<u8>),
}

/// Buffer pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    /// Buffers waiting in the input queue to be filled.
    pub queued: usize,
    /// Buffers handed out and not yet requeued.
    pub held: usize,
}

#[derive(Debug)]
struct MockState {
    devices: Vec<DeviceInfo>,
    /// Camera-list refreshes that still report nothing.
    discovery_delay: u32,
    initialized: bool,
    open_device: Option<u32>,
    acquiring: bool,
    buffer_count: usize,
    queued: usize,
    held: BTreeSet<usize>,
    next_token: usize,
    next_block_id: u64,
    registers: HashMap<u32, Vec<u8>>,
    map: AddressMap,
    faults: HashMap<&'static str, Status>,
    scripted_get_buffer: VecDeque<Status>,
    incomplete_next: bool,
    short_read: Option<usize>,
    short_write: Option<usize>,
    calls: Vec<MockCall>,
}

/// Simulated acquisition library.
#[derive(Debug, Clone)]
pub struct MockSdk {
    state: Rc<RefCell<MockState>>,
    /// Bytes of the buffers currently held, keyed by token.
    frames: BTreeMap<usize, Vec<u8>>,
}

impl MockSdk {
    /// One Topaz camera, 64x48 Mono8, registers laid out per the embedded
    /// address map.
    pub fn topaz() -> Result<Self, AddressMapError> {
        Ok(Self::with_address_map(AddressMap::embedded()?.clone()))
    }

    pub fn with_address_map(map: AddressMap) -> Self {
        let mut registers = HashMap::new();
        let b = &map.bootstrap;
        let s = &map.sensor;

        registers.insert(b.device_vendor_name, padded("Teledyne e2v", 32));
        registers.insert(b.device_model_name, padded("Topaz EK", 32));
        registers.insert(b.device_version, padded("1.0", 32));
        registers.insert(b.device_firmware_version, padded("2.3.1", 32));
        registers.insert(b.serial_number, padded("TPZ-000123", 16));
        registers.insert(b.sensor_width, 64u32.to_le_bytes().to_vec());
        registers.insert(b.sensor_height, 48u32.to_le_bytes().to_vec());
        registers.insert(b.pixel_format, PixelFormat::Mono8.code().to_le_bytes().to_vec());
        for addr in [b.auto_exposure, b.awb_enable, b.awb_red_gain, b.awb_green_gain, b.awb_blue_gain] {
            registers.insert(addr, 0u32.to_le_bytes().to_vec());
        }

        registers.insert(s.line_length, 1000u16.to_le_bytes().to_vec());
        registers.insert(s.exposure_time, 500u16.to_le_bytes().to_vec());
        registers.insert(s.wait_time, 100u16.to_le_bytes().to_vec());
        registers.insert(s.analog_gain, 1u16.to_le_bytes().to_vec());
        registers.insert(s.clamp_offset, 64u16.to_le_bytes().to_vec());
        registers.insert(s.vertical_subsampling, 0u16.to_le_bytes().to_vec());
        registers.insert(s.chip_id, 0x0A70u16.to_le_bytes().to_vec());

        let state = MockState {
            devices: vec![device(0, "TPZ-000123")],
            discovery_delay: 0,
            initialized: false,
            open_device: None,
            acquiring: false,
            buffer_count: 0,
            queued: 0,
            held: BTreeSet::new(),
            next_token: 1,
            next_block_id: 1,
            registers,
            map,
            faults: HashMap::new(),
            scripted_get_buffer: VecDeque::new(),
            incomplete_next: false,
            short_read: None,
            short_write: None,
            calls: Vec::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            frames: BTreeMap::new(),
        }
    }

    /// Expose `count` cameras with serials `TPZ-000000`, `TPZ-000001`, ...
    pub fn with_devices(self, count: u32) -> Self {
        self.state.borrow_mut().devices = (0..count).map(|i| device(i, &format!("TPZ-{i:06}"))).collect();
        self
    }

    /// Report an empty camera list for the first `refreshes` updates.
    pub fn with_discovery_delay(self, refreshes: u32) -> Self {
        self.state.borrow_mut().discovery_delay = refreshes;
        self
    }

    /// Make every call to `op` fail with `status` until cleared.
    pub fn fail_on(&self, op: &'static str, status: Status) {
        self.state.borrow_mut().faults.insert(op, status);
    }

    pub fn clear_fault(&self, op: &'static str) {
        self.state.borrow_mut().faults.remove(op);
    }

    /// Queue a status for the next `get_buffer` call only.
    pub fn fail_next_get_buffer(&self, status: Status) {
        self.state.borrow_mut().scripted_get_buffer.push_back(status);
    }

    /// Flag the next delivered frame as incomplete.
    pub fn mark_next_incomplete(&self) {
        self.state.borrow_mut().incomplete_next = true;
    }

    /// Deliver at most `bytes` per register read.
    pub fn set_short_read(&self, bytes: Option<usize>) {
        self.state.borrow_mut().short_read = bytes;
    }

    /// Accept at most `bytes` per register write.
    pub fn set_short_write(&self, bytes: Option<usize>) {
        self.state.borrow_mut().short_write = bytes;
    }

    pub fn register(&self, address: u32) -> Option<Vec<u8>> {
        self.state.borrow().registers.get(&address).cloned()
    }

    pub fn set_register(&self, address: u32, bytes: Vec<u8>) {
        self.state.borrow_mut().registers.insert(address, bytes);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.borrow().calls.clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn pool(&self) -> PoolStats {
        let state = self.state.borrow();
        PoolStats {
            total: state.buffer_count,
            queued: state.queued,
            held: state.held.len(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open_device.is_some()
    }

    pub fn is_acquiring(&self) -> bool {
        self.state.borrow().acquiring
    }

    fn enter(&self, op: &'static str, call: MockCall) -> SdkResult<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        match state.faults.get(op) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn check_handle(&self, handle: CameraHandle) -> SdkResult<()> {
        let state = self.state.borrow();
        if state.open_device.is_none() || handle.as_raw() != MOCK_HANDLE {
            return Err(Status::INVALID_HANDLE);
        }
        Ok(())
    }
}

impl MockState {
    fn u32_register(&self, address: u32) -> u32 {
        let mut le = [0u8; 4];
        if let Some(bytes) = self.registers.get(&address) {
            let n = bytes.len().min(4);
            le[..n].copy_from_slice(&bytes[..n]);
        }
        u32::from_le_bytes(le)
    }

    /// Build the next frame from the current format registers.
    fn fill_frame(&mut self) -> (Vec<u8>, usize, usize, PixelFormat) {
        let width = self.u32_register(self.map.bootstrap.sensor_width) as usize;
        let height = self.u32_register(self.map.bootstrap.sensor_height) as usize;
        let format = PixelFormat::from_code(self.u32_register(self.map.bootstrap.pixel_format))
            .unwrap_or(PixelFormat::Mono8);
        let pixels = width * height;
        let seed = self.next_block_id as usize;

        let data = match format {
            PixelFormat::Mono10p => (0..pixels)
                .flat_map(|i| (((seed + i) & 0x3FF) as u16).to_le_bytes())
                .collect(),
            PixelFormat::Mono8 | PixelFormat::Rgb24 => {
                let len = format.descriptor().frame_size(width, height);
                (0..len).map(|i| (seed + i) as u8).collect()
            }
        };
        (data, width, height, format)
    }
}

impl Sdk for MockSdk {
    fn initialize(&mut self) -> SdkResult<()> {
        self.enter(ops::INITIALIZE, MockCall::Initialize)?;
        let mut state = self.state.borrow_mut();
        if state.initialized {
            return Err(Status::RESOURCE_IN_USE);
        }
        state.initialized = true;
        Ok(())
    }

    fn terminate(&mut self) -> SdkResult<()> {
        self.enter(ops::TERMINATE, MockCall::Terminate)?;
        let mut state = self.state.borrow_mut();
        if !state.initialized {
            return Err(Status::NOT_INITIALIZED);
        }
        state.initialized = false;
        Ok(())
    }

    fn update_camera_list(&mut self) -> SdkResult<u32> {
        self.enter(ops::UPDATE_CAMERA_LIST, MockCall::UpdateCameraList)?;
        let mut state = self.state.borrow_mut();
        if !state.initialized {
            return Err(Status::NOT_INITIALIZED);
        }
        if state.discovery_delay > 0 {
            state.discovery_delay -= 1;
            return Ok(0);
        }
        Ok(state.devices.len() as u32)
    }

    fn camera_info(&mut self, index: u32) -> SdkResult<DeviceInfo> {
        self.enter(ops::GET_CAMERA_INFO, MockCall::CameraInfo(index))?;
        let state = self.state.borrow();
        state.devices.get(index as usize).cloned().ok_or(Status::INVALID_ID)
    }

    fn open_camera(&mut self, device: &DeviceInfo) -> SdkResult<CameraHandle> {
        self.enter(ops::OPEN_CAMERA, MockCall::OpenCamera(device.index))?;
        let mut state = self.state.borrow_mut();
        if !state.initialized {
            return Err(Status::NOT_INITIALIZED);
        }
        if state.open_device.is_some() {
            return Err(Status::RESOURCE_IN_USE);
        }
        if device.index as usize >= state.devices.len() {
            return Err(Status::INVALID_ID);
        }
        state.open_device = Some(device.index);
        Ok(CameraHandle::from_raw(MOCK_HANDLE))
    }

    fn close_camera(&mut self, handle: CameraHandle) -> SdkResult<()> {
        self.enter(ops::CLOSE_CAMERA, MockCall::CloseCamera)?;
        self.check_handle(handle)?;
        let mut state = self.state.borrow_mut();
        state.open_device = None;
        state.acquiring = false;
        state.buffer_count = 0;
        state.queued = 0;
        state.held.clear();
        self.frames.clear();
        Ok(())
    }

    fn set_number_of_buffers(&mut self, handle: CameraHandle, count: usize) -> SdkResult<()> {
        self.enter(ops::SET_NUMBER_OF_BUFFERS, MockCall::SetNumberOfBuffers(count))?;
        self.check_handle(handle)?;
        let mut state = self.state.borrow_mut();
        if state.acquiring || !state.held.is_empty() {
            return Err(Status::RESOURCE_IN_USE);
        }
        state.buffer_count = count;
        state.queued = count;
        Ok(())
    }

    fn start_acquisition(&mut self, handle: CameraHandle) -> SdkResult<()> {
        self.enter(ops::START_ACQUISITION, MockCall::StartAcquisition)?;
        self.check_handle(handle)?;
        let mut state = self.state.borrow_mut();
        if state.buffer_count == 0 {
            return Err(Status::INVALID_BUFFER);
        }
        state.acquiring = true;
        Ok(())
    }

    fn stop_acquisition(&mut self, handle: CameraHandle) -> SdkResult<()> {
        self.enter(ops::STOP_ACQUISITION, MockCall::StopAcquisition)?;
        self.check_handle(handle)?;
        self.state.borrow_mut().acquiring = false;
        Ok(())
    }

    fn flush_buffers(&mut self, handle: CameraHandle) -> SdkResult<()> {
        self.enter(ops::FLUSH_BUFFERS, MockCall::FlushBuffers)?;
        self.check_handle(handle)?;
        let mut state = self.state.borrow_mut();
        state.queued = state.buffer_count - state.held.len();
        Ok(())
    }

    fn get_buffer(&mut self, handle: CameraHandle, timeout_us: u64) -> SdkResult<RawBuffer<'_>> {
        self.enter(ops::GET_BUFFER, MockCall::GetBuffer(timeout_us))?;
        self.check_handle(handle)?;

        let mut state = self.state.borrow_mut();
        if let Some(status) = state.scripted_get_buffer.pop_front() {
            return Err(status);
        }
        if !state.acquiring || state.queued == 0 {
            return Err(Status::TIMEOUT);
        }

        let (data, width, height, format) = state.fill_frame();
        let token = state.next_token;
        let block_id = state.next_block_id;
        let incomplete = std::mem::take(&mut state.incomplete_next);
        state.next_token += 1;
        state.next_block_id += 1;
        state.queued -= 1;
        state.held.insert(token);
        drop(state);

        let data = self.frames.entry(token).or_insert(data).as_slice();
        Ok(RawBuffer {
            token: BufferToken::from_raw(token),
            data,
            width,
            height,
            pixel_type: ImagePixelType::from(format).to_raw(),
            block_id,
            timestamp: block_id * 1_000,
            is_new_data: true,
            incomplete,
            buffer_type: 0,
            contextual_data_size: 0,
        })
    }

    fn requeue_buffer(&mut self, handle: CameraHandle, token: BufferToken) -> SdkResult<()> {
        self.enter(ops::REQUEUE_BUFFER, MockCall::RequeueBuffer(token.as_raw()))?;
        self.check_handle(handle)?;
        let mut state = self.state.borrow_mut();
        if !state.held.remove(&token.as_raw()) {
            return Err(Status::INVALID_BUFFER);
        }
        self.frames.remove(&token.as_raw());
        state.queued += 1;
        Ok(())
    }

    fn read_register(&mut self, handle: CameraHandle, address: u32, buf: &mut [u8]) -> SdkResult<usize> {
        self.enter(ops::READ_REGISTER, MockCall::ReadRegister(address, buf.len()))?;
        self.check_handle(handle)?;
        let state = self.state.borrow();
        let stored = state.registers.get(&address).ok_or(Status::INVALID_ADDRESS)?;
        let mut n = stored.len().min(buf.len());
        if let Some(limit) = state.short_read {
            n = n.min(limit);
        }
        buf[..n].copy_from_slice(&stored[..n]);
        Ok(n)
    }

    fn write_register(&mut self, handle: CameraHandle, address: u32, data: &[u8]) -> SdkResult<usize> {
        self.enter(ops::WRITE_REGISTER, MockCall::WriteRegister(address, data.to_vec()))?;
        self.check_handle(handle)?;
        let mut state = self.state.borrow_mut();
        if !state.registers.contains_key(&address) {
            return Err(Status::INVALID_ADDRESS);
        }
        let n = state.short_write.map_or(data.len(), |limit| limit.min(data.len()));
        state.registers.insert(address, data[..n].to_vec());
        Ok(n)
    }

    fn error_text(&mut self, status: Status) -> Option<String> {
        let text = match status {
            Status::ERROR => "unspecified error",
            Status::NOT_INITIALIZED => "library not initialized",
            Status::RESOURCE_IN_USE => "resource in use",
            Status::INVALID_HANDLE => "invalid handle",
            Status::INVALID_ID => "invalid id",
            Status::INVALID_PARAMETER => "invalid parameter",
            Status::IO => "communication error",
            Status::TIMEOUT => "timeout",
            Status::INVALID_BUFFER => "invalid buffer",
            Status::INVALID_ADDRESS => "invalid address",
            _ => return None,
        };
        Some(text.to_string())
    }
}

fn padded(text: &str, size: usize) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(size, 0);
    bytes
}

fn device(index: u32, serial: &str) -> DeviceInfo {
    DeviceInfo {
        index,
        vendor: "Teledyne e2v".into(),
        model: "Topaz EK".into(),
        serial: serial.into(),
        id: format!("GEV::{serial}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> (MockSdk, CameraHandle) {
        let mut sdk = MockSdk::topaz().unwrap();
        sdk.initialize().unwrap();
        assert_eq!(sdk.update_camera_list().unwrap(), 1);
        let info = sdk.camera_info(0).unwrap();
        let handle = sdk.open_camera(&info).unwrap();
        (sdk, handle)
    }

    #[test]
    fn test_discovery_delay() {
        let mut sdk = MockSdk::topaz().unwrap().with_discovery_delay(2);
        sdk.initialize().unwrap();
        assert_eq!(sdk.update_camera_list().unwrap(), 0);
        assert_eq!(sdk.update_camera_list().unwrap(), 0);
        assert_eq!(sdk.update_camera_list().unwrap(), 1);
    }

    #[test]
    fn test_open_twice_is_in_use() {
        let (mut sdk, _) = opened();
        let info = sdk.camera_info(0).unwrap();
        assert_eq!(sdk.open_camera(&info), Err(Status::RESOURCE_IN_USE));
    }

    #[test]
    fn test_pool_accounting() {
        let (mut sdk, handle) = opened();
        sdk.set_number_of_buffers(handle, 3).unwrap();
        sdk.start_acquisition(handle).unwrap();

        let token = sdk.get_buffer(handle, 1000).unwrap().token;
        assert_eq!(sdk.pool(), PoolStats { total: 3, queued: 2, held: 1 });

        sdk.requeue_buffer(handle, token).unwrap();
        assert_eq!(sdk.pool(), PoolStats { total: 3, queued: 3, held: 0 });
        assert_eq!(sdk.requeue_buffer(handle, token), Err(Status::INVALID_BUFFER));
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let (mut sdk, handle) = opened();
        sdk.set_number_of_buffers(handle, 1).unwrap();
        sdk.start_acquisition(handle).unwrap();
        let _ = sdk.get_buffer(handle, 1000).unwrap().token;
        assert!(matches!(sdk.get_buffer(handle, 1000), Err(Status::TIMEOUT)));
    }

    #[test]
    fn test_frame_follows_format_registers() {
        let (mut sdk, handle) = opened();
        let map = AddressMap::embedded().unwrap();
        sdk.set_register(map.bootstrap.pixel_format, PixelFormat::Rgb24.code().to_le_bytes().to_vec());
        sdk.set_number_of_buffers(handle, 2).unwrap();
        sdk.start_acquisition(handle).unwrap();

        let raw = sdk.get_buffer(handle, 1000).unwrap();
        assert_eq!(raw.data.len(), 64 * 48 * 3);
        assert_eq!(ImagePixelType::from_raw(raw.pixel_type), ImagePixelType::Rgb8);
    }

    #[test]
    fn test_register_short_read_and_unknown_address() {
        let (mut sdk, handle) = opened();
        let mut buf = [0u8; 4];
        assert_eq!(sdk.read_register(handle, 0xFFFF, &mut buf), Err(Status::INVALID_ADDRESS));

        sdk.set_short_read(Some(1));
        let map = AddressMap::embedded().unwrap();
        assert_eq!(sdk.read_register(handle, map.bootstrap.sensor_width, &mut buf), Ok(1));
    }

    #[test]
    fn test_fault_injection_and_call_log() {
        let (mut sdk, handle) = opened();
        sdk.fail_on(ops::FLUSH_BUFFERS, Status::IO);
        assert_eq!(sdk.flush_buffers(handle), Err(Status::IO));
        sdk.clear_fault(ops::FLUSH_BUFFERS);
        assert!(sdk.flush_buffers(handle).is_ok());
        assert_eq!(sdk.count_calls(|c| *c == MockCall::FlushBuffers), 2);
        assert_eq!(sdk.calls()[0], MockCall::Initialize);
    }
}
