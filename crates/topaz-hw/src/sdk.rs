//! The acquisition-library surface the session is written against.
//!
//! [`Sdk`] mirrors the `PiGentlSdk*` C functions one to one, with raw status
//! codes kept as [`Status`] so the session can name the failing call.
//! [`crate::PiGentlSdk`] implements it over the vendor DLL and
//! [`crate::MockSdk`] simulates it in-process.

use serde::Serialize;
use std::fmt;
use topaz_core::{FrameDescriptor, ImagePixelType};

/// Vendor function names, used to label errors and injected faults.
pub mod ops {
    pub const INITIALIZE: &str = "PiGentlSdkInitializeLibrary";
    pub const TERMINATE: &str = "PiGentlSdkTerminateLibrary";
    pub const UPDATE_CAMERA_LIST: &str = "PiGentlSdkUpdateCameraList";
    pub const GET_CAMERA_INFO: &str = "PiGentlSdkGetCameraInfo";
    pub const OPEN_CAMERA: &str = "PiGentlSdkOpenCamera";
    pub const CLOSE_CAMERA: &str = "PiGentlSdkCloseCamera";
    pub const SET_NUMBER_OF_BUFFERS: &str = "PiGentlSdkSetNumberOfBuffers";
    pub const START_ACQUISITION: &str = "PiGentlSdkStartAcquisition";
    pub const STOP_ACQUISITION: &str = "PiGentlSdkStopAcquisition";
    pub const FLUSH_BUFFERS: &str = "PiGentlSdkFlushBuffers";
    pub const GET_BUFFER: &str = "PiGentlSdkGetBuffer";
    pub const REQUEUE_BUFFER: &str = "PiGentlSdkRequeueBuffer";
    pub const READ_REGISTER: &str = "PiGentlSdkReadRegister";
    pub const WRITE_REGISTER: &str = "PiGentlSdkWriteRegister";
    pub const GET_LAST_ERROR: &str = "PiGentlSdkGetLastError";
}

/// Status code returned by a library call. Zero is success; the negative
/// values follow the GenTL `GC_ERROR` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const ERROR: Status = Status(-1001);
    pub const NOT_INITIALIZED: Status = Status(-1002);
    pub const RESOURCE_IN_USE: Status = Status(-1004);
    pub const INVALID_HANDLE: Status = Status(-1006);
    pub const INVALID_ID: Status = Status(-1007);
    pub const INVALID_PARAMETER: Status = Status(-1009);
    pub const IO: Status = Status(-1010);
    pub const TIMEOUT: Status = Status(-1011);
    pub const INVALID_BUFFER: Status = Status(-1013);
    pub const INVALID_ADDRESS: Status = Status(-1015);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn is_timeout(self) -> bool {
        self == Self::TIMEOUT
    }

    /// `Ok(())` for success, the status itself otherwise.
    pub fn check(self) -> SdkResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}", self.0)
    }
}

pub type SdkResult<T> = Result<T, Status>;

/// Opaque handle to an opened camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraHandle(usize);

impl CameraHandle {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Opaque identifier of one pool buffer, passed back on requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferToken(usize);

impl BufferToken {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Identity of a discovered camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Position in the library's camera list.
    pub index: u32,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    /// Transport-level identifier (`pcID`).
    pub id: String,
}

/// A filled buffer, still owned by the driver.
///
/// `data` borrows the SDK object, so the buffer cannot outlive the next call
/// into the library; in particular it must be gone before
/// [`Sdk::requeue_buffer`] hands the memory back.
#[derive(Debug)]
pub struct RawBuffer<'a> {
    pub token: BufferToken,
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub pixel_type: i32,
    pub block_id: u64,
    pub timestamp: u64,
    pub is_new_data: bool,
    pub incomplete: bool,
    pub buffer_type: i32,
    pub contextual_data_size: usize,
}

impl RawBuffer<'_> {
    pub fn descriptor(&self) -> FrameDescriptor {
        FrameDescriptor {
            width: self.width,
            height: self.height,
            pixel_type: ImagePixelType::from_raw(self.pixel_type),
            raw_size: self.data.len(),
            block_id: self.block_id,
            timestamp: self.timestamp,
            incomplete: self.incomplete,
            buffer_type: self.buffer_type,
        }
    }
}

/// One-to-one view of the vendor acquisition library.
///
/// Every method maps to exactly one C call; no retries, sleeps or state
/// checks happen here. That policy lives in [`crate::Session`].
pub trait Sdk {
    fn initialize(&mut self) -> SdkResult<()>;
    fn terminate(&mut self) -> SdkResult<()>;

    /// Refresh the device list and return how many cameras are visible.
    fn update_camera_list(&mut self) -> SdkResult<u32>;
    fn camera_info(&mut self, index: u32) -> SdkResult<DeviceInfo>;
    fn open_camera(&mut self, device: &DeviceInfo) -> SdkResult<CameraHandle>;
    fn close_camera(&mut self, handle: CameraHandle) -> SdkResult<()>;

    fn set_number_of_buffers(&mut self, handle: CameraHandle, count: usize) -> SdkResult<()>;
    fn start_acquisition(&mut self, handle: CameraHandle) -> SdkResult<()>;
    fn stop_acquisition(&mut self, handle: CameraHandle) -> SdkResult<()>;
    /// Move every buffer in the output queue back to the input queue.
    fn flush_buffers(&mut self, handle: CameraHandle) -> SdkResult<()>;

    /// Wait up to `timeout_us` for a filled buffer.
    fn get_buffer(&mut self, handle: CameraHandle, timeout_us: u64) -> SdkResult<RawBuffer<'_>>;
    fn requeue_buffer(&mut self, handle: CameraHandle, token: BufferToken) -> SdkResult<()>;

    /// Fill `buf` from `address`; returns the number of bytes delivered.
    fn read_register(&mut self, handle: CameraHandle, address: u32, buf: &mut [u8]) -> SdkResult<usize>;
    /// Write `data` at `address`; returns the number of bytes accepted.
    fn write_register(&mut self, handle: CameraHandle, address: u32, data: &[u8]) -> SdkResult<usize>;

    /// Human-readable text for a status code, if the library has one.
    fn error_text(&mut self, status: Status) -> Option<String>;
}
