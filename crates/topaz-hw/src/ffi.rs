//! Raw bindings to the `pigentl-sdk` shared library.
//!
//! The library is resolved at runtime: the GenTL producer (`.cti`) has to be
//! loaded into the process before the SDK itself, and both have to outlive
//! every function pointer taken from them. [`SdkLibrary`] owns the two
//! handles and the resolved entry points together.

use crate::error::CameraError;
use libc::{c_char, c_int, c_ulong, c_void, size_t};
use libloading::Library;
use std::path::Path;

/// Mirror of `tCameraInfo`.
///
/// Layout: four fixed `char` arrays, no padding.
#[repr(C)]
pub struct CameraInfoRaw {
    pub vendor: [c_char; 32],
    pub model: [c_char; 32],
    pub serial: [c_char; 64],
    pub pc_id: [c_char; 260],
}

const _CAMERA_INFO_SIZE: () = assert!(
    std::mem::size_of::<CameraInfoRaw>() == 388,
    "CameraInfoRaw must be 388 bytes to match tCameraInfo"
);

impl CameraInfoRaw {
    pub fn zeroed() -> Self {
        Self {
            vendor: [0; 32],
            model: [0; 32],
            serial: [0; 64],
            pc_id: [0; 260],
        }
    }
}

/// Mirror of `tImageInfos`, filled by `PiGentlSdkGetBuffer`.
///
/// Layout (64-bit):
///   hBuffer:ptr isNewData:u8 isIncomplete:u8 _pad:6 pDatas:ptr
///   size:usize width:usize height:usize pixelType:i32 _pad:4
///   blockId:u64 timestamp:u64 bufferType:i32 _pad:4 contextualDataSize:usize
#[repr(C)]
pub struct ImageInfosRaw {
    pub h_buffer: *mut c_void,
    pub is_new_data: u8,
    pub is_incomplete: u8,
    pub p_datas: *mut c_void,
    pub image_size: size_t,
    pub image_width: size_t,
    pub image_height: size_t,
    pub pixel_type: c_int,
    pub block_id: u64,
    pub timestamp: u64,
    pub buffer_type: c_int,
    pub contextual_data_size: size_t,
}

#[cfg(target_pointer_width = "64")]
const _IMAGE_INFOS_SIZE: () = assert!(
    std::mem::size_of::<ImageInfosRaw>() == 88,
    "ImageInfosRaw must be 88 bytes to match tImageInfos"
);

impl ImageInfosRaw {
    pub fn zeroed() -> Self {
        Self {
            h_buffer: std::ptr::null_mut(),
            is_new_data: 0,
            is_incomplete: 0,
            p_datas: std::ptr::null_mut(),
            image_size: 0,
            image_width: 0,
            image_height: 0,
            pixel_type: 0,
            block_id: 0,
            timestamp: 0,
            buffer_type: 0,
            contextual_data_size: 0,
        }
    }
}

pub type InitializeFn = unsafe extern "C" fn() -> c_int;
pub type TerminateFn = unsafe extern "C" fn() -> c_int;
pub type UpdateCameraListFn = unsafe extern "C" fn(count: *mut c_ulong) -> c_int;
pub type GetCameraInfoFn = unsafe extern "C" fn(index: c_ulong, info: *mut CameraInfoRaw) -> c_int;
pub type OpenCameraFn = unsafe extern "C" fn(info: *mut CameraInfoRaw, handle: *mut *mut c_void) -> c_int;
pub type HandleFn = unsafe extern "C" fn(handle: *mut c_void) -> c_int;
pub type SetNumberOfBuffersFn = unsafe extern "C" fn(handle: *mut c_void, count: size_t) -> c_int;
pub type GetBufferFn =
    unsafe extern "C" fn(handle: *mut c_void, infos: *mut ImageInfosRaw, timeout_us: size_t) -> c_int;
pub type RequeueBufferFn = unsafe extern "C" fn(handle: *mut c_void, buffer: *mut c_void) -> c_int;
pub type RegisterFn = unsafe extern "C" fn(
    handle: *mut c_void,
    address: c_ulong,
    buffer: *mut c_void,
    size: *mut size_t,
) -> c_int;
pub type GetLastErrorFn = unsafe extern "C" fn(code: c_int, text: *mut c_char, size: *mut size_t) -> c_int;

/// Entry points resolved from the SDK.
pub struct SdkFunctions {
    pub initialize: InitializeFn,
    pub terminate: TerminateFn,
    pub update_camera_list: UpdateCameraListFn,
    pub get_camera_info: GetCameraInfoFn,
    pub open_camera: OpenCameraFn,
    pub close_camera: HandleFn,
    pub set_number_of_buffers: SetNumberOfBuffersFn,
    pub start_acquisition: HandleFn,
    pub stop_acquisition: HandleFn,
    pub flush_buffers: HandleFn,
    pub get_buffer: GetBufferFn,
    pub requeue_buffer: RequeueBufferFn,
    pub read_register: RegisterFn,
    pub write_register: RegisterFn,
    pub get_last_error: GetLastErrorFn,
}

/// The loaded SDK and its transport producer.
pub struct SdkLibrary {
    pub functions: SdkFunctions,
    // Field order matters: the SDK is unloaded before the producer it
    // depends on.
    _sdk: Library,
    _producer: Library,
}

impl SdkLibrary {
    /// Load the producer at `cti_path`, then the SDK at `sdk_path`, and
    /// resolve every entry point.
    pub fn load(sdk_path: &Path, cti_path: &Path) -> Result<Self, CameraError> {
        for path in [sdk_path, cti_path] {
            if !path.is_file() {
                return Err(CameraError::LibraryLoad {
                    path: path.display().to_string(),
                    reason: "file not found".into(),
                });
            }
        }

        // SAFETY: loading runs the library's initializers. The vendor
        // producer and SDK are trusted native code with no load-time
        // requirements beyond the producer being present first.
        let producer = unsafe { Library::new(cti_path) }.map_err(|e| load_error(cti_path, e))?;
        // SAFETY: as above.
        let sdk = unsafe { Library::new(sdk_path) }.map_err(|e| load_error(sdk_path, e))?;

        let functions = SdkFunctions {
            initialize: symbol(&sdk, sdk_path, b"PiGentlSdkInitializeLibrary\0")?,
            terminate: symbol(&sdk, sdk_path, b"PiGentlSdkTerminateLibrary\0")?,
            update_camera_list: symbol(&sdk, sdk_path, b"PiGentlSdkUpdateCameraList\0")?,
            get_camera_info: symbol(&sdk, sdk_path, b"PiGentlSdkGetCameraInfo\0")?,
            open_camera: symbol(&sdk, sdk_path, b"PiGentlSdkOpenCamera\0")?,
            close_camera: symbol(&sdk, sdk_path, b"PiGentlSdkCloseCamera\0")?,
            set_number_of_buffers: symbol(&sdk, sdk_path, b"PiGentlSdkSetNumberOfBuffers\0")?,
            start_acquisition: symbol(&sdk, sdk_path, b"PiGentlSdkStartAcquisition\0")?,
            stop_acquisition: symbol(&sdk, sdk_path, b"PiGentlSdkStopAcquisition\0")?,
            flush_buffers: symbol(&sdk, sdk_path, b"PiGentlSdkFlushBuffers\0")?,
            get_buffer: symbol(&sdk, sdk_path, b"PiGentlSdkGetBuffer\0")?,
            requeue_buffer: symbol(&sdk, sdk_path, b"PiGentlSdkRequeueBuffer\0")?,
            read_register: symbol(&sdk, sdk_path, b"PiGentlSdkReadRegister\0")?,
            write_register: symbol(&sdk, sdk_path, b"PiGentlSdkWriteRegister\0")?,
            get_last_error: symbol(&sdk, sdk_path, b"PiGentlSdkGetLastError\0")?,
        };

        tracing::debug!(sdk = %sdk_path.display(), producer = %cti_path.display(), "acquisition library loaded");
        Ok(Self {
            functions,
            _sdk: sdk,
            _producer: producer,
        })
    }
}

/// Copy a function pointer out of `lib`. The pointer stays valid as long as
/// `lib` is loaded, which [`SdkLibrary`] guarantees by owning both.
fn symbol<T: Copy>(lib: &Library, path: &Path, name: &[u8]) -> Result<T, CameraError> {
    // SAFETY: every `T` used here is the `extern "C"` signature of the
    // named export as declared in the vendor header.
    unsafe { lib.get::<T>(name) }
        .map(|sym| *sym)
        .map_err(|e| load_error(path, e))
}

fn load_error(path: &Path, e: libloading::Error) -> CameraError {
    CameraError::LibraryLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Decode a NUL-terminated `char` array.
pub fn c_chars_to_string(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars.iter().map(|&c| c as u8).collect();
    crate::registers::c_string_lossy(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_c_chars_to_string() {
        let mut raw = CameraInfoRaw::zeroed();
        for (dst, src) in raw.serial.iter_mut().zip(b"TPZ-42") {
            *dst = *src as c_char;
        }
        assert_eq!(c_chars_to_string(&raw.serial), "TPZ-42");
        assert_eq!(c_chars_to_string(&raw.pc_id), "");
    }

    #[test]
    fn test_missing_library_is_reported() {
        let missing = PathBuf::from("/nonexistent/pigentl-sdk.so");
        match SdkLibrary::load(&missing, &missing) {
            Err(CameraError::LibraryLoad { path, reason }) => {
                assert!(path.contains("pigentl-sdk"));
                assert_eq!(reason, "file not found");
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("loaded a nonexistent library"),
        }
    }
}
