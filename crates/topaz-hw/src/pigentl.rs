//! [`Sdk`] over the vendor `pigentl-sdk` shared library.

use crate::error::CameraError;
use crate::ffi::{c_chars_to_string, CameraInfoRaw, ImageInfosRaw, SdkLibrary};
use crate::sdk::{BufferToken, CameraHandle, DeviceInfo, RawBuffer, Sdk, SdkResult, Status};
use libc::{c_char, c_int, c_ulong, c_void, size_t};
use std::path::{Path, PathBuf};

/// Install directory of the evaluation-kit software on Windows.
pub const DEFAULT_SDK_DIR: &str = "C:/Program Files/Teledyne e2v/Evalkit-Topaz/1.0/pigentl/bin";
/// File name of the GenTL producer next to the SDK.
pub const DEFAULT_CTI_NAME: &str = "pigentl.cti";
/// Size of the buffer handed to `PiGentlSdkGetLastError`.
const ERROR_TEXT_SIZE: usize = 512;

/// Where to find the SDK and its producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkPaths {
    pub library: PathBuf,
    pub producer: PathBuf,
}

impl SdkPaths {
    /// Both files inside `dir`, under their default names.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            library: dir.join(libloading::library_filename("pigentl-sdk")),
            producer: dir.join(DEFAULT_CTI_NAME),
        }
    }
}

impl Default for SdkPaths {
    fn default() -> Self {
        Self::in_dir(Path::new(DEFAULT_SDK_DIR))
    }
}

/// The real acquisition library.
pub struct PiGentlSdk {
    lib: SdkLibrary,
}

impl PiGentlSdk {
    pub fn load(paths: &SdkPaths) -> Result<Self, CameraError> {
        tracing::info!(
            library = %paths.library.display(),
            producer = %paths.producer.display(),
            "loading acquisition library"
        );
        let lib = SdkLibrary::load(&paths.library, &paths.producer)?;
        Ok(Self { lib })
    }

    fn raw_camera_info(&mut self, index: u32) -> SdkResult<CameraInfoRaw> {
        let mut info = CameraInfoRaw::zeroed();
        // SAFETY: `info` is a writable, correctly laid out tCameraInfo.
        status(unsafe { (self.lib.functions.get_camera_info)(index as c_ulong, &mut info) })?;
        Ok(info)
    }

    fn handle_ptr(handle: CameraHandle) -> *mut c_void {
        handle.as_raw() as *mut c_void
    }

    fn call_with_handle(
        &mut self,
        f: unsafe extern "C" fn(*mut c_void) -> c_int,
        handle: CameraHandle,
    ) -> SdkResult<()> {
        // SAFETY: `handle` came from a successful PiGentlSdkOpenCamera and
        // the session stops using it once the camera is closed.
        status(unsafe { f(Self::handle_ptr(handle)) })
    }
}

fn status(code: c_int) -> SdkResult<()> {
    Status(code).check()
}

impl Sdk for PiGentlSdk {
    fn initialize(&mut self) -> SdkResult<()> {
        // SAFETY: no arguments.
        status(unsafe { (self.lib.functions.initialize)() })
    }

    fn terminate(&mut self) -> SdkResult<()> {
        // SAFETY: no arguments.
        status(unsafe { (self.lib.functions.terminate)() })
    }

    fn update_camera_list(&mut self) -> SdkResult<u32> {
        let mut count: c_ulong = 0;
        // SAFETY: `count` is a valid out-parameter.
        status(unsafe { (self.lib.functions.update_camera_list)(&mut count) })?;
        Ok(count as u32)
    }

    fn camera_info(&mut self, index: u32) -> SdkResult<DeviceInfo> {
        let raw = self.raw_camera_info(index)?;
        Ok(DeviceInfo {
            index,
            vendor: c_chars_to_string(&raw.vendor),
            model: c_chars_to_string(&raw.model),
            serial: c_chars_to_string(&raw.serial),
            id: c_chars_to_string(&raw.pc_id),
        })
    }

    fn open_camera(&mut self, device: &DeviceInfo) -> SdkResult<CameraHandle> {
        // The library identifies the camera by the full info record.
        let mut info = self.raw_camera_info(device.index)?;
        let mut handle: *mut c_void = std::ptr::null_mut();
        // SAFETY: `info` was filled by the library and `handle` is a valid
        // out-parameter.
        status(unsafe { (self.lib.functions.open_camera)(&mut info, &mut handle) })?;
        if handle.is_null() {
            return Err(Status::INVALID_HANDLE);
        }
        Ok(CameraHandle::from_raw(handle as usize))
    }

    fn close_camera(&mut self, handle: CameraHandle) -> SdkResult<()> {
        let f = self.lib.functions.close_camera;
        self.call_with_handle(f, handle)
    }

    fn set_number_of_buffers(&mut self, handle: CameraHandle, count: usize) -> SdkResult<()> {
        // SAFETY: see `call_with_handle`.
        status(unsafe { (self.lib.functions.set_number_of_buffers)(Self::handle_ptr(handle), count) })
    }

    fn start_acquisition(&mut self, handle: CameraHandle) -> SdkResult<()> {
        let f = self.lib.functions.start_acquisition;
        self.call_with_handle(f, handle)
    }

    fn stop_acquisition(&mut self, handle: CameraHandle) -> SdkResult<()> {
        let f = self.lib.functions.stop_acquisition;
        self.call_with_handle(f, handle)
    }

    fn flush_buffers(&mut self, handle: CameraHandle) -> SdkResult<()> {
        let f = self.lib.functions.flush_buffers;
        self.call_with_handle(f, handle)
    }

    fn get_buffer(&mut self, handle: CameraHandle, timeout_us: u64) -> SdkResult<RawBuffer<'_>> {
        let mut infos = ImageInfosRaw::zeroed();
        let timeout = size_t::try_from(timeout_us).unwrap_or(size_t::MAX);
        // SAFETY: `infos` is a writable, correctly laid out tImageInfos.
        status(unsafe { (self.lib.functions.get_buffer)(Self::handle_ptr(handle), &mut infos, timeout) })?;

        let data: &[u8] = if infos.p_datas.is_null() || infos.image_size == 0 {
            &[]
        } else {
            // SAFETY: the driver guarantees `image_size` readable bytes at
            // `p_datas` until the buffer is requeued. The slice borrows
            // `self` mutably, so `requeue_buffer` cannot be called while it
            // is alive.
            unsafe { std::slice::from_raw_parts(infos.p_datas as *const u8, infos.image_size) }
        };

        Ok(RawBuffer {
            token: BufferToken::from_raw(infos.h_buffer as usize),
            data,
            width: infos.image_width,
            height: infos.image_height,
            pixel_type: infos.pixel_type,
            block_id: infos.block_id,
            timestamp: infos.timestamp,
            is_new_data: infos.is_new_data != 0,
            incomplete: infos.is_incomplete != 0,
            buffer_type: infos.buffer_type,
            contextual_data_size: infos.contextual_data_size,
        })
    }

    fn requeue_buffer(&mut self, handle: CameraHandle, token: BufferToken) -> SdkResult<()> {
        // SAFETY: `token` is the hBuffer of a buffer handed out by
        // PiGentlSdkGetBuffer and not requeued since.
        status(unsafe {
            (self.lib.functions.requeue_buffer)(Self::handle_ptr(handle), token.as_raw() as *mut c_void)
        })
    }

    fn read_register(&mut self, handle: CameraHandle, address: u32, buf: &mut [u8]) -> SdkResult<usize> {
        let mut size: size_t = buf.len();
        // SAFETY: `buf` is writable for `size` bytes; the library updates
        // `size` with the amount actually read.
        status(unsafe {
            (self.lib.functions.read_register)(
                Self::handle_ptr(handle),
                address as c_ulong,
                buf.as_mut_ptr() as *mut c_void,
                &mut size,
            )
        })?;
        Ok(size.min(buf.len()))
    }

    fn write_register(&mut self, handle: CameraHandle, address: u32, data: &[u8]) -> SdkResult<usize> {
        let mut size: size_t = data.len();
        // SAFETY: the library only reads `size` bytes from the buffer
        // despite the non-const pointer in its signature.
        status(unsafe {
            (self.lib.functions.write_register)(
                Self::handle_ptr(handle),
                address as c_ulong,
                data.as_ptr() as *mut c_void,
                &mut size,
            )
        })?;
        Ok(size)
    }

    fn error_text(&mut self, code: Status) -> Option<String> {
        let mut buf = [0 as c_char; ERROR_TEXT_SIZE];
        let mut size: size_t = ERROR_TEXT_SIZE;
        // SAFETY: `buf` is writable for `size` bytes.
        let rc = unsafe { (self.lib.functions.get_last_error)(code.0, buf.as_mut_ptr(), &mut size) };
        if rc != 0 {
            return None;
        }
        // Latin-1: every byte maps to the code point of the same value.
        let text: String = buf
            .iter()
            .map(|&c| c as u8)
            .take_while(|&b| b != 0)
            .map(char::from)
            .collect();
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}
