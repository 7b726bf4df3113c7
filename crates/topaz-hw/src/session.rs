//! Acquisition session: camera handle, buffer pool and start/stop ordering.
//!
//! ```text
//! Closed -> Opened -> Configured -> Acquiring -> Opened (stopped)
//! ```
//!
//! A session owns the library for its whole lifetime: `open` initializes it,
//! `close` (or drop) closes the camera and terminates it. Every vendor
//! status is surfaced with the name of the call that produced it.

use crate::error::{CameraError, RegisterFault, SdkFailure};
use crate::registers::{RegisterValue, Registers};
use crate::sdk::{ops, CameraHandle, DeviceInfo, Sdk, SdkResult, Status};
use std::fmt;
use std::time::Duration;
use topaz_core::{decode, Frame};

/// Default number of driver buffers.
pub const DEFAULT_BUFFER_COUNT: usize = 100;
/// Default device discovery budget.
pub const DEFAULT_DISCOVERY_ATTEMPTS: u32 = 10;
/// Default settling delay around flush/start/stop.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub buffer_count: usize,
    /// Camera-list refreshes before giving up; discovery is asynchronous on
    /// some transports.
    pub discovery_attempts: u32,
    /// Pause between discovery attempts.
    pub discovery_interval: Duration,
    /// Pause between flush and start, and between stop and flush. The
    /// driver gives no readiness signal for either transition.
    pub settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            discovery_attempts: DEFAULT_DISCOVERY_ATTEMPTS,
            discovery_interval: Duration::ZERO,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
    Configured,
    Acquiring,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Configured => "configured",
            Self::Acquiring => "acquiring",
        })
    }
}

/// Which discovered camera to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(u32),
    Serial(String),
    /// Transport-level id (`pcID`).
    Id(String),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::Index(0)
    }
}

impl DeviceSelector {
    fn matches(&self, device: &DeviceInfo) -> bool {
        match self {
            Self::Index(i) => device.index == *i,
            Self::Serial(serial) => device.serial == *serial,
            Self::Id(id) => device.id == *id,
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "index {i}"),
            Self::Serial(s) => write!(f, "serial {s}"),
            Self::Id(id) => write!(f, "id {id}"),
        }
    }
}

/// An open camera and its buffer pool.
///
/// Single-threaded: [`get_frame`](Self::get_frame) blocks the caller, and
/// every operation takes `&mut self`, so `stop` can never race an
/// outstanding retrieval.
pub struct Session<S: Sdk> {
    sdk: S,
    config: SessionConfig,
    state: SessionState,
    library_initialized: bool,
    handle: Option<CameraHandle>,
    device: Option<DeviceInfo>,
    buffer_count: Option<usize>,
}

impl<S: Sdk> Session<S> {
    /// Initialize the library, discover and open a camera, and size the
    /// buffer pool to `config.buffer_count`.
    ///
    /// On failure everything acquired so far is released before returning.
    /// `DeviceNotFound` means every refresh succeeded but the list stayed
    /// empty (or had no match for `selector`); if the last refresh itself
    /// failed, the error is `OpenFailed` naming the refresh call.
    pub fn open(sdk: S, selector: &DeviceSelector, config: SessionConfig) -> Result<Self, CameraError> {
        let mut session = Self {
            sdk,
            config,
            state: SessionState::Closed,
            library_initialized: false,
            handle: None,
            device: None,
            buffer_count: None,
        };

        session
            .call(ops::INITIALIZE, |sdk| sdk.initialize())
            .map_err(CameraError::OpenFailed)?;
        session.library_initialized = true;

        let count = session.discover()?;
        let device = session.select(count, selector)?;
        tracing::info!(
            index = device.index,
            vendor = %device.vendor,
            model = %device.model,
            serial = %device.serial,
            id = %device.id,
            "camera found"
        );

        let handle = session
            .call(ops::OPEN_CAMERA, |sdk| sdk.open_camera(&device))
            .map_err(CameraError::OpenFailed)?;
        session.handle = Some(handle);
        session.device = Some(device);
        session.state = SessionState::Opened;
        tracing::info!("camera opened");

        let buffer_count = session.config.buffer_count;
        session.configure(buffer_count)?;
        Ok(session)
    }

    /// Refresh the camera list until at least one camera shows up or the
    /// attempt budget runs out.
    fn discover(&mut self) -> Result<u32, CameraError> {
        let attempts = self.config.discovery_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=attempts {
            match self.call(ops::UPDATE_CAMERA_LIST, |sdk| sdk.update_camera_list()) {
                Ok(0) => {
                    last_failure = None;
                    tracing::debug!(attempt, "no camera discovered yet");
                }
                Ok(count) => {
                    tracing::info!(count, attempt, "camera(s) discovered");
                    return Ok(count);
                }
                Err(failure) => {
                    tracing::warn!(attempt, error = %failure, "camera list update failed");
                    last_failure = Some(failure);
                }
            }
            if attempt < attempts && !self.config.discovery_interval.is_zero() {
                std::thread::sleep(self.config.discovery_interval);
            }
        }

        match last_failure {
            Some(failure) => Err(CameraError::OpenFailed(failure)),
            None => Err(CameraError::DeviceNotFound(format!(
                "no camera discovered after {attempts} attempts"
            ))),
        }
    }

    fn select(&mut self, count: u32, selector: &DeviceSelector) -> Result<DeviceInfo, CameraError> {
        if let DeviceSelector::Index(index) = selector {
            if *index >= count {
                return Err(CameraError::DeviceNotFound(format!(
                    "{selector} requested but only {count} camera(s) discovered"
                )));
            }
            let index = *index;
            return self
                .call(ops::GET_CAMERA_INFO, |sdk| sdk.camera_info(index))
                .map_err(CameraError::OpenFailed);
        }

        for index in 0..count {
            let device = self
                .call(ops::GET_CAMERA_INFO, |sdk| sdk.camera_info(index))
                .map_err(CameraError::OpenFailed)?;
            if selector.matches(&device) {
                return Ok(device);
            }
        }
        Err(CameraError::DeviceNotFound(format!(
            "no camera with {selector} among {count} discovered"
        )))
    }

    /// Allocate `buffer_count` driver buffers sized to the current image
    /// format. Must not be called while acquiring.
    pub fn configure(&mut self, buffer_count: usize) -> Result<(), CameraError> {
        let handle = self.handle_for("configure")?;
        if self.state == SessionState::Acquiring {
            return Err(CameraError::InvalidState {
                op: "configure",
                state: self.state,
            });
        }
        if buffer_count == 0 {
            return Err(CameraError::InvalidArgument("buffer count must be at least 1".into()));
        }

        self.call(ops::SET_NUMBER_OF_BUFFERS, |sdk| sdk.set_number_of_buffers(handle, buffer_count))
            .map_err(CameraError::AcquisitionError)?;
        self.buffer_count = Some(buffer_count);
        self.state = SessionState::Configured;
        tracing::info!(buffer_count, "buffer pool allocated");
        Ok(())
    }

    /// Flush the pool, settle, then start the acquisition engine.
    ///
    /// Unconsumed frames from a previous run are discarded by the flush.
    pub fn start(&mut self) -> Result<(), CameraError> {
        let handle = self.handle_for("start")?;
        if self.state == SessionState::Acquiring || self.buffer_count.is_none() {
            return Err(CameraError::InvalidState {
                op: "start",
                state: self.state,
            });
        }

        self.call(ops::FLUSH_BUFFERS, |sdk| sdk.flush_buffers(handle))
            .map_err(CameraError::AcquisitionError)?;
        self.settle();
        self.call(ops::START_ACQUISITION, |sdk| sdk.start_acquisition(handle))
            .map_err(CameraError::AcquisitionError)?;

        self.state = SessionState::Acquiring;
        tracing::info!("acquisition started");
        Ok(())
    }

    /// Wait up to `timeout_us` for the next frame.
    ///
    /// The pixels are copied out and the buffer is requeued before this
    /// returns, whatever the outcome of the decode. A `Timeout` leaves the
    /// pool untouched and can be retried; any other error means the
    /// acquisition should be stopped and restarted.
    pub fn get_frame(&mut self, timeout_us: u64) -> Result<Frame, CameraError> {
        let handle = self.handle_for("get_frame")?;
        if self.state != SessionState::Acquiring {
            return Err(CameraError::InvalidState {
                op: "get_frame",
                state: self.state,
            });
        }

        let filled = match self.sdk.get_buffer(handle, timeout_us) {
            Ok(raw) => {
                let descriptor = raw.descriptor();
                let pixels = decode(
                    raw.data,
                    descriptor.width,
                    descriptor.height,
                    descriptor.raw_size,
                    descriptor.pixel_type,
                );
                Ok((raw.token, descriptor, pixels))
            }
            Err(status) => Err(status),
        };

        let (token, descriptor, pixels) = match filled {
            Ok(filled) => filled,
            Err(status) if status.is_timeout() => {
                tracing::debug!(timeout_us, "no frame within timeout");
                return Err(CameraError::Timeout { timeout_us });
            }
            Err(status) => return Err(CameraError::AcquisitionError(self.failure(ops::GET_BUFFER, status))),
        };

        self.call(ops::REQUEUE_BUFFER, |sdk| sdk.requeue_buffer(handle, token))
            .map_err(CameraError::AcquisitionError)?;

        let pixels = pixels?;
        if descriptor.incomplete {
            tracing::warn!(block_id = descriptor.block_id, "driver flagged frame as incomplete");
        }
        tracing::trace!(
            block_id = descriptor.block_id,
            width = descriptor.width,
            height = descriptor.height,
            raw_size = descriptor.raw_size,
            "frame retrieved"
        );
        Ok(Frame { descriptor, pixels })
    }

    /// Stop the engine, settle, and flush every buffer back to the input
    /// queue. Does nothing when not acquiring.
    pub fn stop(&mut self) -> Result<(), CameraError> {
        let handle = self.handle_for("stop")?;
        if self.state != SessionState::Acquiring {
            tracing::debug!(state = %self.state, "stop: not acquiring");
            return Ok(());
        }

        let stopped = self.call(ops::STOP_ACQUISITION, |sdk| sdk.stop_acquisition(handle));
        self.settle();
        let flushed = self.call(ops::FLUSH_BUFFERS, |sdk| sdk.flush_buffers(handle));
        self.state = SessionState::Opened;

        stopped.map_err(CameraError::AcquisitionError)?;
        flushed.map_err(CameraError::AcquisitionError)?;
        tracing::info!("acquisition stopped");
        Ok(())
    }

    /// Close the camera and terminate the library. Safe to call repeatedly;
    /// also runs on drop.
    pub fn close(&mut self) -> Result<(), CameraError> {
        if self.state == SessionState::Acquiring {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "stop before close failed");
            }
        }

        let mut first_error = None;

        if let Some(handle) = self.handle.take() {
            match self.call(ops::CLOSE_CAMERA, |sdk| sdk.close_camera(handle)) {
                Ok(()) => tracing::info!("camera closed"),
                Err(failure) => {
                    first_error.get_or_insert(CameraError::AcquisitionError(failure));
                }
            }
        }

        if self.library_initialized {
            self.library_initialized = false;
            if let Err(failure) = self.call(ops::TERMINATE, |sdk| sdk.terminate()) {
                first_error.get_or_insert(CameraError::AcquisitionError(failure));
            }
        }

        self.state = SessionState::Closed;
        self.device = None;
        self.buffer_count = None;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_acquiring(&self) -> bool {
        self.state == SessionState::Acquiring
    }

    /// The opened camera, until close.
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Size of the allocated pool, if one has been configured.
    pub fn buffer_count(&self) -> Option<usize> {
        self.buffer_count
    }

    /// Sleep for the configured settling delay.
    pub fn settle(&self) {
        if !self.config.settle_delay.is_zero() {
            std::thread::sleep(self.config.settle_delay);
        }
    }

    fn handle_for(&self, op: &'static str) -> Result<CameraHandle, CameraError> {
        self.handle.ok_or(CameraError::NotConnected { op })
    }

    /// Run one library call, turning a bad status into a named failure.
    fn call<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut S) -> SdkResult<T>,
    ) -> Result<T, SdkFailure> {
        match f(&mut self.sdk) {
            Ok(value) => Ok(value),
            Err(status) => Err(self.failure(op, status)),
        }
    }

    fn failure(&mut self, op: &'static str, status: Status) -> SdkFailure {
        let text = self.sdk.error_text(status);
        if text.is_none() {
            tracing::debug!(op, call = ops::GET_LAST_ERROR, code = status.0, "no error text for status");
        }
        SdkFailure { op, status, text }
    }
}

impl<S: Sdk> Registers for Session<S> {
    fn read_register(&mut self, address: u32, size: usize) -> Result<Vec<u8>, CameraError> {
        let handle = self.handle_for("read_register")?;
        let mut buf = vec![0u8; size];
        let delivered = self
            .call(ops::READ_REGISTER, |sdk| sdk.read_register(handle, address, &mut buf))
            .map_err(|failure| CameraError::RegisterIo {
                address,
                fault: RegisterFault::Device(failure),
            })?;

        if delivered < size {
            return Err(CameraError::RegisterIo {
                address,
                fault: RegisterFault::ShortRead {
                    requested: size,
                    delivered,
                },
            });
        }
        tracing::trace!(address, size, "register read");
        Ok(buf)
    }

    fn write_register(&mut self, address: u32, value: RegisterValue) -> Result<usize, CameraError> {
        let handle = self.handle_for("write_register")?;
        let bytes = value.to_le_bytes();
        let accepted = self
            .call(ops::WRITE_REGISTER, |sdk| sdk.write_register(handle, address, &bytes))
            .map_err(|failure| CameraError::RegisterIo {
                address,
                fault: RegisterFault::Device(failure),
            })?;

        if accepted != value.width() {
            tracing::warn!(address, requested = value.width(), accepted, "partial register write");
            return Err(CameraError::RegisterIo {
                address,
                fault: RegisterFault::ShortWrite {
                    requested: value.width(),
                    accepted,
                },
            });
        }
        tracing::trace!(address, ?value, "register written");
        Ok(accepted)
    }
}

impl<S: Sdk> Drop for Session<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockSdk, PoolStats};
    use topaz_core::{AddressMap, PixelArray};

    fn fast_config(buffer_count: usize) -> SessionConfig {
        SessionConfig {
            buffer_count,
            settle_delay: Duration::ZERO,
            ..SessionConfig::default()
        }
    }

    fn open_mock(buffer_count: usize) -> (MockSdk, Session<MockSdk>) {
        let sdk = MockSdk::topaz().unwrap();
        let session = Session::open(sdk.clone(), &DeviceSelector::default(), fast_config(buffer_count)).unwrap();
        (sdk, session)
    }

    #[test]
    fn test_open_configures_pool() {
        let (sdk, session) = open_mock(8);
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(session.buffer_count(), Some(8));
        assert_eq!(session.device().unwrap().serial, "TPZ-000123");
        assert_eq!(sdk.pool(), PoolStats { total: 8, queued: 8, held: 0 });
    }

    #[test]
    fn test_five_frames_requeued_in_order() {
        let (sdk, mut session) = open_mock(100);
        session.start().unwrap();

        let mut last = 0;
        for _ in 0..5 {
            let frame = session.get_frame(500_000).unwrap();
            assert_eq!(frame.pixels.shape(), &[48, 64]);
            assert!(matches!(frame.pixels, PixelArray::Mono8(_)));
            assert!(frame.block_id() >= last);
            last = frame.block_id();
            assert_eq!(sdk.pool().held, 0);
        }
        assert_eq!(sdk.count_calls(|c| matches!(c, MockCall::RequeueBuffer(_))), 5);

        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Opened);
        assert_eq!(sdk.pool(), PoolStats { total: 100, queued: 100, held: 0 });
    }

    #[test]
    fn test_incomplete_frame_flagged() {
        let (sdk, mut session) = open_mock(100);
        session.start().unwrap();

        sdk.mark_next_incomplete();
        let frame = session.get_frame(500_000).unwrap();
        assert!(frame.descriptor.incomplete);
        assert_eq!(frame.pixels.shape(), &[48, 64]);
        assert_eq!(sdk.pool().held, 0);

        let next = session.get_frame(500_000).unwrap();
        assert!(!next.descriptor.incomplete);
        assert_eq!(sdk.pool().held, 0);
    }

    #[test]
    fn test_flush_precedes_start() {
        let (sdk, mut session) = open_mock(2);
        session.start().unwrap();

        let calls = sdk.calls();
        let flush = calls.iter().position(|c| *c == MockCall::FlushBuffers).unwrap();
        let start = calls.iter().position(|c| *c == MockCall::StartAcquisition).unwrap();
        assert!(flush < start);
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let (sdk, mut session) = open_mock(2);
        session.start().unwrap();
        session.stop().unwrap();
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Opened);
        assert_eq!(sdk.count_calls(|c| *c == MockCall::StopAcquisition), 1);
    }

    #[test]
    fn test_stop_failure_still_flushes() {
        let (sdk, mut session) = open_mock(2);
        session.start().unwrap();
        session.get_frame(1000).unwrap();
        sdk.fail_on(ops::STOP_ACQUISITION, Status::IO);

        match session.stop() {
            Err(CameraError::AcquisitionError(failure)) => {
                assert_eq!(failure.op, ops::STOP_ACQUISITION);
                assert_eq!(failure.status, Status::IO);
            }
            other => panic!("unexpected {other:?}"),
        }
        let calls = sdk.calls();
        let stop = calls.iter().rposition(|c| *c == MockCall::StopAcquisition).unwrap();
        let flush = calls.iter().rposition(|c| *c == MockCall::FlushBuffers).unwrap();
        assert!(stop < flush);
        assert_eq!(session.state(), SessionState::Opened);
    }

    #[test]
    fn test_close_while_acquiring_survives_stop_failure() {
        let (sdk, mut session) = open_mock(2);
        session.start().unwrap();
        sdk.fail_on(ops::STOP_ACQUISITION, Status::IO);

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(sdk.count_calls(|c| *c == MockCall::StopAcquisition), 1);
        assert_eq!(sdk.count_calls(|c| *c == MockCall::CloseCamera), 1);
        assert!(!sdk.is_open());
        assert!(!sdk.is_initialized());
    }

    #[test]
    fn test_restart_after_stop() {
        let (_sdk, mut session) = open_mock(2);
        session.start().unwrap();
        session.get_frame(1000).unwrap();
        session.stop().unwrap();
        session.start().unwrap();
        assert!(session.get_frame(1000).is_ok());
    }

    #[test]
    fn test_timeout_leaves_pool_untouched() {
        let (sdk, mut session) = open_mock(3);
        session.start().unwrap();
        sdk.fail_next_get_buffer(Status::TIMEOUT);

        let before = sdk.pool();
        let err = session.get_frame(500).unwrap_err();
        assert!(matches!(err, CameraError::Timeout { timeout_us: 500 }));
        assert!(err.is_recoverable());
        assert_eq!(sdk.pool(), before);
        assert_eq!(session.state(), SessionState::Acquiring);
        assert!(session.get_frame(500).is_ok());
    }

    #[test]
    fn test_driver_error_is_named() {
        let (sdk, mut session) = open_mock(3);
        session.start().unwrap();
        sdk.fail_next_get_buffer(Status::IO);

        match session.get_frame(500) {
            Err(CameraError::AcquisitionError(failure)) => {
                assert_eq!(failure.op, ops::GET_BUFFER);
                assert_eq!(failure.status, Status::IO);
                assert_eq!(failure.text.as_deref(), Some("communication error"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_failure_still_requeues() {
        let (sdk, mut session) = open_mock(2);
        let map = AddressMap::embedded().unwrap();
        sdk.set_register(map.bootstrap.sensor_width, 0u32.to_le_bytes().to_vec());
        session.start().unwrap();

        let err = session.get_frame(1000).unwrap_err();
        assert!(matches!(err, CameraError::Decode(_)));
        assert_eq!(sdk.pool(), PoolStats { total: 2, queued: 2, held: 0 });
    }

    #[test]
    fn test_get_frame_requires_acquiring() {
        let (_sdk, mut session) = open_mock(2);
        assert!(matches!(
            session.get_frame(1000),
            Err(CameraError::InvalidState { state: SessionState::Configured, .. })
        ));
    }

    #[test]
    fn test_configure_while_acquiring_rejected() {
        let (_sdk, mut session) = open_mock(2);
        session.start().unwrap();
        assert!(matches!(
            session.configure(4),
            Err(CameraError::InvalidState { op: "configure", .. })
        ));
        assert!(matches!(session.start(), Err(CameraError::InvalidState { op: "start", .. })));
    }

    #[test]
    fn test_configure_rejects_zero() {
        let (_sdk, mut session) = open_mock(2);
        assert!(matches!(session.configure(0), Err(CameraError::InvalidArgument(_))));
    }

    #[test]
    fn test_no_device_after_budget() {
        let sdk = MockSdk::topaz().unwrap().with_devices(0);
        let result = Session::open(sdk.clone(), &DeviceSelector::default(), fast_config(2));
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
        assert_eq!(sdk.count_calls(|c| *c == MockCall::UpdateCameraList), 10);
        assert!(!sdk.is_initialized());
    }

    #[test]
    fn test_failing_refresh_is_open_failure() {
        let sdk = MockSdk::topaz().unwrap();
        sdk.fail_on(ops::UPDATE_CAMERA_LIST, Status::IO);
        match Session::open(sdk.clone(), &DeviceSelector::default(), fast_config(2)) {
            Err(CameraError::OpenFailed(failure)) => {
                assert_eq!(failure.op, ops::UPDATE_CAMERA_LIST);
                assert_eq!(failure.status, Status::IO);
            }
            other => panic!("unexpected {:?}", other.map(|s| s.state())),
        }
        assert_eq!(sdk.count_calls(|c| *c == MockCall::UpdateCameraList), 10);
        assert!(!sdk.is_initialized());
    }

    #[test]
    fn test_late_discovery() {
        let sdk = MockSdk::topaz().unwrap().with_discovery_delay(3);
        let session = Session::open(sdk.clone(), &DeviceSelector::default(), fast_config(2)).unwrap();
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(sdk.count_calls(|c| *c == MockCall::UpdateCameraList), 4);
    }

    #[test]
    fn test_select_by_serial() {
        let sdk = MockSdk::topaz().unwrap().with_devices(3);
        let selector = DeviceSelector::Serial("TPZ-000002".into());
        let session = Session::open(sdk, &selector, fast_config(2)).unwrap();
        assert_eq!(session.device().unwrap().index, 2);

        let sdk = MockSdk::topaz().unwrap().with_devices(3);
        let result = Session::open(sdk, &DeviceSelector::Index(5), fast_config(2));
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_open_failure_releases_library() {
        let sdk = MockSdk::topaz().unwrap();
        sdk.fail_on(ops::OPEN_CAMERA, Status::RESOURCE_IN_USE);
        match Session::open(sdk.clone(), &DeviceSelector::default(), fast_config(2)) {
            Err(CameraError::OpenFailed(failure)) => assert_eq!(failure.op, ops::OPEN_CAMERA),
            other => panic!("unexpected {:?}", other.map(|s| s.state())),
        }
        assert!(!sdk.is_initialized());
        assert!(!sdk.is_open());
    }

    #[test]
    fn test_unknown_status_has_no_text() {
        let sdk = MockSdk::topaz().unwrap();
        sdk.fail_on(ops::OPEN_CAMERA, Status(-4242));
        match Session::open(sdk, &DeviceSelector::default(), fast_config(2)) {
            Err(CameraError::OpenFailed(failure)) => {
                assert_eq!(failure.status, Status(-4242));
                assert_eq!(failure.text, None);
            }
            other => panic!("unexpected {:?}", other.map(|s| s.state())),
        }
    }

    #[test]
    fn test_pool_failure_closes_camera() {
        let sdk = MockSdk::topaz().unwrap();
        sdk.fail_on(ops::SET_NUMBER_OF_BUFFERS, Status::INVALID_PARAMETER);
        let result = Session::open(sdk.clone(), &DeviceSelector::default(), fast_config(2));
        assert!(matches!(result, Err(CameraError::AcquisitionError(_))));
        assert!(!sdk.is_open());
        assert!(!sdk.is_initialized());
    }

    #[test]
    fn test_close_then_operations_fail() {
        let (sdk, mut session) = open_mock(2);
        session.start().unwrap();
        session.close().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!sdk.is_acquiring());
        assert!(matches!(session.get_frame(1000), Err(CameraError::NotConnected { .. })));
        assert!(matches!(session.read_u32(0x1000C), Err(CameraError::NotConnected { .. })));
        session.close().unwrap();
        assert_eq!(sdk.count_calls(|c| *c == MockCall::Terminate), 1);
    }

    #[test]
    fn test_drop_closes_and_terminates() {
        let sdk = MockSdk::topaz().unwrap();
        {
            let mut session = Session::open(sdk.clone(), &DeviceSelector::default(), fast_config(2)).unwrap();
            session.start().unwrap();
            assert!(sdk.is_open());
        }
        assert!(!sdk.is_open());
        assert!(!sdk.is_initialized());
        assert_eq!(sdk.count_calls(|c| *c == MockCall::StopAcquisition), 1);
        assert_eq!(sdk.count_calls(|c| *c == MockCall::CloseCamera), 1);
    }

    #[test]
    fn test_register_round_trip() {
        let (sdk, mut session) = open_mock(2);
        let map = AddressMap::embedded().unwrap();
        assert_eq!(session.read_u32(map.bootstrap.sensor_width).unwrap(), 64);

        session.write_register(map.bootstrap.awb_enable, RegisterValue::I32(1)).unwrap();
        assert_eq!(sdk.register(map.bootstrap.awb_enable), Some(vec![1, 0, 0, 0]));
    }

    #[test]
    fn test_short_register_transfers() {
        let (sdk, mut session) = open_mock(2);
        let map = AddressMap::embedded().unwrap();

        sdk.set_short_read(Some(2));
        match session.read_u32(map.bootstrap.sensor_height) {
            Err(CameraError::RegisterIo { fault, .. }) => {
                assert_eq!(fault, RegisterFault::ShortRead { requested: 4, delivered: 2 })
            }
            other => panic!("unexpected {other:?}"),
        }
        sdk.set_short_read(None);

        sdk.set_short_write(Some(1));
        match session.write_register(map.bootstrap.awb_enable, RegisterValue::U32(1)) {
            Err(CameraError::RegisterIo { fault, .. }) => {
                assert_eq!(fault, RegisterFault::ShortWrite { requested: 4, accepted: 1 })
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_register_names_call() {
        let (_sdk, mut session) = open_mock(2);
        match session.read_register(0x7FFF0, 4) {
            Err(CameraError::RegisterIo {
                address,
                fault: RegisterFault::Device(failure),
            }) => {
                assert_eq!(address, 0x7FFF0);
                assert_eq!(failure.op, ops::READ_REGISTER);
                assert_eq!(failure.status, Status::INVALID_ADDRESS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
