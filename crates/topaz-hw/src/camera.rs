//! Named sensor properties over raw registers.
//!
//! Every property is one or two register transfers through the open
//! [`Session`]; nothing is cached, so values always reflect the device.
//! Exposure and wait time are converted between milliseconds and the
//! sensor's line-period units using the live `LineLength` register.

use crate::error::CameraError;
use crate::registers::{RegisterValue, Registers};
use crate::sdk::Sdk;
use crate::session::{DeviceSelector, Session, SessionConfig, SessionState};
use serde::Serialize;
use topaz_core::timing::{line_period_us, lines_to_ms, ms_to_lines};
use topaz_core::{AddressMap, Frame, PixelFormat};

/// Size of the identity string registers.
const IDENTITY_FIELD_SIZE: usize = 32;
const SERIAL_FIELD_SIZE: usize = 16;

/// Scale between a white-balance gain and its register value.
const WB_GAIN_SCALE: f64 = 1e6;

/// `AWBenable` bits: 0 enables the white-balance stage, 1 triggers a
/// one-shot measurement.
const AWB_ENABLE: u32 = 0b01;
const AWB_ONE_SHOT: u32 = 0b10;

/// `VerticalSubsampling` value selecting 2x2 readout.
const VERTICAL_SUBSAMPLING_2X: u32 = 4;

/// Identity and current settings, as printed by `topaz info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub firmware_version: String,
    pub device_version: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub chip_id: u16,
    pub line_length: u16,
    pub line_period_us: f64,
    pub exposure_ms: f64,
    pub wait_ms: f64,
}

/// An open Topaz camera.
pub struct Topaz<S: Sdk> {
    session: Session<S>,
    map: AddressMap,
}

impl<S: Sdk> Topaz<S> {
    /// Open a camera with the compiled-in Topaz register table.
    pub fn open(sdk: S, selector: &DeviceSelector, config: SessionConfig) -> Result<Self, CameraError> {
        let map = AddressMap::embedded()?.clone();
        Self::with_address_map(sdk, selector, config, map)
    }

    /// Open a camera whose firmware uses a different register table.
    pub fn with_address_map(
        sdk: S,
        selector: &DeviceSelector,
        config: SessionConfig,
        map: AddressMap,
    ) -> Result<Self, CameraError> {
        let session = Session::open(sdk, selector, config)?;
        tracing::debug!(model = %map.device.name, clock_mhz = map.device.clock_mhz, "address map in use");
        Ok(Self { session, map })
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<S> {
        &mut self.session
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.map
    }

    pub fn clock_mhz(&self) -> f64 {
        self.map.device.clock_mhz
    }

    // --- acquisition ---

    pub fn start_acquisition(&mut self) -> Result<(), CameraError> {
        self.session.start()
    }

    pub fn stop_acquisition(&mut self) -> Result<(), CameraError> {
        self.session.stop()
    }

    pub fn get_frame(&mut self, timeout_us: u64) -> Result<Frame, CameraError> {
        self.session.get_frame(timeout_us)
    }

    pub fn close(&mut self) -> Result<(), CameraError> {
        self.session.close()
    }

    // --- identity ---

    pub fn vendor_name(&mut self) -> Result<String, CameraError> {
        let addr = self.map.bootstrap.device_vendor_name;
        self.session.read_string(addr, IDENTITY_FIELD_SIZE)
    }

    pub fn model_name(&mut self) -> Result<String, CameraError> {
        let addr = self.map.bootstrap.device_model_name;
        self.session.read_string(addr, IDENTITY_FIELD_SIZE)
    }

    pub fn device_version(&mut self) -> Result<String, CameraError> {
        let addr = self.map.bootstrap.device_version;
        self.session.read_string(addr, IDENTITY_FIELD_SIZE)
    }

    pub fn firmware_version(&mut self) -> Result<String, CameraError> {
        let addr = self.map.bootstrap.device_firmware_version;
        self.session.read_string(addr, IDENTITY_FIELD_SIZE)
    }

    pub fn serial_number(&mut self) -> Result<String, CameraError> {
        let addr = self.map.bootstrap.serial_number;
        self.session.read_string(addr, SERIAL_FIELD_SIZE)
    }

    /// Read identity and the current format and timing in one go.
    pub fn device_summary(&mut self) -> Result<DeviceSummary, CameraError> {
        let line_length = self.line_length()?;
        Ok(DeviceSummary {
            vendor: self.vendor_name()?,
            model: self.model_name()?,
            serial: self.serial_number()?,
            firmware_version: self.firmware_version()?,
            device_version: self.device_version()?,
            width: self.sensor_width()?,
            height: self.sensor_height()?,
            pixel_format: self.pixel_format()?,
            chip_id: self.chip_id()?,
            line_length,
            line_period_us: line_period_us(line_length, self.clock_mhz()),
            exposure_ms: self.exposure_time_ms()?,
            wait_ms: self.wait_time_ms()?,
        })
    }

    // --- image format ---

    pub fn sensor_width(&mut self) -> Result<u32, CameraError> {
        let addr = self.map.bootstrap.sensor_width;
        self.session.read_u32(addr)
    }

    pub fn sensor_height(&mut self) -> Result<u32, CameraError> {
        let addr = self.map.bootstrap.sensor_height;
        self.session.read_u32(addr)
    }

    pub fn pixel_format(&mut self) -> Result<PixelFormat, CameraError> {
        let code = self.session.read_u32(self.map.bootstrap.pixel_format)?;
        PixelFormat::from_code(code).ok_or(CameraError::UnsupportedPixelFormat(code))
    }

    /// Select the output format. Takes effect on the next buffer-pool
    /// allocation, so the session is reconfigured when it is not acquiring.
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        if self.session.state() == SessionState::Acquiring {
            return Err(CameraError::InvalidState {
                op: "set_pixel_format",
                state: SessionState::Acquiring,
            });
        }
        let addr = self.map.bootstrap.pixel_format;
        self.session.write_register(addr, RegisterValue::U32(format.code()))?;
        tracing::info!(format = %format, "pixel format set");

        if let Some(count) = self.session.buffer_count() {
            self.session.configure(count)?;
        }
        Ok(())
    }

    /// Select the output format by bit depth: 8, 10 or 32 (RGB).
    pub fn set_bit_depth(&mut self, bits: u32) -> Result<(), CameraError> {
        let format = PixelFormat::from_bit_depth(bits)
            .ok_or_else(|| CameraError::InvalidArgument(format!("no pixel format with bit depth {bits}")))?;
        self.set_pixel_format(format)
    }

    // --- raw sensor registers ---

    /// Read 16-bit sensor register `offset` (relative to the sensor base).
    pub fn read_sensor_reg(&mut self, offset: u32) -> Result<u16, CameraError> {
        let addr = self.map.sensor.absolute(offset);
        self.session.read_u16(addr)
    }

    /// Write 16-bit sensor register `offset` (relative to the sensor base).
    pub fn write_sensor_reg(&mut self, offset: u32, value: u16) -> Result<(), CameraError> {
        let addr = self.map.sensor.absolute(offset);
        self.write_sensor_abs(addr, value)
    }

    /// Sensor registers are 16 bits wide but travel in a 4-byte container.
    fn write_sensor_abs(&mut self, addr: u32, value: u16) -> Result<(), CameraError> {
        self.session.write_register(addr, RegisterValue::U32(value as u32))?;
        Ok(())
    }

    pub fn chip_id(&mut self) -> Result<u16, CameraError> {
        let addr = self.map.sensor.chip_id;
        self.session.read_u16(addr)
    }

    /// Line length in reference-clock cycles.
    pub fn line_length(&mut self) -> Result<u16, CameraError> {
        let addr = self.map.sensor.line_length;
        self.session.read_u16(addr)
    }

    pub fn line_period_us(&mut self) -> Result<f64, CameraError> {
        Ok(line_period_us(self.line_length()?, self.clock_mhz()))
    }

    // --- timing ---

    pub fn exposure_time_ms(&mut self) -> Result<f64, CameraError> {
        let addr = self.map.sensor.exposure_time;
        self.read_line_time_ms(addr)
    }

    /// Set the exposure time. The register holds whole line periods, so the
    /// value is truncated to the line period below `ms`.
    pub fn set_exposure_time_ms(&mut self, ms: f64) -> Result<(), CameraError> {
        let line_length = self.line_length()?;
        let lines = ms_to_lines(ms, line_length, self.clock_mhz())?;
        self.write_sensor_abs(self.map.sensor.exposure_time, lines)?;
        tracing::info!(ms, lines, line_length, "exposure time set");
        Ok(())
    }

    pub fn wait_time_ms(&mut self) -> Result<f64, CameraError> {
        let addr = self.map.sensor.wait_time;
        self.read_line_time_ms(addr)
    }

    fn read_line_time_ms(&mut self, addr: u32) -> Result<f64, CameraError> {
        let lines = self.session.read_u16(addr)?;
        let line_length = self.line_length()?;
        Ok(lines_to_ms(lines, line_length, self.clock_mhz()))
    }

    // --- gain and offset ---

    pub fn analog_gain(&mut self) -> Result<u16, CameraError> {
        let addr = self.map.sensor.analog_gain;
        self.session.read_u16(addr)
    }

    pub fn set_analog_gain(&mut self, gain: u16) -> Result<(), CameraError> {
        self.write_sensor_abs(self.map.sensor.analog_gain, gain)?;
        tracing::info!(gain, "analog gain set");
        Ok(())
    }

    pub fn clamp_offset(&mut self) -> Result<u16, CameraError> {
        let addr = self.map.sensor.clamp_offset;
        self.session.read_u16(addr)
    }

    pub fn set_clamp_offset(&mut self, offset: u16) -> Result<(), CameraError> {
        self.write_sensor_abs(self.map.sensor.clamp_offset, offset)?;
        tracing::info!(offset, "clamp offset set");
        Ok(())
    }

    // --- exposure control and white balance ---

    pub fn set_auto_exposure(&mut self, enable: bool) -> Result<(), CameraError> {
        let addr = self.map.bootstrap.auto_exposure;
        self.session.write_register(addr, RegisterValue::U32(enable as u32))?;
        tracing::info!(enable, "auto exposure");
        Ok(())
    }

    /// Write the red, green and blue white-balance gains.
    pub fn set_white_balance_gains(&mut self, red: f64, green: f64, blue: f64) -> Result<(), CameraError> {
        let b = &self.map.bootstrap;
        let channels = [(b.awb_red_gain, red), (b.awb_green_gain, green), (b.awb_blue_gain, blue)];
        let values = channels
            .iter()
            .map(|&(addr, gain)| Ok((addr, wb_gain_register(gain)?)))
            .collect::<Result<Vec<_>, CameraError>>()?;

        for (addr, value) in values {
            self.session.write_register(addr, RegisterValue::U32(value))?;
        }
        tracing::info!(red, green, blue, "white balance gains set");
        Ok(())
    }

    /// Enable or disable the white-balance stage. Gains apply while
    /// acquiring.
    pub fn enable_white_balance(&mut self, enable: bool) -> Result<(), CameraError> {
        let value = if enable { AWB_ENABLE } else { 0 };
        let addr = self.map.bootstrap.awb_enable;
        self.session.write_register(addr, RegisterValue::U32(value))?;
        tracing::info!(enable, "white balance");
        Ok(())
    }

    /// Measure and apply white-balance gains from the live image.
    ///
    /// Requires a running acquisition. Raises the trigger bit, waits one
    /// settling delay, then drops back to plain enable.
    pub fn one_shot_white_balance(&mut self) -> Result<(), CameraError> {
        if !self.session.is_acquiring() {
            return Err(CameraError::InvalidState {
                op: "one_shot_white_balance",
                state: self.session.state(),
            });
        }
        let addr = self.map.bootstrap.awb_enable;
        self.session
            .write_register(addr, RegisterValue::U32(AWB_ENABLE | AWB_ONE_SHOT))?;
        self.session.settle();
        self.session.write_register(addr, RegisterValue::U32(AWB_ENABLE))?;
        tracing::info!("one-shot white balance done");
        Ok(())
    }

    /// Switch 2x2 vertical subsampling on or off.
    pub fn set_vertical_subsampling(&mut self, enable: bool) -> Result<(), CameraError> {
        let value = if enable { VERTICAL_SUBSAMPLING_2X as u16 } else { 0 };
        self.write_sensor_abs(self.map.sensor.vertical_subsampling, value)?;
        tracing::info!(enable, "vertical subsampling");
        Ok(())
    }

    pub fn vertical_subsampling(&mut self) -> Result<bool, CameraError> {
        let addr = self.map.sensor.vertical_subsampling;
        Ok(self.session.read_u16(addr)? as u32 == VERTICAL_SUBSAMPLING_2X)
    }
}

fn wb_gain_register(gain: f64) -> Result<u32, CameraError> {
    let scaled = gain * WB_GAIN_SCALE;
    if !scaled.is_finite() || scaled < 0.0 || scaled > u32::MAX as f64 {
        return Err(CameraError::InvalidArgument(format!("white-balance gain {gain} out of range")));
    }
    Ok(scaled as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockSdk};
    use std::time::Duration;
    use topaz_core::PixelArray;

    fn open() -> (MockSdk, Topaz<MockSdk>) {
        let sdk = MockSdk::topaz().unwrap();
        let config = SessionConfig {
            buffer_count: 4,
            settle_delay: Duration::ZERO,
            ..SessionConfig::default()
        };
        let cam = Topaz::open(sdk.clone(), &DeviceSelector::default(), config).unwrap();
        (sdk, cam)
    }

    fn u32_at(sdk: &MockSdk, addr: u32) -> u32 {
        let bytes = sdk.register(addr).unwrap();
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[test]
    fn test_identity_strings() {
        let (_sdk, mut cam) = open();
        assert_eq!(cam.vendor_name().unwrap(), "Teledyne e2v");
        assert_eq!(cam.serial_number().unwrap(), "TPZ-000123");
        let summary = cam.device_summary().unwrap();
        assert_eq!(summary.width, 64);
        assert_eq!(summary.height, 48);
        assert_eq!(summary.pixel_format, PixelFormat::Mono8);
        assert_eq!(summary.chip_id, 0x0A70);
        assert!((summary.line_period_us - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_exposure_conversion() {
        let (sdk, mut cam) = open();
        // 500 lines of 1000 cycles at 50 MHz
        assert!((cam.exposure_time_ms().unwrap() - 10.0).abs() < 1e-9);
        assert!((cam.wait_time_ms().unwrap() - 2.0).abs() < 1e-9);

        cam.set_exposure_time_ms(25.0).unwrap();
        let map = AddressMap::embedded().unwrap();
        assert_eq!(u32_at(&sdk, map.sensor.exposure_time), 1250);
        assert!((cam.exposure_time_ms().unwrap() - 25.0).abs() < 0.02);
    }

    #[test]
    fn test_exposure_round_trip_within_one_line() {
        let (_sdk, mut cam) = open();
        let period_ms = cam.line_period_us().unwrap() * 1e-3;
        for ms in [0.5, 3.3333, 10.019, 25.0, 1000.0] {
            cam.set_exposure_time_ms(ms).unwrap();
            let back = cam.exposure_time_ms().unwrap();
            assert!((ms - back).abs() <= period_ms, "{ms} -> {back}");
        }
    }

    #[test]
    fn test_exposure_rejects_bad_input() {
        let (sdk, mut cam) = open();
        assert!(matches!(cam.set_exposure_time_ms(-1.0), Err(CameraError::InvalidArgument(_))));
        assert!(matches!(cam.set_exposure_time_ms(1e9), Err(CameraError::InvalidArgument(_))));

        let map = AddressMap::embedded().unwrap();
        sdk.set_register(map.sensor.line_length, vec![0, 0]);
        assert!(matches!(cam.set_exposure_time_ms(1.0), Err(CameraError::InvalidArgument(_))));
    }

    #[test]
    fn test_sensor_writes_use_four_byte_container() {
        let (sdk, mut cam) = open();
        cam.write_sensor_reg(0x0D, 0x0102).unwrap();
        let map = AddressMap::embedded().unwrap();
        assert_eq!(sdk.register(map.sensor.analog_gain), Some(vec![2, 1, 0, 0]));
        assert_eq!(cam.read_sensor_reg(0x0D).unwrap(), 0x0102);
        assert_eq!(cam.analog_gain().unwrap(), 0x0102);
        assert_eq!(cam.read_sensor_reg(0x7F).unwrap(), 0x0A70);
    }

    #[test]
    fn test_set_bit_depth_reconfigures_pool() {
        let (sdk, mut cam) = open();
        cam.set_bit_depth(32).unwrap();
        assert_eq!(cam.pixel_format().unwrap(), PixelFormat::Rgb24);
        assert_eq!(sdk.count_calls(|c| matches!(c, MockCall::SetNumberOfBuffers(4))), 2);

        cam.start_acquisition().unwrap();
        let frame = cam.get_frame(500_000).unwrap();
        assert!(matches!(frame.pixels, PixelArray::Rgb8(_)));
        assert_eq!(frame.pixels.shape(), &[48, 64, 3]);

        assert!(matches!(cam.set_bit_depth(12), Err(CameraError::InvalidArgument(_))));
        assert!(matches!(cam.set_bit_depth(8), Err(CameraError::InvalidState { .. })));
    }

    #[test]
    fn test_mono10_frames_are_u16() {
        let (_sdk, mut cam) = open();
        cam.set_bit_depth(10).unwrap();
        cam.start_acquisition().unwrap();
        let frame = cam.get_frame(500_000).unwrap();
        let PixelArray::Mono16(pixels) = &frame.pixels else {
            panic!("expected 16-bit samples");
        };
        assert!(pixels.iter().all(|&v| v <= 0x3FF));
    }

    #[test]
    fn test_unknown_pixel_format_code() {
        let (sdk, mut cam) = open();
        let map = AddressMap::embedded().unwrap();
        sdk.set_register(map.bootstrap.pixel_format, 0xDEAD_BEEFu32.to_le_bytes().to_vec());
        assert!(matches!(cam.pixel_format(), Err(CameraError::UnsupportedPixelFormat(0xDEAD_BEEF))));
    }

    #[test]
    fn test_white_balance_gains_scaled() {
        let (sdk, mut cam) = open();
        cam.set_white_balance_gains(1.8, 1.0, 1.6).unwrap();
        let b = &AddressMap::embedded().unwrap().bootstrap;
        assert_eq!(u32_at(&sdk, b.awb_red_gain), 1_800_000);
        assert_eq!(u32_at(&sdk, b.awb_green_gain), 1_000_000);
        assert_eq!(u32_at(&sdk, b.awb_blue_gain), 1_600_000);
    }

    #[test]
    fn test_white_balance_gain_validation_writes_nothing() {
        let (sdk, mut cam) = open();
        let before = sdk.count_calls(|c| matches!(c, MockCall::WriteRegister(..)));
        assert!(matches!(
            cam.set_white_balance_gains(1.0, f64::NAN, 1.0),
            Err(CameraError::InvalidArgument(_))
        ));
        assert_eq!(sdk.count_calls(|c| matches!(c, MockCall::WriteRegister(..))), before);
    }

    #[test]
    fn test_one_shot_white_balance_sequence() {
        let (sdk, mut cam) = open();
        assert!(matches!(cam.one_shot_white_balance(), Err(CameraError::InvalidState { .. })));

        cam.enable_white_balance(true).unwrap();
        cam.start_acquisition().unwrap();
        cam.one_shot_white_balance().unwrap();

        let awb = AddressMap::embedded().unwrap().bootstrap.awb_enable;
        let writes: Vec<Vec<u8>> = sdk
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::WriteRegister(addr, bytes) if addr == awb => Some(bytes),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![vec![1, 0, 0, 0], vec![3, 0, 0, 0], vec![1, 0, 0, 0]]);
    }

    #[test]
    fn test_vertical_subsampling_uses_sensor_register() {
        let (sdk, mut cam) = open();
        cam.set_vertical_subsampling(true).unwrap();
        let addr = AddressMap::embedded().unwrap().sensor.vertical_subsampling;
        assert_eq!(addr, 0x3001D);
        assert_eq!(sdk.register(addr), Some(vec![4, 0, 0, 0]));
        assert!(cam.vertical_subsampling().unwrap());

        cam.set_vertical_subsampling(false).unwrap();
        assert!(!cam.vertical_subsampling().unwrap());
    }

    #[test]
    fn test_auto_exposure_flag() {
        let (sdk, mut cam) = open();
        cam.set_auto_exposure(true).unwrap();
        let addr = AddressMap::embedded().unwrap().bootstrap.auto_exposure;
        assert_eq!(u32_at(&sdk, addr), 1);
    }

    #[test]
    fn test_close_disconnects_facade() {
        let (sdk, mut cam) = open();
        cam.close().unwrap();
        assert!(matches!(cam.sensor_width(), Err(CameraError::NotConnected { .. })));
        assert!(!sdk.is_initialized());
    }
}
