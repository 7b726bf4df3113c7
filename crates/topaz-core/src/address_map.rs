//! Register address tables.
//!
//! Maps named camera features to control-plane addresses. The Topaz table
//! is embedded at compile time from `contrib/hw/topaz.toml`; a different
//! table can be loaded from disk for other firmware revisions.
//!
//! Two namespaces: bootstrap (device identity, image format, white balance)
//! below the sensor base address, and sensor timing/gain registers at or
//! above it.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

const TOPAZ_MAP: &str = include_str!("../../../contrib/hw/topaz.toml");

static EMBEDDED: OnceLock<Result<AddressMap, String>> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum AddressMapError {
    #[error("bad address map TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid address map: {0}")]
    Invalid(String),
    #[error("embedded address map is invalid: {0}")]
    Embedded(String),
}

/// Top-level structure of an address map file.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressMap {
    pub device: ModelInfo,
    pub bootstrap: BootstrapAddresses,
    pub sensor: SensorAddresses,
}

/// Model-level constants from the `[device]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Sensor reference clock; scales the line-time registers.
    pub clock_mhz: f64,
}

/// Device-info and image-format registers (`[bootstrap]`).
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAddresses {
    pub device_vendor_name: u32,
    pub device_model_name: u32,
    pub device_version: u32,
    pub device_firmware_version: u32,
    pub serial_number: u32,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub pixel_format: u32,
    pub auto_exposure: u32,
    pub awb_enable: u32,
    pub awb_red_gain: u32,
    pub awb_green_gain: u32,
    pub awb_blue_gain: u32,
}

/// Sensor registers (`[sensor]`). All 16 bits wide.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorAddresses {
    pub base_address: u32,
    pub line_length: u32,
    pub wait_time: u32,
    pub exposure_time: u32,
    pub analog_gain: u32,
    pub vertical_subsampling: u32,
    pub clamp_offset: u32,
    pub chip_id: u32,
}

impl BootstrapAddresses {
    fn named(&self) -> [(&'static str, u32); 13] {
        [
            ("device_vendor_name", self.device_vendor_name),
            ("device_model_name", self.device_model_name),
            ("device_version", self.device_version),
            ("device_firmware_version", self.device_firmware_version),
            ("serial_number", self.serial_number),
            ("sensor_width", self.sensor_width),
            ("sensor_height", self.sensor_height),
            ("pixel_format", self.pixel_format),
            ("auto_exposure", self.auto_exposure),
            ("awb_enable", self.awb_enable),
            ("awb_red_gain", self.awb_red_gain),
            ("awb_green_gain", self.awb_green_gain),
            ("awb_blue_gain", self.awb_blue_gain),
        ]
    }
}

impl SensorAddresses {
    /// Absolute address of raw sensor register `offset`.
    pub fn absolute(&self, offset: u32) -> u32 {
        self.base_address + offset
    }

    fn named(&self) -> [(&'static str, u32); 7] {
        [
            ("line_length", self.line_length),
            ("wait_time", self.wait_time),
            ("exposure_time", self.exposure_time),
            ("analog_gain", self.analog_gain),
            ("vertical_subsampling", self.vertical_subsampling),
            ("clamp_offset", self.clamp_offset),
            ("chip_id", self.chip_id),
        ]
    }
}

impl AddressMap {
    /// The compiled-in Topaz table.
    pub fn embedded() -> Result<&'static AddressMap, AddressMapError> {
        EMBEDDED
            .get_or_init(|| AddressMap::from_toml(TOPAZ_MAP).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| AddressMapError::Embedded(e.clone()))
    }

    /// Parse and validate a table.
    pub fn from_toml(src: &str) -> Result<Self, AddressMapError> {
        let map: AddressMap = toml::from_str(src)?;
        map.validate()?;
        Ok(map)
    }

    /// Load a table from a file on disk.
    pub fn load(path: &Path) -> Result<Self, AddressMapError> {
        let src = std::fs::read_to_string(path).map_err(|source| AddressMapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let map = Self::from_toml(&src)?;
        tracing::info!(path = %path.display(), model = %map.device.name, "loaded address map");
        Ok(map)
    }

    /// Every name must map to a distinct address, bootstrap addresses must
    /// stay below the sensor base and sensor addresses at or above it.
    fn validate(&self) -> Result<(), AddressMapError> {
        if !(self.device.clock_mhz.is_finite() && self.device.clock_mhz > 0.0) {
            return Err(AddressMapError::Invalid(format!(
                "clock_mhz must be positive, got {}",
                self.device.clock_mhz
            )));
        }

        let base = self.sensor.base_address;
        let mut seen = HashSet::new();

        for (name, addr) in self.bootstrap.named() {
            if addr >= base {
                return Err(AddressMapError::Invalid(format!(
                    "bootstrap.{name} = {addr:#x} is inside the sensor range (base {base:#x})"
                )));
            }
            if !seen.insert(addr) {
                return Err(AddressMapError::Invalid(format!(
                    "bootstrap.{name} = {addr:#x} is already mapped"
                )));
            }
        }

        for (name, addr) in self.sensor.named() {
            if addr < base {
                return Err(AddressMapError::Invalid(format!(
                    "sensor.{name} = {addr:#x} is below the sensor base {base:#x}"
                )));
            }
            if !seen.insert(addr) {
                return Err(AddressMapError::Invalid(format!(
                    "sensor.{name} = {addr:#x} is already mapped"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_map_parses() {
        let map = AddressMap::embedded().unwrap();
        assert_eq!(map.bootstrap.device_model_name, 0x20);
        assert_eq!(map.bootstrap.pixel_format, 0x10014);
        assert_eq!(map.sensor.base_address, 0x30000);
        assert_eq!(map.sensor.exposure_time, 0x3000B);
        assert_eq!(map.sensor.chip_id, 0x3007F);
        assert_eq!(map.device.clock_mhz, 50.0);
    }

    #[test]
    fn test_sensor_offset_is_additive() {
        let map = AddressMap::embedded().unwrap();
        assert_eq!(map.sensor.absolute(0x7F), map.sensor.chip_id);
        assert_eq!(map.sensor.absolute(0x0B), map.sensor.exposure_time);
    }

    #[test]
    fn test_rejects_overlapping_namespaces() {
        let src = TOPAZ_MAP.replace("sensor_width = 0x1000C", "sensor_width = 0x3000C");
        let err = AddressMap::from_toml(&src).unwrap_err();
        assert!(matches!(err, AddressMapError::Invalid(_)), "{err}");
    }

    #[test]
    fn test_rejects_duplicate_address() {
        let src = TOPAZ_MAP.replace("analog_gain = 0x3000D", "analog_gain = 0x3000B");
        let err = AddressMap::from_toml(&src).unwrap_err();
        assert!(err.to_string().contains("already mapped"), "{err}");
    }

    #[test]
    fn test_rejects_missing_field() {
        let src = TOPAZ_MAP.replace("chip_id = 0x3007F\n", "");
        assert!(matches!(AddressMap::from_toml(&src), Err(AddressMapError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AddressMap::load(Path::new("/nonexistent/topaz.toml")).unwrap_err();
        assert!(matches!(err, AddressMapError::Io { .. }));
    }
}
