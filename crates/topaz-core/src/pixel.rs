//! Pixel-format tables for the Topaz evaluation kit.
//!
//! The device XML exposes three `PixelFormat` values. Each lookup here goes
//! one way only (code to format, format to code, name to format, ...) so a
//! numeric code can never be confused with a bit-depth selector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MONO8_CODE: u32 = 0x0108_0001;
const MONO10P_CODE: u32 = 0x010A_0046;
const RGB24_CODE: u32 = 0x0218_0014;

/// Camera-side pixel format, as written to the `PixelFormat` bootstrap register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,
    /// 10-bit monochrome, delivered in 16-bit containers.
    Mono10p,
    /// Interleaved R-G-B, one byte per channel.
    #[serde(rename = "RGB24")]
    Rgb24,
}

/// Element type of a decoded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleType {
    U8,
    U16,
}

/// Decoding layout for one pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatDescriptor {
    pub bytes_per_pixel: usize,
    pub sample: SampleType,
    pub channels: usize,
}

impl PixelFormatDescriptor {
    /// Raw byte size of a valid `width` x `height` frame in this layout.
    pub fn frame_size(&self, width: usize, height: usize) -> usize {
        self.bytes_per_pixel * width * height
    }
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 3] = [PixelFormat::Mono8, PixelFormat::Mono10p, PixelFormat::Rgb24];

    /// Look up a format by its 32-bit register code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            MONO8_CODE => Some(Self::Mono8),
            MONO10P_CODE => Some(Self::Mono10p),
            RGB24_CODE => Some(Self::Rgb24),
            _ => None,
        }
    }

    /// 32-bit register code for this format.
    pub fn code(self) -> u32 {
        match self {
            Self::Mono8 => MONO8_CODE,
            Self::Mono10p => MONO10P_CODE,
            Self::Rgb24 => RGB24_CODE,
        }
    }

    /// Look up a format by the bit-depth selector used by the kit's
    /// `set_camera_format` (8, 10 or 32).
    pub fn from_bit_depth(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Mono8),
            10 => Some(Self::Mono10p),
            32 => Some(Self::Rgb24),
            _ => None,
        }
    }

    /// Bit-depth selector for this format. RGB24 reports 32, as the device XML does.
    pub fn bit_depth(self) -> u32 {
        match self {
            Self::Mono8 => 8,
            Self::Mono10p => 10,
            Self::Rgb24 => 32,
        }
    }

    /// Symbolic GenICam name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mono8 => "Mono8",
            Self::Mono10p => "Mono10p",
            Self::Rgb24 => "RGB24",
        }
    }

    pub fn descriptor(self) -> PixelFormatDescriptor {
        match self {
            Self::Mono8 => PixelFormatDescriptor {
                bytes_per_pixel: 1,
                sample: SampleType::U8,
                channels: 1,
            },
            Self::Mono10p => PixelFormatDescriptor {
                bytes_per_pixel: 2,
                sample: SampleType::U16,
                channels: 1,
            },
            Self::Rgb24 => PixelFormatDescriptor {
                bytes_per_pixel: 3,
                sample: SampleType::U8,
                channels: 3,
            },
        }
    }

    /// Colormap hint for display ("gray" for mono, "hsv" for colour).
    pub fn colormap(self) -> &'static str {
        match self {
            Self::Mono8 | Self::Mono10p => "gray",
            Self::Rgb24 => "hsv",
        }
    }

    pub fn is_color(self) -> bool {
        self.descriptor().channels > 1
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown pixel format: {0} (expected Mono8, Mono10p or RGB24)")]
pub struct UnknownPixelFormat(pub String);

impl FromStr for PixelFormat {
    type Err = UnknownPixelFormat;

    /// Case-insensitive name lookup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownPixelFormat(s.to_string()))
    }
}

/// Per-buffer pixel type reported by the acquisition library (`eImagePixelType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImagePixelType {
    Unknown,
    Mono8,
    Mono10,
    Mono12,
    Mono14,
    Mono16,
    Rgb8,
    Yuv422,
    Mono10p,
}

impl ImagePixelType {
    /// Map the raw enum value; anything out of range is `Unknown`.
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => Self::Mono8,
            2 => Self::Mono10,
            3 => Self::Mono12,
            4 => Self::Mono14,
            5 => Self::Mono16,
            6 => Self::Rgb8,
            7 => Self::Yuv422,
            8 => Self::Mono10p,
            _ => Self::Unknown,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Mono8 => 1,
            Self::Mono10 => 2,
            Self::Mono12 => 3,
            Self::Mono14 => 4,
            Self::Mono16 => 5,
            Self::Rgb8 => 6,
            Self::Yuv422 => 7,
            Self::Mono10p => 8,
        }
    }

    /// Bytes per pixel this tag implies, if it has a fixed layout.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Mono8 => Some(1),
            Self::Mono10 | Self::Mono12 | Self::Mono14 | Self::Mono16 | Self::Mono10p => Some(2),
            Self::Rgb8 => Some(3),
            Self::Yuv422 => Some(2),
            Self::Unknown => None,
        }
    }
}

impl From<PixelFormat> for ImagePixelType {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Mono8 => Self::Mono8,
            PixelFormat::Mono10p => Self::Mono10p,
            PixelFormat::Rgb24 => Self::Rgb8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_lookup_both_directions() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_code(format.code()), Some(format));
        }
        assert_eq!(PixelFormat::from_code(0x0218_0014), Some(PixelFormat::Rgb24));
        assert_eq!(PixelFormat::from_code(0x0108_0001), Some(PixelFormat::Mono8));
        assert_eq!(PixelFormat::from_code(0xDEAD_BEEF), None);
    }

    #[test]
    fn test_bit_depth_selector_is_not_a_code() {
        // 8 is a selector, never a register code
        assert_eq!(PixelFormat::from_code(8), None);
        assert_eq!(PixelFormat::from_bit_depth(8), Some(PixelFormat::Mono8));
        assert_eq!(PixelFormat::from_bit_depth(32), Some(PixelFormat::Rgb24));
        assert_eq!(PixelFormat::from_bit_depth(12), None);
    }

    #[test]
    fn test_name_parse_case_insensitive() {
        assert_eq!("rgb24".parse::<PixelFormat>().unwrap(), PixelFormat::Rgb24);
        assert_eq!("Mono10p".parse::<PixelFormat>().unwrap(), PixelFormat::Mono10p);
        assert!("Mono12".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_descriptor_frame_size() {
        let rgb = PixelFormat::Rgb24.descriptor();
        assert_eq!(rgb.frame_size(1920, 1080), 1920 * 1080 * 3);
        assert_eq!(rgb.channels, 3);
        let mono = PixelFormat::Mono10p.descriptor();
        assert_eq!(mono.sample, SampleType::U16);
        assert_eq!(mono.frame_size(4, 2), 16);
    }

    #[test]
    fn test_image_pixel_type_out_of_range() {
        assert_eq!(ImagePixelType::from_raw(8), ImagePixelType::Mono10p);
        assert_eq!(ImagePixelType::from_raw(42), ImagePixelType::Unknown);
        assert_eq!(ImagePixelType::from_raw(-1), ImagePixelType::Unknown);
        assert_eq!(ImagePixelType::Rgb8.to_raw(), 6);
    }

    #[test]
    fn test_colormap_hints() {
        assert_eq!(PixelFormat::Mono8.colormap(), "gray");
        assert_eq!(PixelFormat::Rgb24.colormap(), "hsv");
        assert!(PixelFormat::Rgb24.is_color());
    }
}
