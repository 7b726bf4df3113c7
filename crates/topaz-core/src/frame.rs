//! Frame metadata, decoded pixel arrays and per-frame statistics.

use crate::decode::split_interleaved;
use crate::pixel::ImagePixelType;
use ndarray::{s, Array2, Array3};
use serde::Serialize;

/// Metadata of one filled acquisition buffer.
///
/// Copied out of the driver's image info before the buffer is requeued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameDescriptor {
    pub width: usize,
    pub height: usize,
    pub pixel_type: ImagePixelType,
    /// Size of the filled region in bytes.
    pub raw_size: usize,
    /// Monotonically increasing acquisition sequence number.
    pub block_id: u64,
    /// Device timestamp, in device ticks.
    pub timestamp: u64,
    /// The driver flagged the buffer as only partially filled.
    pub incomplete: bool,
    pub buffer_type: i32,
}

/// Decoded, process-owned pixel data.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray {
    /// `(height, width)` 8-bit samples.
    Mono8(Array2<u8>),
    /// `(height, width)` 16-bit samples.
    Mono16(Array2<u16>),
    /// `(height, width, 3)` interleaved R, G, B.
    Rgb8(Array3<u8>),
}

impl PixelArray {
    /// Array shape: `[height, width]` or `[height, width, channels]`.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Mono8(a) => a.shape(),
            Self::Mono16(a) => a.shape(),
            Self::Rgb8(a) => a.shape(),
        }
    }

    pub fn height(&self) -> usize {
        self.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.shape()[1]
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Rgb8(_) => 3,
            _ => 1,
        }
    }

    /// Keep every second column (every second pixel for RGB).
    ///
    /// Used when the sensor runs in 2x2 subsampled mode and the buffer still
    /// carries full-width rows. RGB goes back through the interleaved byte
    /// layout and is split with a 6-byte stride.
    pub fn subsample_columns(&self) -> PixelArray {
        match self {
            Self::Mono8(a) => Self::Mono8(a.slice(s![.., ..;2]).to_owned()),
            Self::Mono16(a) => Self::Mono16(a.slice(s![.., ..;2]).to_owned()),
            Self::Rgb8(a) => {
                let (height, width, _) = a.dim();
                let rows = Array2::from_shape_fn((height, width * 3), |(y, i)| a[[y, i / 3, i % 3]]);
                Self::Rgb8(split_interleaved(rows.view(), 6))
            }
        }
    }

    /// Min, max, mean and standard deviation over every sample.
    pub fn stats(&self) -> FrameStats {
        match self {
            Self::Mono8(a) => FrameStats::from_samples(a.iter().map(|&v| v as f64)),
            Self::Mono16(a) => FrameStats::from_samples(a.iter().map(|&v| v as f64)),
            Self::Rgb8(a) => FrameStats::from_samples(a.iter().map(|&v| v as f64)),
        }
    }
}

/// A retrieved frame: metadata plus an owned copy of its pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub descriptor: FrameDescriptor,
    pub pixels: PixelArray,
}

impl Frame {
    pub fn block_id(&self) -> u64 {
        self.descriptor.block_id
    }

    pub fn stats(&self) -> FrameStats {
        self.pixels.stats()
    }
}

/// Summary statistics of a frame's samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

impl FrameStats {
    /// Single pass (Welford). An empty input yields all zeros.
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0u64;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for v in samples {
            count += 1;
            let delta = v - mean;
            mean += delta / count as f64;
            m2 += delta * (v - mean);
            min = min.min(v);
            max = max.max(v);
        }

        if count == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std_dev: 0.0,
            };
        }

        Self {
            min,
            max,
            mean,
            std_dev: (m2 / count as f64).sqrt(),
        }
    }
}
