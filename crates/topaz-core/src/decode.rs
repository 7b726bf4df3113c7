//! Decode a raw driver buffer into an owned, typed pixel array.
//!
//! The layout is derived from the buffer itself:
//! `bytes_per_pixel = raw_size / (width * height)`.
//! 3 bytes per pixel is interleaved RGB, 1 is 8-bit mono, anything else is
//! read as little-endian 16-bit mono. The driver buffer is only borrowed;
//! everything returned is a copy.

use crate::frame::PixelArray;
use crate::pixel::ImagePixelType;
use ndarray::{Array2, Array3, ArrayView2};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame: {width}x{height}")]
    EmptyFrame { width: usize, height: usize },
    #[error("raw size {raw_size} is smaller than the pixel count {pixels}")]
    TooSmall { raw_size: usize, pixels: usize },
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Decode a filled buffer into a process-owned pixel array.
///
/// `raw` is the driver memory (at least `raw_size` bytes are expected to be
/// readable through it). `pixel_type` is advisory; when it disagrees with the
/// derived layout the derived layout wins.
pub fn decode(
    raw: &[u8],
    width: usize,
    height: usize,
    raw_size: usize,
    pixel_type: ImagePixelType,
) -> Result<PixelArray, DecodeError> {
    let pixels = width
        .checked_mul(height)
        .filter(|&p| p > 0)
        .ok_or(DecodeError::EmptyFrame { width, height })?;

    let bytes_per_pixel = raw_size / pixels;
    if bytes_per_pixel == 0 {
        return Err(DecodeError::TooSmall { raw_size, pixels });
    }

    if raw_size != bytes_per_pixel * pixels {
        tracing::debug!(raw_size, pixels, bytes_per_pixel, "raw size is not a whole number of pixels");
    }
    if let Some(tagged) = pixel_type.bytes_per_pixel() {
        if tagged != bytes_per_pixel {
            tracing::debug!(
                ?pixel_type,
                tagged,
                derived = bytes_per_pixel,
                "pixel type disagrees with buffer layout; using buffer layout"
            );
        }
    }

    match bytes_per_pixel {
        3 => {
            let row_bytes = width * 3;
            let view = ArrayView2::from_shape((height, row_bytes), checked(raw, height * row_bytes)?)?;
            Ok(PixelArray::Rgb8(split_interleaved(view, 3)))
        }
        1 => {
            let data = checked(raw, pixels)?.to_vec();
            Ok(PixelArray::Mono8(Array2::from_shape_vec((height, width), data)?))
        }
        _ => {
            let data: Vec<u16> = checked(raw, pixels * 2)?
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            Ok(PixelArray::Mono16(Array2::from_shape_vec((height, width), data)?))
        }
    }
}

/// Split interleaved R-G-B rows into a `(height, pixels, 3)` array.
///
/// `stride` is the byte distance between consecutive output pixels in a
/// row: 3 at full resolution, 6 when every second pixel is kept (2x2
/// subsampled readout). Trailing bytes that do not form a whole pixel are
/// dropped.
pub fn split_interleaved(rows: ArrayView2<'_, u8>, stride: usize) -> Array3<u8> {
    let (height, row_bytes) = rows.dim();
    let stride = stride.max(3);
    let columns = if row_bytes >= 3 {
        (row_bytes - 3) / stride + 1
    } else {
        0
    };
    Array3::from_shape_fn((height, columns, 3), |(y, x, c)| rows[[y, x * stride + c]])
}

fn checked(raw: &[u8], expected: usize) -> Result<&[u8], DecodeError> {
    raw.get(..expected).ok_or(DecodeError::InvalidLength {
        expected,
        actual: raw.len(),
    })
}
