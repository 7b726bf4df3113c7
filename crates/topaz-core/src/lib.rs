//! topaz-core — Pixel formats, frame decoding and register tables.
//!
//! Pure data handling for the Topaz evaluation kit: nothing in this crate
//! touches the vendor acquisition library.

pub mod address_map;
pub mod decode;
pub mod frame;
pub mod pixel;
pub mod timing;

pub use address_map::{AddressMap, AddressMapError};
pub use decode::{decode, DecodeError};
pub use frame::{Frame, FrameDescriptor, FrameStats, PixelArray};
pub use pixel::{ImagePixelType, PixelFormat, PixelFormatDescriptor, SampleType};
pub use timing::{TimingError, TOPAZ_CLOCK_MHZ};
