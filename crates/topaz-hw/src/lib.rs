//! topaz-hw — Camera access for the Topaz evaluation kit.
//!
//! Wraps the vendor `PiGentlSdk` acquisition library behind the [`Sdk`]
//! trait, drives it through an acquisition [`Session`], and exposes the
//! sensor controls on [`Topaz`]. [`MockSdk`] stands in for the library in
//! tests and on machines without the kit.

pub mod camera;
pub mod error;
pub mod ffi;
pub mod mock;
pub mod pigentl;
pub mod registers;
pub mod sdk;
pub mod session;

pub use camera::{DeviceSummary, Topaz};
pub use error::{CameraError, RegisterFault, SdkFailure};
pub use mock::{MockCall, MockSdk, PoolStats};
pub use pigentl::{PiGentlSdk, SdkPaths};
pub use registers::{RegisterValue, Registers};
pub use sdk::{BufferToken, CameraHandle, DeviceInfo, RawBuffer, Sdk, SdkResult, Status};
pub use session::{DeviceSelector, Session, SessionConfig, SessionState};
