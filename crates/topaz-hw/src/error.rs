use crate::sdk::Status;
use crate::session::SessionState;
use std::fmt;
use thiserror::Error;
use topaz_core::{AddressMapError, DecodeError, TimingError};

/// A failed library call: which function, what it returned, and the
/// library's own description when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkFailure {
    pub op: &'static str,
    pub status: Status,
    pub text: Option<String>,
}

impl fmt::Display for SdkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned {}", self.op, self.status)?;
        if let Some(text) = &self.text {
            write!(f, " ({text})")?;
        }
        Ok(())
    }
}

/// Why a register access failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterFault {
    /// The library or device rejected the access.
    Device(SdkFailure),
    ShortRead { requested: usize, delivered: usize },
    ShortWrite { requested: usize, accepted: usize },
}

impl fmt::Display for RegisterFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(failure) => write!(f, "{failure}"),
            Self::ShortRead { requested, delivered } => {
                write!(f, "short read: requested {requested} bytes, got {delivered}")
            }
            Self::ShortWrite { requested, accepted } => {
                write!(f, "short write: sent {requested} bytes, device accepted {accepted}")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("failed to load acquisition library {path}: {reason}")]
    LibraryLoad { path: String, reason: String },
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("open failed: {0}")]
    OpenFailed(SdkFailure),
    #[error("{op} not allowed while {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    #[error("no frame within {timeout_us} us")]
    Timeout { timeout_us: u64 },
    #[error("acquisition error: {0}")]
    AcquisitionError(SdkFailure),
    #[error("register {address:#07x}: {fault}")]
    RegisterIo { address: u32, fault: RegisterFault },
    #[error("{op}: camera is not connected")]
    NotConnected { op: &'static str },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("camera reports unsupported pixel format code {0:#010x}")]
    UnsupportedPixelFormat(u32),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    AddressMap(#[from] AddressMapError),
}

impl CameraError {
    /// A `getFrame` timeout; the caller may simply retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<TimingError> for CameraError {
    fn from(e: TimingError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}
