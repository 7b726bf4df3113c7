//! Little-endian register reads and writes on the control plane.

use crate::error::CameraError;

/// A value to write, serialized little-endian at its natural width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    I32(i32),
    U32(u32),
    F32(f32),
    /// For addresses whose contract is a 2-byte transfer.
    U16(u16),
}

impl RegisterValue {
    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
            Self::F32(v) => v.to_le_bytes().to_vec(),
            Self::U16(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Serialized size in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::U16(_) => 2,
            _ => 4,
        }
    }
}

impl From<i32> for RegisterValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for RegisterValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<f32> for RegisterValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<u16> for RegisterValue {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

/// Raw control-plane access.
///
/// Implementors must fail a read that delivers fewer than `size` bytes and a
/// write the device accepted only partially, rather than padding or
/// truncating silently.
pub trait Registers {
    /// Read exactly `size` bytes starting at `address`.
    fn read_register(&mut self, address: u32, size: usize) -> Result<Vec<u8>, CameraError>;

    /// Write `value`; returns the number of bytes the device accepted.
    fn write_register(&mut self, address: u32, value: RegisterValue) -> Result<usize, CameraError>;

    fn read_u16(&mut self, address: u32) -> Result<u16, CameraError> {
        let bytes = self.read_register(address, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self, address: u32) -> Result<u32, CameraError> {
        let bytes = self.read_register(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a fixed-size, NUL-padded string register.
    fn read_string(&mut self, address: u32, size: usize) -> Result<String, CameraError> {
        let bytes = self.read_register(address, size)?;
        Ok(c_string_lossy(&bytes))
    }
}

/// Decode a NUL-terminated byte field; anything after the first NUL is ignored.
pub(crate) fn c_string_lossy(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Register file with one value per address.
    #[derive(Default)]
    struct Memory(HashMap<u32, Vec<u8>>);

    impl Registers for Memory {
        fn read_register(&mut self, address: u32, size: usize) -> Result<Vec<u8>, CameraError> {
            let mut out = vec![0u8; size];
            let stored = self.0.get(&address).cloned().unwrap_or_default();
            let n = stored.len().min(size);
            out[..n].copy_from_slice(&stored[..n]);
            Ok(out)
        }

        fn write_register(&mut self, address: u32, value: RegisterValue) -> Result<usize, CameraError> {
            let bytes = value.to_le_bytes();
            let n = bytes.len();
            self.0.insert(address, bytes);
            Ok(n)
        }
    }

    #[test]
    fn test_value_widths() {
        assert_eq!(RegisterValue::I32(-1).to_le_bytes(), vec![0xFF; 4]);
        assert_eq!(RegisterValue::U32(0x0102_0304).to_le_bytes(), vec![4, 3, 2, 1]);
        assert_eq!(RegisterValue::F32(1.0).to_le_bytes(), 1.0f32.to_le_bytes().to_vec());
        assert_eq!(RegisterValue::U16(0xBEEF).to_le_bytes(), vec![0xEF, 0xBE]);
        assert_eq!(RegisterValue::U16(1).width(), 2);
        assert_eq!(RegisterValue::F32(0.5).width(), 4);
    }

    #[test]
    fn test_typed_reads_are_little_endian() {
        let mut mem = Memory::default();
        mem.write_register(0x1000C, RegisterValue::U32(1920)).unwrap();
        mem.write_register(0x3000B, 500u16.into()).unwrap();
        assert_eq!(mem.read_u32(0x1000C).unwrap(), 1920);
        assert_eq!(mem.read_u16(0x3000B).unwrap(), 500);
    }

    #[test]
    fn test_read_string_stops_at_nul() {
        let mut mem = Memory::default();
        let mut field = b"Topaz".to_vec();
        field.resize(32, 0);
        field[20] = b'x';
        mem.0.insert(0x20, field);
        assert_eq!(mem.read_string(0x20, 32).unwrap(), "Topaz");
    }

    #[test]
    fn test_c_string_without_terminator() {
        assert_eq!(c_string_lossy(b"ABCD"), "ABCD");
        assert_eq!(c_string_lossy(b""), "");
    }
}
