//! Line-time conversion for the sensor timing registers.
//!
//! Exposure and wait time are stored on the sensor as a count of line
//! periods. One line lasts `line_length / clock_mhz` microseconds, so:
//!
//! ```text
//! ms    = lines * (line_length / clock_mhz) * 1e-3
//! lines = u16((ms * clock_mhz / line_length) * 1e3)
//! ```
//!
//! The write direction truncates to the 16-bit register width.

/// Reference clock of the Topaz sensor.
pub const TOPAZ_CLOCK_MHZ: f64 = 50.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimingError {
    #[error("line length is zero")]
    ZeroLineLength,
    #[error("{ms} ms is {lines} lines, outside the 16-bit register range")]
    OutOfRange { ms: f64, lines: f64 },
}

/// Duration of one line period in microseconds.
pub fn line_period_us(line_length: u16, clock_mhz: f64) -> f64 {
    line_length as f64 / clock_mhz
}

/// Convert a register value in line periods to milliseconds.
pub fn lines_to_ms(lines: u16, line_length: u16, clock_mhz: f64) -> f64 {
    lines as f64 * (line_length as f64 / clock_mhz) * 1e-3
}

/// Convert milliseconds to a register value in line periods.
pub fn ms_to_lines(ms: f64, line_length: u16, clock_mhz: f64) -> Result<u16, TimingError> {
    if line_length == 0 {
        return Err(TimingError::ZeroLineLength);
    }
    let lines = (ms * clock_mhz / line_length as f64) * 1e3;
    if !lines.is_finite() || lines < 0.0 || lines >= u16::MAX as f64 + 1.0 {
        return Err(TimingError::OutOfRange { ms, lines });
    }
    Ok(lines.trunc() as u16)
}
