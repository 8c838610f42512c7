/// Coordinate format from the %FS (Format Specification) command.
///
/// Example: `%FSLAX24Y24*%` means leading-zero omission, absolute mode,
/// 2 integer digits + 4 decimal digits for both X and Y.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateFormat {
    pub x_integer: u8,
    pub x_decimal: u8,
    pub y_integer: u8,
    pub y_decimal: u8,
}

impl Default for CoordinateFormat {
    fn default() -> Self {
        // Common default: 2.4 format (FSLAX24Y24)
        Self {
            x_integer: 2,
            x_decimal: 4,
            y_integer: 2,
            y_decimal: 4,
        }
    }
}

/// Unit system from the %MO command (or the legacy G70/G71 codes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Units {
    #[default]
    Millimeters,
    Inches,
}

/// Which axis a raw coordinate belongs to. I shares X's format, J shares Y's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Converts raw Gerber integer coordinates to millimetres.
#[derive(Debug, Clone, Default)]
pub struct CoordinateConverter {
    pub format: CoordinateFormat,
}

impl CoordinateConverter {
    /// Convert a raw Gerber coordinate integer to mm.
    ///
    /// The raw value is an integer where the last N digits are the decimal part,
    /// as specified by the format. For example, with X24 format, the value 1234567
    /// means 123.4567 mm.
    pub fn to_mm(&self, raw: i64, axis: Axis) -> f64 {
        let decimal_digits = match axis {
            Axis::X => self.format.x_decimal,
            Axis::Y => self.format.y_decimal,
        };
        raw as f64 / 10f64.powi(decimal_digits as i32)
    }
}
