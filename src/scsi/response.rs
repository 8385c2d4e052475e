//! Decoding of the temperature diagnostic page.
//!
//! The drive stores its maximum temperature as ASCII text inside the page. Bytes 22..30
//! hold four pairs of ASCII hex characters; each pair is one byte value. The byte values
//! are rendered as uppercase hex (without padding) and concatenated, giving the raw
//! temperature as a hex number in 1/256 °C units.
//!
//! For example, a field of `"00080401"` gives the bytes `00 08 04 01`, the digits
//! `"0841"`, a raw value of 2113 and a temperature of 8.25 °C.

use std::fmt;

use crate::error::Error;

/// Offset of the temperature field within the diagnostic page.
pub const TEMPERATURE_FIELD_OFFSET: usize = 22;
/// Length of the temperature field: four pairs of ASCII hex characters.
pub const TEMPERATURE_FIELD_LEN: usize = 8;
/// Shortest page the temperature field can be read from.
pub const MIN_PAGE_LEN: usize = TEMPERATURE_FIELD_OFFSET + TEMPERATURE_FIELD_LEN;

/// Raw units per degree Celsius.
const RAW_UNITS_PER_DEGREE: i64 = 256;

/// Hex digits reassembled from the temperature field, uppercase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexDigits(String);

impl HexDigits {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HexDigits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pulls the temperature field out of `page` and reassembles its hex digits.
///
/// Each pair becomes as many digits as `{:X}` renders for it: byte values below 0x10
/// give a single digit, larger values give two.
pub fn extract_temperature_field(page: &[u8]) -> Result<HexDigits, Error> {
    if page.len() < MIN_PAGE_LEN {
        return Err(Error::PageTooShort {
            len: page.len(),
            required: MIN_PAGE_LEN,
        });
    }

    let field = &page[TEMPERATURE_FIELD_OFFSET..MIN_PAGE_LEN];
    let mut digits = String::with_capacity(TEMPERATURE_FIELD_LEN / 2);
    for (i, pair) in field.chunks_exact(2).enumerate() {
        let mut value = [0_u8; 1];
        hex::decode_to_slice(pair, &mut value).map_err(|source| Error::InvalidHexPair {
            offset: TEMPERATURE_FIELD_OFFSET + i * 2,
            pair: String::from_utf8_lossy(pair).into_owned(),
            source,
        })?;
        digits.push_str(&format!("{:X}", value[0]));
    }
    Ok(HexDigits(digits))
}

/// Parses reassembled hex digits into the raw temperature value.
pub fn decode_temperature(digits: &str) -> Result<i64, Error> {
    let invalid = || Error::InvalidTemperatureDigits {
        digits: digits.to_owned(),
    };
    // `from_str_radix` tolerates a leading sign, the digits never legitimately have one
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    i64::from_str_radix(digits, 16).map_err(|_| invalid())
}

/// Converts a raw value into a temperature.
pub fn to_celsius(raw: i64) -> Temperature {
    Temperature { raw }
}

/// A temperature in 1/256 °C units.
///
/// Displays in °C with one decimal place, rounding half to even on the exact value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Temperature {
    raw: i64,
}

impl Temperature {
    pub fn raw(&self) -> i64 {
        self.raw
    }

    pub fn celsius(&self) -> f64 {
        self.raw as f64 / RAW_UNITS_PER_DEGREE as f64
    }

    /// The temperature in tenths of a degree, rounded half to even.
    fn tenths(&self) -> i128 {
        let scaled = i128::from(self.raw) * 10;
        let divisor = i128::from(RAW_UNITS_PER_DEGREE);
        let mut tenths = scaled.div_euclid(divisor);
        let remainder = scaled.rem_euclid(divisor);
        if remainder * 2 > divisor || (remainder * 2 == divisor && tenths % 2 != 0) {
            tenths += 1;
        }
        tenths
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tenths = self.tenths();
        let sign = if tenths < 0 { "-" } else { "" };
        let tenths = tenths.unsigned_abs();
        write!(f, "{sign}{}.{}", tenths / 10, tenths % 10)
    }
}
