//! Packed MS-DOS date and time fields.
//!
//! ```text
//! time: bits 15-11 hour | bits 10-5 minute | bits 4-0 second / 2
//! date: bits 15-9 year - 1980 | bits 8-5 month | bits 4-0 day
//! ```
//!
//! Seconds are stored in 2-second units, so encoding is lossy: an odd
//! second decodes as the even second below it. Every even second, and every
//! date from 1980-01-01 to 2107-12-31, survives an encode/decode round trip
//! unchanged.

use std::fmt;

/// Time of day from a packed 16-bit MS-DOS time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsDosTime {
    /// Hour, 0-23 in well-formed data
    pub hour: u8,
    /// Minute, 0-59 in well-formed data
    pub minute: u8,
    /// Second; always even after decoding
    pub second: u8,
}

impl MsDosTime {
    /// Creates a time, returning `None` for out-of-range components
    pub fn new(hour: u8, minute: u8, second: u8) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        Some(Self {
            hour,
            minute,
            second,
        })
    }

    /// Unpacks a raw field
    pub fn from_bits(bits: u16) -> Self {
        Self {
            hour: (bits >> 11) as u8,
            minute: ((bits >> 5) & 0x3F) as u8,
            second: ((bits & 0x1F) * 2) as u8,
        }
    }

    /// Packs into a raw field, truncating odd seconds
    pub fn to_bits(self) -> u16 {
        (self.hour as u16) << 11 | ((self.minute as u16) & 0x3F) << 5 | (self.second as u16 / 2) & 0x1F
    }

    /// True if every component is in its calendar range
    pub fn is_valid(&self) -> bool {
        self.hour <= 23 && self.minute <= 59 && self.second <= 59
    }
}

impl fmt::Display for MsDosTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Calendar date from a packed 16-bit MS-DOS date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsDosDate {
    /// Full year, 1980-2107
    pub year: u16,
    /// Month, 1-12 in well-formed data
    pub month: u8,
    /// Day of month, 1-31 in well-formed data
    pub day: u8,
}

impl MsDosDate {
    /// Creates a date, returning `None` for out-of-range components
    pub fn new(year: u16, month: u8, day: u8) -> Option<Self> {
        if !(1980..=2107).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day)
        {
            return None;
        }
        Some(Self { year, month, day })
    }

    /// Unpacks a raw field
    pub fn from_bits(bits: u16) -> Self {
        Self {
            year: 1980 + (bits >> 9),
            month: ((bits >> 5) & 0x0F) as u8,
            day: (bits & 0x1F) as u8,
        }
    }

    /// Packs into a raw field
    pub fn to_bits(self) -> u16 {
        (self.year.saturating_sub(1980) & 0x7F) << 9 | ((self.month as u16) & 0x0F) << 5 | (self.day as u16) & 0x1F
    }

    /// True if month and day are in their calendar ranges
    pub fn is_valid(&self) -> bool {
        (1..=12).contains(&self.month) && (1..=31).contains(&self.day)
    }
}

impl fmt::Display for MsDosDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}
