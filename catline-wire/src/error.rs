//! Encode/decode errors.

/// Wire encode/decode errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum WireError {
    /// The buffer being read from is too short to decode the item.
    ReadBufferTooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },
    /// The buffer being written into is too short to hold the packed item.
    WriteBufferTooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },
    /// A discriminant was read that maps to no enum variant.
    InvalidDiscriminant,
    /// A string field did not contain valid UTF-8.
    InvalidUtf8,
    /// A collection is too small to hold all decoded items.
    Capacity,
}

#[cfg(feature = "std")]
impl std::error::Error for WireError {}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WireError::ReadBufferTooShort { needed, got } => {
                write!(f, "read buffer too short: need {}, got {}", needed, got)
            }
            WireError::WriteBufferTooShort { needed, got } => {
                write!(f, "write buffer too short: need {}, got {}", needed, got)
            }
            WireError::InvalidDiscriminant => f.write_str("invalid enum discriminant"),
            WireError::InvalidUtf8 => f.write_str("invalid UTF-8"),
            WireError::Capacity => f.write_str("out of collection capacity"),
        }
    }
}
