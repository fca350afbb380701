//! Error types for the razbor-core library.
//!
//! Fatal failures are reported through [`Error`]. Findings that do not stop a
//! decode (a declared length that disagrees with the bytes, an unrecognized
//! sub-structure that was kept as raw data) are recorded as [`Anomaly`] values
//! attached to the component where they were found.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for razbor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all razbor operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A read requested more bytes than remain in the buffer
    #[error("unexpected end of data at offset {offset}: needed {needed} bytes, {available} available")]
    UnexpectedEndOfData {
        /// Absolute offset of the failed read
        offset: u64,
        /// Number of bytes the read required
        needed: u64,
        /// Number of bytes that were left
        available: u64,
    },

    /// A fixed magic or signature field did not match
    #[error("signature mismatch at offset {offset}: expected {expected}, found {found}")]
    SignatureMismatch {
        /// Absolute offset of the signature field
        offset: u64,
        /// Expected bytes, rendered for display
        expected: String,
        /// Bytes actually present, rendered for display
        found: String,
    },

    /// A declared length or count disagrees with the data
    #[error("structural inconsistency at offset {offset}: {details}")]
    StructuralInconsistency {
        /// Absolute offset of the offending structure
        offset: u64,
        /// Detailed description of the issue
        details: String,
    },

    /// A scan for a required terminator reached the end of input
    #[error("missing terminator '{terminator}' for structure starting at offset {offset}")]
    MissingTerminator {
        /// Absolute offset where the scan started
        offset: u64,
        /// The terminator that was never found
        terminator: &'static str,
    },

    /// Bytes that violate the lexical or structural rules of the format
    #[error("malformed data at offset {offset}: {details}")]
    Malformed {
        /// Absolute offset where the error occurred
        offset: u64,
        /// Detailed description of the issue
        details: String,
    },

    /// Failed to decode a LEB128 variable-length integer
    #[error("failed to decode LEB128 value at offset {offset}: buffer too small or invalid encoding")]
    Leb128Decode {
        /// Absolute offset where the value starts
        offset: u64,
    },

    /// Attempted to move a cursor outside the bytes it has already read
    #[error("invalid seek from offset {from} to {to}")]
    InvalidSeek {
        /// Position before the seek
        from: u64,
        /// Requested position
        to: u64,
    },

    /// A component overlaps a sibling or escapes its parent
    #[error("component tree violation: {details}")]
    ComponentTree {
        /// Description of the violated invariant
        details: String,
    },

    /// Nested structure deeper than the configured limit
    #[error("nesting deeper than {limit} levels at offset {offset}")]
    NestingTooDeep {
        /// Absolute offset of the structure that exceeded the limit
        offset: u64,
        /// Configured maximum depth
        limit: usize,
    },

    /// Input larger than the configured limit
    #[error("input of {size} bytes exceeds the limit of {limit} bytes")]
    FileTooLarge {
        /// Input size
        size: u64,
        /// Configured maximum size
        limit: u64,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new end-of-data error
    pub fn unexpected_end(offset: u64, needed: u64, available: u64) -> Self {
        Self::UnexpectedEndOfData {
            offset,
            needed,
            available,
        }
    }

    /// Creates a new signature mismatch error, rendering both byte strings as hex
    pub fn signature_mismatch(offset: u64, expected: &[u8], found: &[u8]) -> Self {
        Self::SignatureMismatch {
            offset,
            expected: hex_bytes(expected),
            found: hex_bytes(found),
        }
    }

    /// Creates a new structural inconsistency error
    pub fn inconsistent(offset: u64, details: impl Into<String>) -> Self {
        Self::StructuralInconsistency {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new missing terminator error
    pub fn missing_terminator(offset: u64, terminator: &'static str) -> Self {
        Self::MissingTerminator { offset, terminator }
    }

    /// Creates a new malformed data error
    pub fn malformed(offset: u64, details: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new LEB128 decode error
    pub fn leb128_decode(offset: u64) -> Self {
        Self::Leb128Decode { offset }
    }

    /// Creates a new component tree error
    pub fn component_tree(details: impl Into<String>) -> Self {
        Self::ComponentTree {
            details: details.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the absolute offset the error refers to, if it has one
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::UnexpectedEndOfData { offset, .. }
            | Self::SignatureMismatch { offset, .. }
            | Self::StructuralInconsistency { offset, .. }
            | Self::MissingTerminator { offset, .. }
            | Self::Malformed { offset, .. }
            | Self::Leb128Decode { offset }
            | Self::NestingTooDeep { offset, .. } => Some(*offset),
            Self::InvalidSeek { from, .. } => Some(*from),
            _ => None,
        }
    }

    /// Returns true if the failure can be contained to the enclosing record
    ///
    /// Running out of input, tree violations and I/O failures always abort
    /// the whole decode.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SignatureMismatch { .. }
                | Self::StructuralInconsistency { .. }
                | Self::MissingTerminator { .. }
                | Self::Malformed { .. }
                | Self::Leb128Decode { .. }
                | Self::NestingTooDeep { .. }
        )
    }
}

/// Classification of a non-fatal finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    /// A sub-structure signature was not recognized
    SignatureMismatch,
    /// A declared length or count disagrees with the data
    StructuralInconsistency,
    /// A terminator was synthesized because it was absent
    MissingTerminator,
    /// A record could not be decoded and was kept as raw bytes
    Unparsed,
}

impl AnomalyKind {
    /// Short name used in listings
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::SignatureMismatch => "signature-mismatch",
            AnomalyKind::StructuralInconsistency => "structural-inconsistency",
            AnomalyKind::MissingTerminator => "missing-terminator",
            AnomalyKind::Unparsed => "unparsed",
        }
    }
}

/// A recoverable problem found while decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    /// Absolute offset the finding refers to
    pub offset: u64,
    /// What kind of problem this is
    pub kind: AnomalyKind,
    /// Human readable description
    pub message: String,
}

impl Anomaly {
    /// Creates a new anomaly
    pub fn new(offset: u64, kind: AnomalyKind, message: impl Into<String>) -> Self {
        Self {
            offset,
            kind,
            message: message.into(),
        }
    }

    /// Creates a structural inconsistency anomaly
    pub fn inconsistent(offset: u64, message: impl Into<String>) -> Self {
        Self::new(offset, AnomalyKind::StructuralInconsistency, message)
    }

    /// Records a contained error as an anomaly
    ///
    /// The anomaly is placed at `fallback_offset` when the error has no
    /// offset of its own.
    pub fn from_error(err: &Error, fallback_offset: u64) -> Self {
        let kind = match err {
            Error::SignatureMismatch { .. } => AnomalyKind::SignatureMismatch,
            Error::StructuralInconsistency { .. } => AnomalyKind::StructuralInconsistency,
            Error::MissingTerminator { .. } => AnomalyKind::MissingTerminator,
            _ => AnomalyKind::Unparsed,
        };
        Self::new(err.offset().unwrap_or(fallback_offset), kind, err.to_string())
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}: {}", self.offset, self.kind.as_str(), self.message)
    }
}

/// Renders bytes as space separated upper-case hex pairs
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::signature_mismatch(0, b"PK\x03\x04", b"PK\x03\x05");
        assert_eq!(
            err.to_string(),
            "signature mismatch at offset 0: expected 50 4B 03 04, found 50 4B 03 05"
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::malformed(3, "bad token").is_recoverable());
        assert!(Error::inconsistent(3, "length").is_recoverable());
        assert!(!Error::unexpected_end(10, 4, 2).is_recoverable());
        assert!(!Error::component_tree("overlap").is_recoverable());
    }

    #[test]
    fn test_offset() {
        assert_eq!(Error::unexpected_end(10, 4, 2).offset(), Some(10));
        assert_eq!(Error::internal("x").offset(), None);
    }

    #[test]
    fn test_anomaly_from_error() {
        let err = Error::missing_terminator(42, "endstream");
        let anomaly = Anomaly::from_error(&err, 0);
        assert_eq!(anomaly.offset, 42);
        assert_eq!(anomaly.kind, AnomalyKind::MissingTerminator);
        assert!(anomaly.to_string().starts_with("0x2a: missing-terminator"));
    }
}
