//! Binary serialization helpers shared by record formats.
//!
//! Record values (ledger info, cursor snapshots) are stored as opaque
//! blobs, so the varint encodings here optimize for compactness rather
//! than lexicographic ordering of the encoded bytes.

pub mod varint;

/// Error raised when decoding a stored record fails.
///
/// Deserialization failures indicate either corruption or a record
/// written by an incompatible version; callers map this into their own
/// error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeserializeError {
    pub message: String,
}

impl DeserializeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deserialize error: {}", self.message)
    }
}

impl std::error::Error for DeserializeError {}
