//! Error types for ledger and cursor operations.
//!
//! This module defines [`Error`], the primary error type for all ledger
//! operations, along with a convenient [`Result`] type alias.

use common::serde::DeserializeError;
use common::store::MetaStoreError;

/// Error type for ledger and cursor operations.
///
/// # Error Categories
///
/// - Caller mistakes: [`InvalidArgument`](Error::InvalidArgument),
///   [`InvalidMarkDelete`](Error::InvalidMarkDelete) (non-monotonic ack).
/// - Lifecycle: [`CursorAlreadyClosed`](Error::CursorAlreadyClosed),
///   [`LedgerClosed`](Error::LedgerClosed).
/// - Recovery: [`BrokenCursor`](Error::BrokenCursor) when no usable
///   snapshot can be reconstructed, [`LedgerNotExist`](Error::LedgerNotExist)
///   when a referenced cursor ledger is gone (triggers the recovery
///   fallback internally).
/// - Collaborators: [`MetaStore`](Error::MetaStore),
///   [`MetaStoreBadVersion`](Error::MetaStoreBadVersion),
///   [`LogRead`](Error::LogRead), [`LogWrite`](Error::LogWrite),
///   [`Encoding`](Error::Encoding).
/// - Pending reads: [`PendingReadExists`](Error::PendingReadExists),
///   [`ReadCanceled`](Error::ReadCanceled) (the completion an in-flight
///   wait observes when it is canceled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid parameter, such as `read_entries(0)`.
    InvalidArgument(String),

    /// Mark-delete position lower than the current one. Acks are
    /// monotonic; the state is left unchanged.
    InvalidMarkDelete(String),

    /// Operation on a closed (or deleted) cursor.
    CursorAlreadyClosed(String),

    /// Operation on a closed ledger.
    LedgerClosed(String),

    /// Cursor recovery could not reconstruct any usable state.
    BrokenCursor(String),

    /// A dedicated cursor ledger referenced by metadata no longer exists.
    LedgerNotExist(String),

    /// Metadata store failure.
    MetaStore(String),

    /// A metadata compare-and-swap lost against a concurrent writer.
    MetaStoreBadVersion,

    /// Read failure from the segment store.
    LogRead(String),

    /// Write failure against the segment store.
    LogWrite(String),

    /// A stored record could not be decoded.
    Encoding(String),

    /// A pending read is already registered on this cursor.
    PendingReadExists,

    /// The pending read this caller was waiting on was canceled.
    ReadCanceled,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::InvalidMarkDelete(msg) => write!(f, "invalid mark-delete: {}", msg),
            Error::CursorAlreadyClosed(msg) => write!(f, "cursor already closed: {}", msg),
            Error::LedgerClosed(msg) => write!(f, "ledger closed: {}", msg),
            Error::BrokenCursor(msg) => write!(f, "broken cursor: {}", msg),
            Error::LedgerNotExist(msg) => write!(f, "cursor ledger does not exist: {}", msg),
            Error::MetaStore(msg) => write!(f, "metadata store error: {}", msg),
            Error::MetaStoreBadVersion => write!(f, "metadata store version mismatch"),
            Error::LogRead(msg) => write!(f, "log read error: {}", msg),
            Error::LogWrite(msg) => write!(f, "log write error: {}", msg),
            Error::Encoding(msg) => write!(f, "encoding error: {}", msg),
            Error::PendingReadExists => write!(f, "a pending read already exists"),
            Error::ReadCanceled => write!(f, "pending read canceled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<MetaStoreError> for Error {
    fn from(err: MetaStoreError) -> Self {
        match err {
            MetaStoreError::BadVersion => Error::MetaStoreBadVersion,
            other => Error::MetaStore(other.to_string()),
        }
    }
}

impl From<DeserializeError> for Error {
    fn from(err: DeserializeError) -> Self {
        Error::Encoding(err.message)
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;
