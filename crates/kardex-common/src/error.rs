//! Error types for Kardex.

use thiserror::Error;

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in Kardex store operations.
///
/// The set is closed: every failure an operation can report is one of these
/// variants, grouped below by the contract they belong to.
#[derive(Debug, Error)]
pub enum StoreError {
    // Caller contract errors
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid search key")]
    InvalidKey,

    #[error("Invalid key descriptor: {0}")]
    InvalidKeyDescriptor(String),

    #[error("Record too small: key segment {offset}..{end} outside record data")]
    RecordTooSmall { offset: u32, end: u32 },

    #[error("Record too large: {size} bytes, {available} available")]
    RecordTooLarge { size: u32, available: u32 },

    // Lookup errors
    #[error("Entry not found")]
    EntryNotFound,

    #[error("No record selection active for key {key_id}")]
    NoRecord { key_id: u16 },

    #[error("No database: {0}")]
    NoDatabase(String),

    #[error("Database already exists: {0}")]
    DatabaseAlreadyExist(String),

    #[error("Database already opened: {0}")]
    DatabaseAlreadyOpened(String),

    // Integrity errors
    #[error("Index corrupt at slot {slot}: {reason}")]
    IndexCorrupt { slot: u32, reason: String },

    #[error("Invalid database: {0}")]
    InvalidDatabase(String),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    // Resource errors
    #[error("Memory allocation over limit: {requested} bytes (max {max})")]
    MemoryAllocation { requested: u64, max: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Too many records: {0} index slots")]
    TooManyRecords(u64),

    // State errors
    #[error("Empty database")]
    EmptyDatabase,
}
