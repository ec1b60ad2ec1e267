//! Configuration and layout limits for Kardex stores.

use serde::{Deserialize, Serialize};

/// Minimum index slots reserved per block.
pub const MIN_RESERVED_INDEX_RECORDS: u16 = 10;

/// Default index slots reserved per block. The optimum depends on the
/// application's create rate.
pub const DEFAULT_RESERVED_INDEX_RECORDS: u16 = 100;

/// Maximum index slots reserved per block.
pub const MAX_RESERVED_INDEX_RECORDS: u16 = 10_000;

/// Default number of index slots preallocated in memory on open.
pub const DEFAULT_PREALLOCATED_SLOTS: u32 = 50_000;

/// Maximum size of a single in-memory allocation (2^30 bytes).
pub const MAX_ALLOCATION: u64 = 1 << 30;

/// Default transfer-buffer size for rebuild.
pub const DEFAULT_REBUILD_DATA_SIZE: u32 = 1_000;

/// On-disk format version: major.minor.patch, major and minor 8 bits each.
pub const FORMAT_VERSION: u32 = 0x0100_0000;

/// Options for opening an existing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Open the store read-only. Read-only opens size the in-memory index
    /// exactly to the slots on disk.
    pub read_only: bool,
    /// Index slots to preallocate in memory beyond those on disk, so that
    /// creates do not reallocate the index image.
    pub preallocated_slots: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            preallocated_slots: DEFAULT_PREALLOCATED_SLOTS,
        }
    }
}

impl StoreOptions {
    /// Options for a read-only open.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Sets the number of preallocated index slots.
    pub fn with_preallocated_slots(mut self, slots: u32) -> Self {
        self.preallocated_slots = slots;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        assert!(MIN_RESERVED_INDEX_RECORDS <= DEFAULT_RESERVED_INDEX_RECORDS);
        assert!(DEFAULT_RESERVED_INDEX_RECORDS <= MAX_RESERVED_INDEX_RECORDS);
        assert_eq!(MAX_ALLOCATION, 1_073_741_824);
    }

    #[test]
    fn test_format_version_fields() {
        // major 1, minor 0, patch 0
        assert_eq!(FORMAT_VERSION >> 24, 1);
        assert_eq!((FORMAT_VERSION >> 16) & 0xFF, 0);
    }

    #[test]
    fn test_options_defaults() {
        let options = StoreOptions::default();
        assert!(!options.read_only);
        assert_eq!(options.preallocated_slots, DEFAULT_PREALLOCATED_SLOTS);
    }

    #[test]
    fn test_options_read_only() {
        let options = StoreOptions::read_only();
        assert!(options.read_only);
    }

    #[test]
    fn test_options_builder() {
        let options = StoreOptions::default().with_preallocated_slots(1_000);
        assert_eq!(options.preallocated_slots, 1_000);
    }

    #[test]
    fn test_options_serde_roundtrip() {
        let original = StoreOptions::default().with_preallocated_slots(123);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StoreOptions = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original.read_only, deserialized.read_only);
        assert_eq!(original.preallocated_slots, deserialized.preallocated_slots);
    }
}
