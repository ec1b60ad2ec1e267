//! Search-key descriptor types for Kardex.
//!
//! A key descriptor tells the store how to derive one search key from a
//! record image: an ordered list of typed segments, each naming a byte range
//! of the record. A store carries one descriptor per search key; every
//! record is indexed under all of them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Typed interpretation of a key segment.
///
/// The discriminants are stored on disk; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SegmentType {
    /// Raw byte string, compared lexicographically.
    Bytes = 1,
    /// Signed 16-bit integer.
    I16 = 2,
    /// Unsigned 16-bit integer.
    U16 = 3,
    /// Signed 32-bit integer.
    I32 = 4,
    /// Unsigned 32-bit integer.
    U32 = 5,
}

impl SegmentType {
    /// Returns the required byte size for this type, or None for
    /// variable-length byte strings.
    pub fn fixed_size(&self) -> Option<u8> {
        match self {
            SegmentType::Bytes => None,
            SegmentType::I16 | SegmentType::U16 => Some(2),
            SegmentType::I32 | SegmentType::U32 => Some(4),
        }
    }

    /// Returns true if a segment of this type may be truncated mid-segment
    /// by a partial search key.
    pub fn byte_addressable(&self) -> bool {
        matches!(self, SegmentType::Bytes)
    }
}

impl TryFrom<u8> for SegmentType {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(SegmentType::Bytes),
            2 => Ok(SegmentType::I16),
            3 => Ok(SegmentType::U16),
            4 => Ok(SegmentType::I32),
            5 => Ok(SegmentType::U32),
            _ => Err(StoreError::InvalidKeyDescriptor(format!(
                "unknown segment type: {}",
                value
            ))),
        }
    }
}

/// One segment of a search key.
///
/// Stored on disk as 4 bytes: offset (2), type (1), size (1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySegment {
    /// Byte offset of the segment within the record image.
    pub offset: u16,
    /// Typed interpretation of the segment bytes.
    pub kind: SegmentType,
    /// Size of the segment in bytes.
    pub size: u8,
}

impl KeySegment {
    /// Encoded size of a segment descriptor on disk.
    pub const DISK_SIZE: usize = 4;

    /// Creates a new key segment.
    pub fn new(offset: u16, kind: SegmentType, size: u8) -> Self {
        Self { offset, kind, size }
    }

    /// Convenience constructor for fixed-size integer segments.
    pub fn integer(offset: u16, kind: SegmentType) -> Self {
        let size = kind.fixed_size().unwrap_or(0);
        Self { offset, kind, size }
    }

    /// Inclusive byte range covered by this segment within the record.
    fn range(&self) -> (u32, u32) {
        let start = self.offset as u32;
        (start, start + self.size as u32 - 1)
    }
}

/// Description of one search key: an ordered list of segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyDescriptor {
    /// Segments in key order; their encoded values are concatenated to form
    /// the search key.
    pub segments: Vec<KeySegment>,
}

impl KeyDescriptor {
    /// Creates a descriptor from segments.
    pub fn new(segments: Vec<KeySegment>) -> Self {
        Self { segments }
    }

    /// Total encoded key size in bytes: the sum of all segment sizes.
    pub fn key_size(&self) -> u16 {
        self.segments.iter().map(|s| s.size as u16).sum()
    }

    /// Encoded size of this descriptor on disk: segment count (2) plus the
    /// segment entries.
    pub fn disk_size(&self) -> u16 {
        2 + (self.segments.len() * KeySegment::DISK_SIZE) as u16
    }

    /// Validates this descriptor.
    ///
    /// A descriptor is valid iff it has at least one segment, every
    /// segment's size matches its type (byte strings non-empty, integers
    /// their exact width), and the segments' byte ranges are mutually
    /// disjoint. Ranges may overlap across different descriptors.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(StoreError::InvalidKeyDescriptor(
                "descriptor has no segments".to_string(),
            ));
        }

        for segment in &self.segments {
            let size_ok = match segment.kind.fixed_size() {
                Some(required) => segment.size == required,
                None => segment.size > 0,
            };
            if !size_ok {
                return Err(StoreError::InvalidKeyDescriptor(format!(
                    "segment at offset {} has size {} for type {:?}",
                    segment.offset, segment.size, segment.kind
                )));
            }
        }

        for (j, a) in self.segments.iter().enumerate() {
            for (k, b) in self.segments.iter().enumerate() {
                if j == k {
                    continue;
                }
                let (a_start, a_stop) = a.range();
                let (b_start, b_stop) = b.range();
                if a_start <= b_stop && b_start <= a_stop {
                    return Err(StoreError::InvalidKeyDescriptor(format!(
                        "segments at offsets {} and {} overlap",
                        a.offset, b.offset
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Validates a full descriptor set and returns the derived header sizes:
/// the key-descriptor block size and the total encoded key size.
pub fn validate_descriptors(descriptors: &[KeyDescriptor]) -> Result<(u16, u16)> {
    if descriptors.is_empty() {
        return Err(StoreError::InvalidKeyDescriptor(
            "no keys defined".to_string(),
        ));
    }

    let mut block_size: u16 = 0;
    let mut total_key_size: u16 = 0;

    for descriptor in descriptors {
        descriptor.validate()?;
        block_size += descriptor.disk_size();
        total_key_size += descriptor.key_size();
    }

    Ok((block_size, total_key_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_type_fixed_sizes() {
        assert_eq!(SegmentType::Bytes.fixed_size(), None);
        assert_eq!(SegmentType::I16.fixed_size(), Some(2));
        assert_eq!(SegmentType::U16.fixed_size(), Some(2));
        assert_eq!(SegmentType::I32.fixed_size(), Some(4));
        assert_eq!(SegmentType::U32.fixed_size(), Some(4));
    }

    #[test]
    fn test_segment_type_repr() {
        assert_eq!(SegmentType::Bytes as u8, 1);
        assert_eq!(SegmentType::I16 as u8, 2);
        assert_eq!(SegmentType::U16 as u8, 3);
        assert_eq!(SegmentType::I32 as u8, 4);
        assert_eq!(SegmentType::U32 as u8, 5);
    }

    #[test]
    fn test_segment_type_try_from() {
        for raw in 1u8..=5 {
            let kind = SegmentType::try_from(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
        assert!(SegmentType::try_from(0).is_err());
        assert!(SegmentType::try_from(6).is_err());
    }

    #[test]
    fn test_byte_addressable() {
        assert!(SegmentType::Bytes.byte_addressable());
        assert!(!SegmentType::U32.byte_addressable());
        assert!(!SegmentType::I16.byte_addressable());
    }

    #[test]
    fn test_key_size_sums_segments() {
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::new(0, SegmentType::Bytes, 10),
            KeySegment::integer(10, SegmentType::U32),
        ]);
        assert_eq!(descriptor.key_size(), 14);
        assert_eq!(descriptor.disk_size(), 2 + 2 * 4);
    }

    #[test]
    fn test_validate_accepts_disjoint_segments() {
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::new(4, SegmentType::Bytes, 10),
            KeySegment::integer(0, SegmentType::U32),
        ]);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        // Second segment starts on the last byte of the first.
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::new(0, SegmentType::Bytes, 10),
            KeySegment::new(9, SegmentType::Bytes, 15),
        ]);
        assert!(matches!(
            descriptor.validate(),
            Err(StoreError::InvalidKeyDescriptor(_))
        ));
    }

    #[test]
    fn test_validate_rejects_contained_segment() {
        // Second segment entirely inside the first.
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::new(0, SegmentType::Bytes, 20),
            KeySegment::integer(8, SegmentType::U16),
        ]);
        assert!(descriptor.validate().is_err());

        // And the other way around: first inside second.
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::integer(8, SegmentType::U16),
            KeySegment::new(0, SegmentType::Bytes, 20),
        ]);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_integer_size() {
        let descriptor = KeyDescriptor::new(vec![KeySegment::new(0, SegmentType::U32, 2)]);
        assert!(descriptor.validate().is_err());

        let descriptor = KeyDescriptor::new(vec![KeySegment::new(0, SegmentType::I16, 4)]);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_byte_segment() {
        let descriptor = KeyDescriptor::new(vec![KeySegment::new(0, SegmentType::Bytes, 0)]);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_no_segments() {
        let descriptor = KeyDescriptor::default();
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_validate_descriptors_sizes() {
        let descriptors = vec![
            KeyDescriptor::new(vec![
                KeySegment::new(4, SegmentType::Bytes, 15),
                KeySegment::new(19, SegmentType::Bytes, 10),
            ]),
            KeyDescriptor::new(vec![KeySegment::integer(0, SegmentType::U32)]),
        ];

        let (block_size, total_key_size) = validate_descriptors(&descriptors).unwrap();
        assert_eq!(block_size, (2 + 8) + (2 + 4));
        assert_eq!(total_key_size, 25 + 4);
    }

    #[test]
    fn test_validate_descriptors_rejects_empty_set() {
        assert!(validate_descriptors(&[]).is_err());
    }

    #[test]
    fn test_cross_descriptor_overlap_allowed() {
        // Two keys reading the same record bytes are legal.
        let descriptors = vec![
            KeyDescriptor::new(vec![KeySegment::integer(0, SegmentType::U32)]),
            KeyDescriptor::new(vec![KeySegment::new(0, SegmentType::Bytes, 8)]),
        ];
        assert!(validate_descriptors(&descriptors).is_ok());
    }

    #[test]
    fn test_key_descriptor_serde_roundtrip() {
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::new(4, SegmentType::Bytes, 10),
            KeySegment::integer(0, SegmentType::I32),
        ]);

        let serialized = serde_json::to_string(&descriptor).unwrap();
        let deserialized: KeyDescriptor = serde_json::from_str(&serialized).unwrap();
        assert_eq!(descriptor, deserialized);
    }
}
