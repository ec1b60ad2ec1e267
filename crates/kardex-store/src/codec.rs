//! Order-preserving key encoding.
//!
//! Encoded keys are compared with a raw byte compare, so every segment is
//! transformed into a form whose lexicographic order equals the semantic
//! order of the typed value: byte strings are copied verbatim, unsigned
//! integers are written big-endian, and signed integers are biased by
//! 2^(n-1) (sign bit flipped) before the big-endian write. Integer values
//! inside record images are little-endian, matching the rest of the file.

use kardex_common::key::{KeyDescriptor, SegmentType};
use kardex_common::{Result, StoreError};

/// Transforms one key segment in place into its order-preserving form.
pub fn encode_segment(bytes: &mut [u8], kind: SegmentType) {
    match kind {
        SegmentType::Bytes => {}
        SegmentType::U16 => {
            let value = u16::from_le_bytes([bytes[0], bytes[1]]);
            bytes.copy_from_slice(&value.to_be_bytes());
        }
        SegmentType::I16 => {
            let value = u16::from_le_bytes([bytes[0], bytes[1]]).wrapping_add(0x8000);
            bytes.copy_from_slice(&value.to_be_bytes());
        }
        SegmentType::U32 => {
            let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            bytes.copy_from_slice(&value.to_be_bytes());
        }
        SegmentType::I32 => {
            let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                .wrapping_add(0x8000_0000);
            bytes.copy_from_slice(&value.to_be_bytes());
        }
    }
}

/// Builds the full encoded key image for a record: for every descriptor, in
/// order, the encoded segment values extracted from the record bytes.
/// `out` must be sized to the total encoded key size.
///
/// Fails `RecordTooSmall` when a segment extends past the record bytes.
pub fn build_record_key(
    descriptors: &[KeyDescriptor],
    record: &[u8],
    out: &mut [u8],
) -> Result<()> {
    let mut pos = 0usize;
    for descriptor in descriptors {
        for segment in &descriptor.segments {
            let start = segment.offset as usize;
            let end = start + segment.size as usize;
            if end > record.len() {
                return Err(StoreError::RecordTooSmall {
                    offset: segment.offset as u32,
                    end: end as u32,
                });
            }
            let target = &mut out[pos..pos + segment.size as usize];
            target.copy_from_slice(&record[start..end]);
            encode_segment(target, segment.kind);
            pos += segment.size as usize;
        }
    }
    debug_assert_eq!(pos, out.len());
    Ok(())
}

/// Converts a caller-supplied search key in place.
///
/// The key may be a prefix of the descriptor's full key: truncation is only
/// legal on a segment boundary or inside a byte-string segment. A key longer
/// than the full key, or truncated inside a multi-byte integer segment, is
/// rejected as `InvalidKey`.
pub fn convert_search_key(descriptor: &KeyDescriptor, key: &mut [u8]) -> Result<()> {
    if key.len() > descriptor.key_size() as usize {
        return Err(StoreError::InvalidKey);
    }

    let mut pos = 0usize;
    for segment in &descriptor.segments {
        let remaining = key.len() - pos;
        if remaining == 0 {
            break;
        }
        let size = segment.size as usize;
        if remaining < size {
            if segment.kind.byte_addressable() {
                // A byte-string suffix may be cut anywhere.
                pos = key.len();
                break;
            }
            return Err(StoreError::InvalidKey);
        }
        encode_segment(&mut key[pos..pos + size], segment.kind);
        pos += size;
    }

    if pos != key.len() {
        return Err(StoreError::InvalidKey);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kardex_common::key::KeySegment;

    fn encoded(value: &[u8], kind: SegmentType) -> Vec<u8> {
        let mut bytes = value.to_vec();
        encode_segment(&mut bytes, kind);
        bytes
    }

    #[test]
    fn test_bytes_identity() {
        assert_eq!(encoded(b"abc", SegmentType::Bytes), b"abc");
    }

    #[test]
    fn test_u16_big_endian() {
        assert_eq!(
            encoded(&0x1234u16.to_le_bytes(), SegmentType::U16),
            vec![0x12, 0x34]
        );
    }

    #[test]
    fn test_u32_big_endian() {
        assert_eq!(
            encoded(&0xDEADBEEFu32.to_le_bytes(), SegmentType::U32),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_i16_sign_bias() {
        // -1 -> 0x7FFF, 0 -> 0x8000, 1 -> 0x8001
        assert_eq!(
            encoded(&(-1i16).to_le_bytes(), SegmentType::I16),
            vec![0x7F, 0xFF]
        );
        assert_eq!(
            encoded(&0i16.to_le_bytes(), SegmentType::I16),
            vec![0x80, 0x00]
        );
        assert_eq!(
            encoded(&1i16.to_le_bytes(), SegmentType::I16),
            vec![0x80, 0x01]
        );
    }

    #[test]
    fn test_i32_extremes() {
        assert_eq!(
            encoded(&i32::MIN.to_le_bytes(), SegmentType::I32),
            vec![0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encoded(&i32::MAX.to_le_bytes(), SegmentType::I32),
            vec![0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_pairwise_ordering_i32() {
        let values = [i32::MIN, -100_000, -2, -1, 0, 1, 2, 100_000, i32::MAX];
        for a in values {
            for b in values {
                let ea = encoded(&a.to_le_bytes(), SegmentType::I32);
                let eb = encoded(&b.to_le_bytes(), SegmentType::I32);
                assert_eq!(ea.cmp(&eb), a.cmp(&b), "ordering broken for {} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_pairwise_ordering_i16_u16_u32() {
        let i16s = [i16::MIN, -1, 0, 1, i16::MAX];
        for a in i16s {
            for b in i16s {
                let ea = encoded(&a.to_le_bytes(), SegmentType::I16);
                let eb = encoded(&b.to_le_bytes(), SegmentType::I16);
                assert_eq!(ea.cmp(&eb), a.cmp(&b));
            }
        }

        let u16s = [0u16, 1, 0x00FF, 0x0100, u16::MAX];
        for a in u16s {
            for b in u16s {
                let ea = encoded(&a.to_le_bytes(), SegmentType::U16);
                let eb = encoded(&b.to_le_bytes(), SegmentType::U16);
                assert_eq!(ea.cmp(&eb), a.cmp(&b));
            }
        }

        let u32s = [0u32, 1, 0xFF, 0x100, 0xFFFF_FFFF];
        for a in u32s {
            for b in u32s {
                let ea = encoded(&a.to_le_bytes(), SegmentType::U32);
                let eb = encoded(&b.to_le_bytes(), SegmentType::U32);
                assert_eq!(ea.cmp(&eb), a.cmp(&b));
            }
        }
    }

    #[test]
    fn test_build_record_key_concatenates_descriptors() {
        let descriptors = vec![
            KeyDescriptor::new(vec![KeySegment::new(4, SegmentType::Bytes, 3)]),
            KeyDescriptor::new(vec![KeySegment::integer(0, SegmentType::U32)]),
        ];

        let mut record = Vec::new();
        record.extend_from_slice(&7u32.to_le_bytes());
        record.extend_from_slice(b"xyz");

        let mut key = vec![0u8; 7];
        build_record_key(&descriptors, &record, &mut key).unwrap();
        assert_eq!(&key[..3], b"xyz");
        assert_eq!(&key[3..], &7u32.to_be_bytes());
    }

    #[test]
    fn test_build_record_key_too_small() {
        let descriptors = vec![KeyDescriptor::new(vec![KeySegment::integer(
            6,
            SegmentType::U32,
        )])];
        let record = [0u8; 8]; // segment needs bytes 6..10
        let mut key = vec![0u8; 4];
        assert!(matches!(
            build_record_key(&descriptors, &record, &mut key),
            Err(StoreError::RecordTooSmall { .. })
        ));
    }

    #[test]
    fn test_convert_full_key() {
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::new(0, SegmentType::Bytes, 2),
            KeySegment::integer(2, SegmentType::U16),
        ]);

        let mut key = vec![b'a', b'b'];
        key.extend_from_slice(&0x0102u16.to_le_bytes());
        convert_search_key(&descriptor, &mut key).unwrap();
        assert_eq!(key, vec![b'a', b'b', 0x01, 0x02]);
    }

    #[test]
    fn test_convert_partial_on_segment_boundary() {
        let descriptor = KeyDescriptor::new(vec![
            KeySegment::integer(0, SegmentType::U16),
            KeySegment::integer(2, SegmentType::U32),
        ]);

        let mut key = 0x0A0Bu16.to_le_bytes().to_vec();
        convert_search_key(&descriptor, &mut key).unwrap();
        assert_eq!(key, vec![0x0A, 0x0B]);
    }

    #[test]
    fn test_convert_partial_inside_byte_segment() {
        let descriptor = KeyDescriptor::new(vec![KeySegment::new(0, SegmentType::Bytes, 10)]);

        let mut key = b"abc".to_vec();
        convert_search_key(&descriptor, &mut key).unwrap();
        assert_eq!(key, b"abc");
    }

    #[test]
    fn test_convert_rejects_truncated_integer() {
        let descriptor = KeyDescriptor::new(vec![KeySegment::integer(0, SegmentType::U32)]);

        let mut key = vec![0u8; 2]; // half a u32
        assert!(matches!(
            convert_search_key(&descriptor, &mut key),
            Err(StoreError::InvalidKey)
        ));
    }

    #[test]
    fn test_convert_rejects_oversized_key() {
        let descriptor = KeyDescriptor::new(vec![KeySegment::integer(0, SegmentType::U16)]);

        let mut key = vec![0u8; 4];
        assert!(matches!(
            convert_search_key(&descriptor, &mut key),
            Err(StoreError::InvalidKey)
        ));
    }
}
