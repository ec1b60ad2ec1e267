//! On-disk layout for Kardex store files.
//!
//! A store file is a concatenation of frames, each introduced by a 16-byte
//! frame header:
//!
//! ```text
//! +--------------------------------------+
//! | HEADER frame | StoreHeader | keydesc |
//! +--------------------------------------+
//! | INDEX_BLOCK frame                    |
//! | index entry 0 .. entry reserved-1    |  <- 20-byte slot + encoded key
//! +--------------------------------------+
//! | NEXT_INDEX sentinel                  |  <- links to the next block
//! +--------------------------------------+
//! | DATA / DELETED_DATA frames + payload |  <- grows append-only
//! +--------------------------------------+
//! ```
//!
//! Further index blocks are appended at the current end of data when a block
//! fills, and linked by back-patching the previous `NEXT_INDEX` sentinel.
//! All control integers are little-endian; encoded key bytes are big-endian
//! by construction (see `codec`).

use bytes::Buf;

use kardex_common::config::MAX_ALLOCATION;
use kardex_common::{Result, StoreError};

/// Size of a frame header on disk.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Size of the store header on disk.
pub const STORE_HEADER_SIZE: usize = 36;

/// Size of an index slot entry on disk, excluding its encoded key.
pub const INDEX_SLOT_SIZE: usize = 20;

/// Frame type tag. Stored as a signed 32-bit id; data frames use the
/// non-negative range. Do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Store header frame, first in the file.
    Header,
    /// A block of reserved index entries.
    IndexBlock,
    /// Sentinel linking to the next index block (zero if none yet).
    NextIndex,
    /// A logically freed data frame.
    DeletedData,
    /// A live data frame; payload bytes follow the header.
    Data,
}

impl FrameKind {
    /// Encodes the frame kind as its on-disk id.
    pub fn to_raw(self) -> i32 {
        match self {
            FrameKind::Header => -4,
            FrameKind::IndexBlock => -3,
            FrameKind::NextIndex => -2,
            FrameKind::DeletedData => -1,
            FrameKind::Data => 0,
        }
    }

    /// Decodes an on-disk id. Any non-negative id is a data frame.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            -4 => Ok(FrameKind::Header),
            -3 => Ok(FrameKind::IndexBlock),
            -2 => Ok(FrameKind::NextIndex),
            -1 => Ok(FrameKind::DeletedData),
            id if id >= 0 => Ok(FrameKind::Data),
            id => Err(StoreError::InvalidDatabase(format!(
                "unknown frame id: {}",
                id
            ))),
        }
    }
}

/// Header introducing every frame in the file.
///
/// Layout (16 bytes):
/// - id: 4 bytes (signed, see `FrameKind`)
/// - record_ref: 4 bytes (creation reference of data frames, else 0)
/// - size_or_next: 4 bytes (payload size; for `NextIndex` the file offset
///   of the next index block)
/// - next_offset: 4 bytes (file offset just past this frame's payload)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub record_ref: u32,
    pub size_or_next: u32,
    pub next_offset: u32,
}

impl FrameHeader {
    /// Size of the frame header in bytes.
    pub const SIZE: usize = FRAME_HEADER_SIZE;

    /// Creates a new frame header.
    pub fn new(kind: FrameKind, record_ref: u32, size_or_next: u32, next_offset: u32) -> Self {
        Self {
            kind,
            record_ref,
            size_or_next,
            next_offset,
        }
    }

    /// Serializes the frame header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.kind.to_raw().to_le_bytes());
        buf[4..8].copy_from_slice(&self.record_ref.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size_or_next.to_le_bytes());
        buf[12..16].copy_from_slice(&self.next_offset.to_le_bytes());
        buf
    }

    /// Deserializes a frame header from bytes.
    pub fn from_bytes(mut buf: &[u8]) -> Result<Self> {
        let kind = FrameKind::from_raw(buf.get_i32_le())?;
        let record_ref = buf.get_u32_le();
        let size_or_next = buf.get_u32_le();
        let next_offset = buf.get_u32_le();
        Ok(Self {
            kind,
            record_ref,
            size_or_next,
            next_offset,
        })
    }
}

/// Store header, stored in the HEADER frame at the start of the file and
/// mirrored in memory for the lifetime of the handle.
///
/// Layout (36 bytes), all little-endian:
/// - version: 4 bytes
/// - record_reference: 4 bytes
/// - next_free_data: 4 bytes
/// - nr_of_records: 4 bytes
/// - nr_of_index_records: 4 bytes
/// - last_deleted_index: 4 bytes (signed, -1 = empty free list)
/// - next_free_index: 4 bytes
/// - reserved_index_records: 2 bytes
/// - nr_of_keys: 2 bytes
/// - total_key_size: 2 bytes
/// - key_descriptor_size: 2 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    /// Format version.
    pub version: u32,
    /// Verification reference, incremented on every record creation and
    /// never reused.
    pub record_reference: u32,
    /// File offset of the next free data position.
    pub next_free_data: u32,
    /// Number of live records.
    pub nr_of_records: u32,
    /// Total allocated index slots: live, deleted, and reserved. Always a
    /// multiple of `reserved_index_records`.
    pub nr_of_index_records: u32,
    /// Slot id of the most recently deleted record, -1 if none.
    pub last_deleted_index: i32,
    /// File offset of the next reserved index entry.
    pub next_free_index: u32,
    /// Index slots reserved per block.
    pub reserved_index_records: u16,
    /// Number of defined search keys.
    pub nr_of_keys: u16,
    /// Sum of all encoded key sizes per record.
    pub total_key_size: u16,
    /// Size of the key-descriptor block stored after this header.
    pub key_descriptor_size: u16,
}

impl StoreHeader {
    /// Size of the store header in bytes.
    pub const SIZE: usize = STORE_HEADER_SIZE;

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..8].copy_from_slice(&self.record_reference.to_le_bytes());
        buf[8..12].copy_from_slice(&self.next_free_data.to_le_bytes());
        buf[12..16].copy_from_slice(&self.nr_of_records.to_le_bytes());
        buf[16..20].copy_from_slice(&self.nr_of_index_records.to_le_bytes());
        buf[20..24].copy_from_slice(&self.last_deleted_index.to_le_bytes());
        buf[24..28].copy_from_slice(&self.next_free_index.to_le_bytes());
        buf[28..30].copy_from_slice(&self.reserved_index_records.to_le_bytes());
        buf[30..32].copy_from_slice(&self.nr_of_keys.to_le_bytes());
        buf[32..34].copy_from_slice(&self.total_key_size.to_le_bytes());
        buf[34..36].copy_from_slice(&self.key_descriptor_size.to_le_bytes());
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(mut buf: &[u8]) -> Self {
        Self {
            version: buf.get_u32_le(),
            record_reference: buf.get_u32_le(),
            next_free_data: buf.get_u32_le(),
            nr_of_records: buf.get_u32_le(),
            nr_of_index_records: buf.get_u32_le(),
            last_deleted_index: buf.get_i32_le(),
            next_free_index: buf.get_u32_le(),
            reserved_index_records: buf.get_u16_le(),
            nr_of_keys: buf.get_u16_le(),
            total_key_size: buf.get_u16_le(),
            key_descriptor_size: buf.get_u16_le(),
        }
    }
}

/// Status of an index slot.
///
/// Persisted as a signed 32-bit sentinel: -2 reserved, -1 live, a
/// non-negative value for a deleted slot pointing at the previously deleted
/// slot id, and -3 for a deleted slot terminating the free list. The
/// distinct terminator id keeps the encoding unambiguous (a plain -1 would
/// collide with "live").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Preallocated, never used.
    Reserved,
    /// Holds a live record.
    Live,
    /// Deleted; the payload is the previous deleted slot id, -1 at the end
    /// of the free list.
    Deleted(i32),
}

impl SlotStatus {
    const RAW_RESERVED: i32 = -2;
    const RAW_LIVE: i32 = -1;
    const RAW_DELETED_END: i32 = -3;

    /// Encodes the status as its on-disk sentinel.
    pub fn to_raw(self) -> i32 {
        match self {
            SlotStatus::Reserved => Self::RAW_RESERVED,
            SlotStatus::Live => Self::RAW_LIVE,
            SlotStatus::Deleted(prev) if prev < 0 => Self::RAW_DELETED_END,
            SlotStatus::Deleted(prev) => prev,
        }
    }

    /// Decodes an on-disk sentinel.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            Self::RAW_RESERVED => Ok(SlotStatus::Reserved),
            Self::RAW_LIVE => Ok(SlotStatus::Live),
            Self::RAW_DELETED_END => Ok(SlotStatus::Deleted(-1)),
            prev if prev >= 0 => Ok(SlotStatus::Deleted(prev)),
            raw => Err(StoreError::InvalidDatabase(format!(
                "unknown slot status: {}",
                raw
            ))),
        }
    }

    /// Returns true for a live slot.
    pub fn is_live(&self) -> bool {
        matches!(self, SlotStatus::Live)
    }
}

/// One index entry, stored inside an index block and followed on disk (and
/// in the in-memory image) by the record's encoded key bytes.
///
/// Layout (20 bytes):
/// - status: 4 bytes (signed sentinel, see `SlotStatus`)
/// - offset: 4 bytes (file offset of this entry)
/// - data_offset: 4 bytes (file offset of the record's data frame)
/// - data_size: 4 bytes
/// - record_ref: 4 bytes (must match the data frame's reference)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSlot {
    pub status: SlotStatus,
    pub offset: u32,
    pub data_offset: u32,
    pub data_size: u32,
    pub record_ref: u32,
}

impl IndexSlot {
    /// Size of an index entry in bytes, excluding the encoded key.
    pub const SIZE: usize = INDEX_SLOT_SIZE;

    /// A reserved entry at the given file offset.
    pub fn reserved(offset: u32) -> Self {
        Self {
            status: SlotStatus::Reserved,
            offset,
            data_offset: u32::MAX,
            data_size: 0,
            record_ref: 0,
        }
    }

    /// Serializes the entry to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.status.to_raw().to_le_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.data_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.record_ref.to_le_bytes());
        buf
    }

    /// Deserializes an entry from bytes, rejecting unknown status sentinels.
    pub fn from_bytes(mut buf: &[u8]) -> Result<Self> {
        let status = SlotStatus::from_raw(buf.get_i32_le())?;
        Ok(Self {
            status,
            offset: buf.get_u32_le(),
            data_offset: buf.get_u32_le(),
            data_size: buf.get_u32_le(),
            record_ref: buf.get_u32_le(),
        })
    }
}

/// Contiguous in-memory image of every allocated index entry: the 20-byte
/// slot struct followed by its encoded key bytes, one entry per slot, live
/// or not. Byte-identical to the entries' on-disk form.
#[derive(Debug)]
pub struct SlotImage {
    buf: Vec<u8>,
    entry_size: usize,
    len: u32,
}

impl SlotImage {
    /// Creates an empty image preallocated for `capacity` entries of
    /// `entry_size` bytes each. Fails when the preallocation exceeds the
    /// per-allocation cap.
    pub fn new(capacity: u32, entry_size: usize) -> Result<Self> {
        let bytes = capacity as u64 * entry_size as u64;
        if bytes > MAX_ALLOCATION {
            return Err(StoreError::MemoryAllocation {
                requested: bytes,
                max: MAX_ALLOCATION,
            });
        }
        Ok(Self {
            buf: Vec::with_capacity(bytes as usize),
            entry_size,
            len: 0,
        })
    }

    /// Number of entries in the image.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns true if the image holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of one entry including its encoded key.
    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Appends one raw entry as read from disk, validating its slot struct.
    pub fn push_entry(&mut self, entry: &[u8]) -> Result<()> {
        debug_assert_eq!(entry.len(), self.entry_size);
        let bytes = (self.len as u64 + 1) * self.entry_size as u64;
        if bytes > MAX_ALLOCATION {
            return Err(StoreError::MemoryAllocation {
                requested: bytes,
                max: MAX_ALLOCATION,
            });
        }
        IndexSlot::from_bytes(entry)?;
        self.buf.extend_from_slice(entry);
        self.len += 1;
        Ok(())
    }

    /// Appends a reserved entry with a zeroed key at the given file offset.
    pub fn push_reserved(&mut self, offset: u32) -> Result<()> {
        let mut entry = vec![0u8; self.entry_size];
        entry[..IndexSlot::SIZE].copy_from_slice(&IndexSlot::reserved(offset).to_bytes());
        self.push_entry(&entry)
    }

    fn start(&self, slot: u32) -> usize {
        slot as usize * self.entry_size
    }

    /// Decodes the slot struct of an entry. Entries are validated when
    /// loaded, so decoding here is total.
    pub fn slot(&self, slot: u32) -> IndexSlot {
        let start = self.start(slot);
        IndexSlot::from_bytes(&self.buf[start..start + IndexSlot::SIZE])
            .unwrap_or_else(|_| IndexSlot::reserved(0))
    }

    /// Overwrites the slot struct of an entry.
    pub fn set_slot(&mut self, slot: u32, entry: &IndexSlot) {
        let start = self.start(slot);
        self.buf[start..start + IndexSlot::SIZE].copy_from_slice(&entry.to_bytes());
    }

    /// Overwrites the encoded key bytes of an entry.
    pub fn set_key(&mut self, slot: u32, key: &[u8]) {
        debug_assert_eq!(key.len(), self.entry_size - IndexSlot::SIZE);
        let start = self.start(slot) + IndexSlot::SIZE;
        self.buf[start..start + key.len()].copy_from_slice(key);
    }

    /// Returns `len` encoded-key bytes of an entry, starting at
    /// `key_offset` bytes into the entry (the offset includes the slot
    /// struct prefix).
    pub fn key_bytes(&self, slot: u32, key_offset: usize, len: usize) -> &[u8] {
        let start = self.start(slot) + key_offset;
        &self.buf[start..start + len]
    }

    /// Returns the full key region of an entry.
    pub fn key_region(&self, slot: u32) -> &[u8] {
        let start = self.start(slot) + IndexSlot::SIZE;
        &self.buf[start..self.start(slot) + self.entry_size]
    }

    /// Returns the raw bytes of one entry, as they appear on disk.
    pub fn entry_bytes(&self, slot: u32) -> &[u8] {
        let start = self.start(slot);
        &self.buf[start..start + self.entry_size]
    }
}
