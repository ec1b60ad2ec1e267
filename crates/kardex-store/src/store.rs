//! The record manager.
//!
//! A `Store` owns one store file, the mirrored header, the key descriptors,
//! the in-memory slot image, and one `KeyIndex` per search key. Every
//! operation runs to completion on the calling thread; callers serialize
//! access across handles themselves.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use kardex_common::config::{
    FORMAT_VERSION, MAX_ALLOCATION, MAX_RESERVED_INDEX_RECORDS, MIN_RESERVED_INDEX_RECORDS,
};
use kardex_common::key::{validate_descriptors, KeyDescriptor, KeySegment, SegmentType};
use kardex_common::{Result, StoreError, StoreOptions};

use crate::codec;
use crate::file::StoreFile;
use crate::index::{KeyIndex, SearchOutcome};
use crate::layout::{
    FrameHeader, FrameKind, IndexSlot, SlotImage, SlotStatus, StoreHeader, FRAME_HEADER_SIZE,
    INDEX_SLOT_SIZE, STORE_HEADER_SIZE,
};
use crate::record::{Record, SearchKey, SlotId};
use crate::registry::{self, RegistryEntry};

/// An open indexed record store.
#[derive(Debug)]
pub struct Store {
    file: StoreFile,
    path: PathBuf,
    read_only: bool,
    header: StoreHeader,
    descriptors: Vec<KeyDescriptor>,
    keys: Vec<KeyIndex>,
    image: SlotImage,
    /// Slots ever used (live or deleted); the next reserved slot's id.
    used_slots: u32,
    /// Index entry size: slot struct plus total encoded key size.
    entry_size: usize,
    _registry: RegistryEntry,
}

impl Store {
    /// Creates a new store file with the given key descriptors and opens
    /// it.
    ///
    /// Fails if the path is empty, `reserved_index_records` is outside
    /// [10, 10000], a descriptor is invalid, the path is already open in
    /// this process, or the file already exists.
    pub fn create(
        path: impl AsRef<Path>,
        descriptors: &[KeyDescriptor],
        reserved_index_records: u16,
    ) -> Result<Store> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidParameters(
                "empty database name".to_string(),
            ));
        }
        if !(MIN_RESERVED_INDEX_RECORDS..=MAX_RESERVED_INDEX_RECORDS)
            .contains(&reserved_index_records)
        {
            return Err(StoreError::InvalidParameters(format!(
                "reserved index records {} outside [{}, {}]",
                reserved_index_records, MIN_RESERVED_INDEX_RECORDS, MAX_RESERVED_INDEX_RECORDS
            )));
        }
        if registry::is_open(path) {
            return Err(StoreError::DatabaseAlreadyOpened(
                path.display().to_string(),
            ));
        }

        let (key_descriptor_size, total_key_size) = validate_descriptors(descriptors)?;

        if path.exists() {
            return Err(StoreError::DatabaseAlreadyExist(
                path.display().to_string(),
            ));
        }

        let mut file = StoreFile::create(path)?;

        let entry_size = (INDEX_SLOT_SIZE + total_key_size as usize) as u32;
        let header_payload = STORE_HEADER_SIZE as u32 + key_descriptor_size as u32;
        let block_offset = FRAME_HEADER_SIZE as u32 + header_payload;
        let next_free_index = block_offset + FRAME_HEADER_SIZE as u32;
        let next_free_data = next_free_index
            + reserved_index_records as u32 * entry_size
            + FRAME_HEADER_SIZE as u32;

        let header = StoreHeader {
            version: FORMAT_VERSION,
            record_reference: 0,
            next_free_data,
            nr_of_records: 0,
            nr_of_index_records: reserved_index_records as u32,
            last_deleted_index: -1,
            next_free_index,
            reserved_index_records,
            nr_of_keys: descriptors.len() as u16,
            total_key_size,
            key_descriptor_size,
        };

        let frame = FrameHeader::new(FrameKind::Header, 0, header_payload, 0);
        file.write_at(0, &frame.to_bytes())?;
        file.write(&header.to_bytes())?;

        for descriptor in descriptors {
            file.write(&(descriptor.segments.len() as u16).to_le_bytes())?;
            for segment in &descriptor.segments {
                let mut bytes = [0u8; KeySegment::DISK_SIZE];
                bytes[0..2].copy_from_slice(&segment.offset.to_le_bytes());
                bytes[2] = segment.kind as u8;
                bytes[3] = segment.size;
                file.write(&bytes)?;
            }
        }

        write_reserved_block(
            &mut file,
            block_offset,
            reserved_index_records,
            total_key_size,
        )?;
        file.sync()?;
        drop(file);

        debug!(path = %path.display(), keys = descriptors.len(), "created store");

        Store::open(path, StoreOptions::default())
    }

    /// Opens an existing store.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Store> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidParameters(
                "empty database name".to_string(),
            ));
        }

        let registry_entry = registry::acquire(path)?;

        let mut file = StoreFile::open(path, options.read_only)
            .map_err(|_| StoreError::NoDatabase(path.display().to_string()))?;

        // Header frame and header.
        let mut frame_buf = [0u8; FRAME_HEADER_SIZE];
        file.read_at(0, &mut frame_buf)?;
        let frame = FrameHeader::from_bytes(&frame_buf)?;
        if frame.kind != FrameKind::Header {
            return Err(StoreError::InvalidDatabase(
                "missing header frame".to_string(),
            ));
        }
        let mut header_buf = [0u8; STORE_HEADER_SIZE];
        file.read(&mut header_buf)?;
        let header = StoreHeader::from_bytes(&header_buf);
        if header.version != FORMAT_VERSION {
            return Err(StoreError::InvalidDatabase(format!(
                "format version {:#010x}, expected {:#010x}",
                header.version, FORMAT_VERSION
            )));
        }

        // Key descriptor block.
        let mut descriptors = Vec::with_capacity(header.nr_of_keys as usize);
        for _ in 0..header.nr_of_keys {
            let mut count_buf = [0u8; 2];
            file.read(&mut count_buf)?;
            let nr_of_segments = u16::from_le_bytes(count_buf);

            let mut segments = Vec::with_capacity(nr_of_segments as usize);
            for _ in 0..nr_of_segments {
                let mut segment_buf = [0u8; KeySegment::DISK_SIZE];
                file.read(&mut segment_buf)?;
                segments.push(KeySegment {
                    offset: u16::from_le_bytes([segment_buf[0], segment_buf[1]]),
                    kind: SegmentType::try_from(segment_buf[2])?,
                    size: segment_buf[3],
                });
            }
            descriptors.push(KeyDescriptor::new(segments));
        }

        let (key_descriptor_size, total_key_size) = validate_descriptors(&descriptors)?;
        if key_descriptor_size != header.key_descriptor_size
            || total_key_size != header.total_key_size
        {
            return Err(StoreError::InvalidKeyDescriptor(
                "stored descriptors disagree with header sizes".to_string(),
            ));
        }

        let entry_size = INDEX_SLOT_SIZE + total_key_size as usize;

        // Size the image: read-only opens hold exactly the slots on disk,
        // writable opens preallocate room for future creates.
        let mut capacity = if options.read_only {
            header.nr_of_index_records
        } else {
            header.nr_of_index_records.max(options.preallocated_slots)
        };
        if capacity as u64 * entry_size as u64 > MAX_ALLOCATION {
            capacity = header.nr_of_index_records;
            if capacity as u64 * entry_size as u64 > MAX_ALLOCATION {
                return Err(StoreError::TooManyRecords(capacity as u64));
            }
        }
        let mut image = SlotImage::new(capacity, entry_size)?;

        // Index blocks: `reserved_index_records` entries each, chained by
        // NEXT_INDEX sentinels.
        file.read(&mut frame_buf)?;
        if FrameHeader::from_bytes(&frame_buf)?.kind != FrameKind::IndexBlock {
            return Err(StoreError::InvalidDatabase(
                "missing index block frame".to_string(),
            ));
        }
        let file_size = file.size()?;
        let mut entry = vec![0u8; entry_size];
        let mut in_block: u16 = 0;
        for _ in 0..header.nr_of_index_records {
            if in_block == header.reserved_index_records {
                file.read(&mut frame_buf)?;
                let sentinel = FrameHeader::from_bytes(&frame_buf)?;
                if sentinel.kind != FrameKind::NextIndex {
                    return Err(StoreError::InvalidDatabase(
                        "missing next-index sentinel".to_string(),
                    ));
                }
                file.read_at(sentinel.size_or_next as u64, &mut frame_buf)?;
                if FrameHeader::from_bytes(&frame_buf)?.kind != FrameKind::IndexBlock {
                    return Err(StoreError::InvalidDatabase(
                        "next-index sentinel points outside an index block".to_string(),
                    ));
                }
                in_block = 0;
            }

            let position = file.position()?;
            if let Err(err) = file.read(&mut entry) {
                if let StoreError::Io(io) = &err {
                    if io.kind() == std::io::ErrorKind::UnexpectedEof {
                        return Err(StoreError::SizeMismatch {
                            expected: position + entry_size as u64,
                            actual: file_size,
                        });
                    }
                }
                return Err(err);
            }
            image.push_entry(&entry)?;
            in_block += 1;
        }

        let used_slots = (0..image.len())
            .filter(|&slot| image.slot(slot).status != SlotStatus::Reserved)
            .count() as u32;

        let mut keys = Vec::with_capacity(descriptors.len());
        let mut key_offset = INDEX_SLOT_SIZE as u16;
        for descriptor in &descriptors {
            keys.push(KeyIndex::new(key_offset, descriptor.key_size()));
            key_offset += descriptor.key_size();
        }
        for key in &mut keys {
            key.ensure_sorted(&image);
        }

        debug!(
            path = %path.display(),
            records = header.nr_of_records,
            slots = header.nr_of_index_records,
            "opened store"
        );

        Ok(Store {
            file,
            path: path.to_path_buf(),
            read_only: options.read_only,
            header,
            descriptors,
            keys,
            image,
            used_slots,
            entry_size,
            _registry: registry_entry,
        })
    }

    /// Closes the store, forcing pending writes to disk. Dropping the
    /// handle performs the same cleanup without the final sync.
    pub fn close(self) -> Result<()> {
        if !self.read_only {
            self.file.sync()?;
        }
        debug!(path = %self.path.display(), "closed store");
        Ok(())
    }

    /// The store's file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live records.
    pub fn nr_of_records(&self) -> u32 {
        self.header.nr_of_records
    }

    /// Number of defined search keys.
    pub fn nr_of_keys(&self) -> u16 {
        self.header.nr_of_keys
    }

    /// Encoded size of the given key, or 0 for an unknown key id.
    pub fn key_size(&self, key_id: u16) -> u16 {
        self.keys
            .get(key_id as usize)
            .map(|key| key.key_size())
            .unwrap_or(0)
    }

    /// Creates a record and returns its slot id.
    ///
    /// The deleted-record free list is searched first; the first deleted
    /// slot whose data region fits the payload is reused in place.
    /// Otherwise the record is appended at the data heap's end using the
    /// next reserved index slot, appending a fresh reserved block when that
    /// was the last one.
    pub fn create_record(&mut self, record: &Record<'_>) -> Result<SlotId> {
        self.ensure_writable()?;

        let data_size = record.payload().len() as u32;
        let mut key = vec![0u8; self.header.total_key_size as usize];
        codec::build_record_key(&self.descriptors, record.bytes, &mut key)?;

        let reuse = self.find_reusable_slot(data_size)?;
        let record_ref = self.header.record_reference;
        let mut header = self.header.clone();
        let mut fresh_slot = false;

        let (slot_id, entry) = match reuse {
            Some(found) => {
                // Unlink the winner from the free list.
                match found.predecessor {
                    None => header.last_deleted_index = found.prev,
                    Some(predecessor) => {
                        let mut entry = self.image.slot(predecessor);
                        entry.status = SlotStatus::Deleted(found.prev);
                        self.image.set_slot(predecessor, &entry);
                        self.file
                            .write_at(entry.offset as u64, self.image.entry_bytes(predecessor))?;
                    }
                }

                let old = self.image.slot(found.slot);
                let entry = IndexSlot {
                    status: SlotStatus::Live,
                    offset: old.offset,
                    data_offset: old.data_offset,
                    data_size,
                    record_ref,
                };
                // Overwrite the data region in place, keeping the frame's
                // span so later updates see the full reserved size.
                let frame = FrameHeader::new(
                    FrameKind::Data,
                    record_ref,
                    data_size,
                    found.frame.next_offset,
                );
                self.file.write_at(entry.data_offset as u64, &frame.to_bytes())?;
                self.file.write(record.payload())?;
                (found.slot, entry)
            }
            None => {
                fresh_slot = true;
                let slot_id = self.used_slots;
                if slot_id >= header.nr_of_index_records {
                    return Err(StoreError::IndexCorrupt {
                        slot: slot_id,
                        reason: "no reserved index slots".to_string(),
                    });
                }
                let existing = self.image.slot(slot_id);
                if existing.status != SlotStatus::Reserved {
                    return Err(StoreError::IndexCorrupt {
                        slot: slot_id,
                        reason: "next free slot is not reserved".to_string(),
                    });
                }

                let data_offset = header.next_free_data;
                let entry = IndexSlot {
                    status: SlotStatus::Live,
                    offset: header.next_free_index,
                    data_offset,
                    data_size,
                    record_ref,
                };
                let next_offset = data_offset + FRAME_HEADER_SIZE as u32 + data_size;
                let frame = FrameHeader::new(FrameKind::Data, record_ref, data_size, next_offset);
                self.file.write_at(data_offset as u64, &frame.to_bytes())?;
                self.file.write(record.payload())?;
                header.next_free_data = next_offset;
                (slot_id, entry)
            }
        };

        // Index entry plus encoded key.
        self.file.write_at(entry.offset as u64, &entry.to_bytes())?;
        self.file.write(&key)?;

        header.nr_of_records += 1;
        header.record_reference += 1;

        if fresh_slot {
            if self.used_slots + 1 == header.nr_of_index_records {
                self.append_reserved_block(&mut header)?;
            } else {
                header.next_free_index += self.entry_size as u32;
            }
        }

        // Header last: everything it points at is already on disk.
        self.write_header(&header)?;
        self.header = header;
        if fresh_slot {
            self.used_slots += 1;
        }

        self.image.set_slot(slot_id, &entry);
        self.image.set_key(slot_id, &key);
        for key_index in &mut self.keys {
            key_index.invalidate();
        }

        trace!(slot = slot_id, size = data_size, reused = reuse.is_some(), "created record");
        Ok(SlotId(slot_id))
    }

    /// Reads the record at `slot` into `buf` and returns its size.
    ///
    /// Fails `EntryNotFound` for an unknown or non-live slot,
    /// `IndexCorrupt` when the data frame does not match the index entry,
    /// and `RecordTooLarge` when `buf` is smaller than the stored record.
    pub fn get_record(&mut self, slot: SlotId, buf: &mut [u8]) -> Result<usize> {
        let entry = self.live_slot(slot)?;

        let frame = self.read_frame(entry.data_offset as u64)?;
        if frame.kind != FrameKind::Data || frame.record_ref != entry.record_ref {
            return Err(StoreError::IndexCorrupt {
                slot: slot.0,
                reason: "data frame does not match index entry".to_string(),
            });
        }

        let size = frame.size_or_next as usize;
        if size > buf.len() {
            return Err(StoreError::RecordTooLarge {
                size: frame.size_or_next,
                available: buf.len() as u32,
            });
        }
        self.file.read(&mut buf[..size])?;
        Ok(size)
    }

    /// Reads the first record matching a (partial) key. Composition of
    /// [`Store::exist_record`] and [`Store::get_record`].
    pub fn get_record_by_key(
        &mut self,
        key: &mut SearchKey,
        buf: &mut [u8],
    ) -> Result<(SlotId, usize)> {
        let slot = self.exist_record(key)?;
        let size = self.get_record(slot, buf)?;
        Ok((slot, size))
    }

    /// Searches for a (partial) key and returns the first matching slot in
    /// key order, establishing the iteration for `get_next_*`.
    ///
    /// On a miss the insertion point is recorded in the key
    /// ([`SearchKey::insertion_point`]) and `EntryNotFound` is returned.
    pub fn exist_record(&mut self, key: &mut SearchKey) -> Result<SlotId> {
        let key_id = key.key_id() as usize;
        if key_id >= self.keys.len() {
            return Err(StoreError::InvalidKey);
        }
        if self.header.nr_of_records == 0 {
            key.index = u32::MAX;
            key.count = 0;
            return Err(StoreError::EntryNotFound);
        }
        if !key.converted {
            self.convert_key(key)?;
        }

        let key_index = &mut self.keys[key_id];
        key_index.ensure_sorted(&self.image);

        match key_index.search(&self.image, key.value()) {
            SearchOutcome::Found { slot, start, count } => {
                key.index = start;
                key.count = count;
                Ok(SlotId(slot))
            }
            SearchOutcome::NotFound { insertion } => {
                key.index = insertion;
                key.count = 0;
                Err(StoreError::EntryNotFound)
            }
        }
    }

    /// Number of records matched by the last search with this key.
    pub fn search_count(&self, key: &SearchKey) -> u32 {
        key.count()
    }

    /// Returns the next slot id of the iteration established by the last
    /// `exist_record` on this key. `NoRecord` if no selection is active,
    /// `EntryNotFound` once the selection is exhausted.
    pub fn get_next_slot(&mut self, key_id: u16) -> Result<SlotId> {
        let key_index = self
            .keys
            .get_mut(key_id as usize)
            .ok_or(StoreError::InvalidKey)?;
        if !key_index.has_selection() {
            return Err(StoreError::NoRecord { key_id });
        }
        match key_index.next() {
            Some(slot) => Ok(SlotId(slot)),
            None => Err(StoreError::EntryNotFound),
        }
    }

    /// Reads the next record of the iteration established by the last
    /// `exist_record` on this key.
    pub fn get_next_record(&mut self, key_id: u16, buf: &mut [u8]) -> Result<(SlotId, usize)> {
        let slot = self.get_next_slot(key_id)?;
        let size = self.get_record(slot, buf)?;
        Ok((slot, size))
    }

    /// Converts a search key into its order-preserving encoded form in
    /// place. Called implicitly by `exist_record` for unconverted keys.
    pub fn convert_key(&self, key: &mut SearchKey) -> Result<()> {
        let descriptor = self
            .descriptors
            .get(key.key_id() as usize)
            .ok_or(StoreError::InvalidKey)?;
        key.converted = false;
        codec::convert_search_key(descriptor, key.value_mut())?;
        key.converted = true;
        Ok(())
    }

    /// Deletes the record at `slot`, pushing the slot onto the deleted
    /// free list. The data region is kept and may be reused by a later
    /// create whose payload fits.
    pub fn delete_record(&mut self, slot: SlotId) -> Result<()> {
        self.ensure_writable()?;
        let mut entry = self.live_slot(slot)?;

        let frame = self.read_frame(entry.data_offset as u64)?;
        if frame.kind != FrameKind::Data || frame.record_ref != entry.record_ref {
            return Err(StoreError::IndexCorrupt {
                slot: slot.0,
                reason: "data frame does not match index entry".to_string(),
            });
        }

        // Flip the data frame id; size and span stay for the free list.
        let deleted = FrameHeader::new(
            FrameKind::DeletedData,
            frame.record_ref,
            frame.size_or_next,
            frame.next_offset,
        );
        self.file
            .write_at(entry.data_offset as u64, &deleted.to_bytes())?;

        entry.status = SlotStatus::Deleted(self.header.last_deleted_index);
        self.file.write_at(entry.offset as u64, &entry.to_bytes())?;

        let mut header = self.header.clone();
        header.nr_of_records -= 1;
        header.last_deleted_index = slot.0 as i32;
        self.write_header(&header)?;
        self.header = header;

        self.image.set_slot(slot.0, &entry);
        for key_index in &mut self.keys {
            key_index.invalidate();
        }

        trace!(slot = slot.0, "deleted record");
        Ok(())
    }

    /// Overwrites the record at `slot` in place.
    ///
    /// The new payload must fit within the slot's reserved data span
    /// (`RecordTooLarge` otherwise). Key arrays are re-sorted lazily when
    /// any key segment changed value.
    pub fn update_record(&mut self, slot: SlotId, record: &Record<'_>) -> Result<()> {
        self.ensure_writable()?;
        let mut entry = self.live_slot(slot)?;

        let frame = self.read_frame(entry.data_offset as u64)?;
        if frame.kind != FrameKind::Data || frame.record_ref != entry.record_ref {
            return Err(StoreError::IndexCorrupt {
                slot: slot.0,
                reason: "data frame does not match index entry".to_string(),
            });
        }

        let data_size = record.payload().len() as u32;
        let available = frame
            .next_offset
            .checked_sub(entry.data_offset + FRAME_HEADER_SIZE as u32)
            .ok_or_else(|| StoreError::IndexCorrupt {
                slot: slot.0,
                reason: "data frame span is negative".to_string(),
            })?;
        if data_size > available {
            return Err(StoreError::RecordTooLarge {
                size: data_size,
                available,
            });
        }

        let mut key = vec![0u8; self.header.total_key_size as usize];
        codec::build_record_key(&self.descriptors, record.bytes, &mut key)?;
        let key_changed = key != self.image.key_region(slot.0);

        let updated = FrameHeader::new(
            FrameKind::Data,
            frame.record_ref,
            data_size,
            frame.next_offset,
        );
        self.file
            .write_at(entry.data_offset as u64, &updated.to_bytes())?;
        self.file.write(record.payload())?;

        entry.data_size = data_size;
        self.file.write_at(entry.offset as u64, &entry.to_bytes())?;
        self.file.write(&key)?;

        self.image.set_slot(slot.0, &entry);
        self.image.set_key(slot.0, &key);
        if key_changed {
            for key_index in &mut self.keys {
                key_index.invalidate();
            }
        }

        trace!(slot = slot.0, size = data_size, key_changed, "updated record");
        Ok(())
    }

    /// Rebuilds this store into a new file with a new key schema,
    /// streaming every live record in slot-id order. The source file is
    /// left unchanged; deleted data regions are not carried over.
    pub fn rebuild(
        &mut self,
        new_path: impl AsRef<Path>,
        descriptors: &[KeyDescriptor],
        max_data_size: u32,
    ) -> Result<()> {
        if self.header.nr_of_records == 0 {
            return Err(StoreError::EmptyDatabase);
        }

        let reserved = self
            .header
            .nr_of_records
            .clamp(
                MIN_RESERVED_INDEX_RECORDS as u32,
                MAX_RESERVED_INDEX_RECORDS as u32,
            ) as u16;
        let mut target = Store::create(new_path.as_ref(), descriptors, reserved)?;

        let mut capacity = max_data_size.max(1);
        let mut buf = vec![0u8; capacity as usize];
        let mut moved = 0u32;

        for slot_id in 0..self.image.len() {
            let entry = self.image.slot(slot_id);
            if entry.status != SlotStatus::Live {
                continue;
            }
            if entry.data_size > capacity {
                if entry.data_size as u64 > MAX_ALLOCATION {
                    return Err(StoreError::MemoryAllocation {
                        requested: entry.data_size as u64,
                        max: MAX_ALLOCATION,
                    });
                }
                capacity = entry.data_size;
                buf.resize(capacity as usize, 0);
            }
            let size = self.get_record(SlotId(slot_id), &mut buf)?;
            target.create_record(&Record::new(&buf[..size]))?;
            moved += 1;
        }

        debug!(
            source = %self.path.display(),
            target = %new_path.as_ref().display(),
            records = moved,
            "rebuilt store"
        );
        target.close()
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(StoreError::InvalidParameters(
                "store is read-only".to_string(),
            ));
        }
        Ok(())
    }

    /// Looks up a slot id, requiring it to exist and be live.
    fn live_slot(&self, slot: SlotId) -> Result<IndexSlot> {
        if slot.0 >= self.image.len() {
            return Err(StoreError::EntryNotFound);
        }
        let entry = self.image.slot(slot.0);
        if !entry.status.is_live() {
            return Err(StoreError::EntryNotFound);
        }
        Ok(entry)
    }

    fn read_frame(&mut self, offset: u64) -> Result<FrameHeader> {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        self.file.read_at(offset, &mut buf)?;
        FrameHeader::from_bytes(&buf)
    }

    fn write_header(&mut self, header: &StoreHeader) -> Result<()> {
        self.file
            .write_at(FRAME_HEADER_SIZE as u64, &header.to_bytes())
    }

    /// Walks the deleted free list for the first slot whose data region
    /// fits `data_size` bytes, verifying each candidate's data frame.
    fn find_reusable_slot(&mut self, data_size: u32) -> Result<Option<ReusableSlot>> {
        let mut current = self.header.last_deleted_index;
        let mut predecessor: Option<u32> = None;
        let mut steps = 0u32;

        while current >= 0 {
            if steps > self.image.len() {
                return Err(StoreError::IndexCorrupt {
                    slot: current as u32,
                    reason: "deleted free list does not terminate".to_string(),
                });
            }
            steps += 1;

            let slot_id = current as u32;
            if slot_id >= self.image.len() {
                return Err(StoreError::IndexCorrupt {
                    slot: slot_id,
                    reason: "deleted free list points outside the index".to_string(),
                });
            }
            let entry = self.image.slot(slot_id);
            let SlotStatus::Deleted(prev) = entry.status else {
                return Err(StoreError::IndexCorrupt {
                    slot: slot_id,
                    reason: "deleted free list points at a non-deleted slot".to_string(),
                });
            };

            let frame = self.read_frame(entry.data_offset as u64)?;
            if frame.kind != FrameKind::DeletedData || frame.record_ref != entry.record_ref {
                return Err(StoreError::IndexCorrupt {
                    slot: slot_id,
                    reason: "deleted data frame does not match index entry".to_string(),
                });
            }

            if data_size <= frame.size_or_next {
                return Ok(Some(ReusableSlot {
                    slot: slot_id,
                    prev,
                    predecessor,
                    frame,
                }));
            }

            predecessor = Some(slot_id);
            current = prev;
        }

        Ok(None)
    }

    /// Appends a fresh reserved index block at the end of the data heap,
    /// back-patches the previous NEXT_INDEX sentinel, and grows the
    /// in-memory image. Called when a create consumed the last reserved
    /// slot.
    fn append_reserved_block(&mut self, header: &mut StoreHeader) -> Result<()> {
        let block_offset = header.next_free_data;
        let reserved = header.reserved_index_records;
        let entry_size = self.entry_size as u32;

        write_reserved_block(&mut self.file, block_offset, reserved, header.total_key_size)?;

        // The previous sentinel sits right after the old block's last
        // entry, which is the one this create just consumed.
        let sentinel_offset = header.next_free_index + entry_size;
        let sentinel = self.read_frame(sentinel_offset as u64)?;
        if sentinel.kind != FrameKind::NextIndex {
            return Err(StoreError::IndexCorrupt {
                slot: self.used_slots,
                reason: "expected next-index sentinel after index block".to_string(),
            });
        }
        let patched = FrameHeader::new(FrameKind::NextIndex, 0, block_offset, block_offset);
        self.file
            .write_at(sentinel_offset as u64, &patched.to_bytes())?;

        let first_entry = block_offset + FRAME_HEADER_SIZE as u32;
        header.next_free_index = first_entry;
        header.next_free_data =
            first_entry + reserved as u32 * entry_size + FRAME_HEADER_SIZE as u32;
        header.nr_of_index_records += reserved as u32;

        for i in 0..reserved as u32 {
            self.image.push_reserved(first_entry + i * entry_size)?;
        }

        debug!(
            block = block_offset,
            reserved,
            total = header.nr_of_index_records,
            "appended reserved index block"
        );
        Ok(())
    }
}

/// The result of a successful free-list walk.
#[derive(Debug, Clone, Copy)]
struct ReusableSlot {
    /// The deleted slot to reuse.
    slot: u32,
    /// Its stored previous-deleted pointer.
    prev: i32,
    /// The deleted slot pointing at it, if it is not the list head.
    predecessor: Option<u32>,
    /// The deleted data frame, verified on disk.
    frame: FrameHeader,
}

/// Writes one reserved index block at `block_offset`: an INDEX_BLOCK frame,
/// `reserved` zero-keyed reserved entries, and a NEXT_INDEX sentinel with no
/// successor yet.
fn write_reserved_block(
    file: &mut StoreFile,
    block_offset: u32,
    reserved: u16,
    total_key_size: u16,
) -> Result<()> {
    let entry_size = (INDEX_SLOT_SIZE + total_key_size as usize) as u32;
    let block_size = reserved as u32 * entry_size;
    let first_entry = block_offset + FRAME_HEADER_SIZE as u32;

    let frame = FrameHeader::new(
        FrameKind::IndexBlock,
        0,
        block_size,
        first_entry + block_size,
    );
    file.write_at(block_offset as u64, &frame.to_bytes())?;

    let zero_key = vec![0u8; total_key_size as usize];
    let mut entry_offset = first_entry;
    for _ in 0..reserved {
        file.write(&IndexSlot::reserved(entry_offset).to_bytes())?;
        file.write(&zero_key)?;
        entry_offset += entry_size;
    }

    let sentinel = FrameHeader::new(FrameKind::NextIndex, 0, 0, 0);
    file.write(&sentinel.to_bytes())?;
    Ok(())
}
