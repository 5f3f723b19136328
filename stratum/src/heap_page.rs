//! The slotted heap page: a slot-usage bitmap followed by fixed-size tuple
//! slots, serializing to exactly one page worth of bytes.

use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::schema::Schema;
use crate::tuple::Tuple;
use crate::{PageId, RecordId};

/// In-memory form of one heap-file page.
///
/// The on-disk layout is `ceil(num_slots / 8)` header bytes (one bit per
/// slot, 1 = occupied, bit `i` of byte `i / 8`), then `num_slots` tuple
/// slots of `schema.byte_size()` bytes each (zeroed when empty), then zero
/// padding up to the page size. Parsing the bytes produced by
/// [`serialize`] yields an identical page, byte for byte.
///
/// Alongside the live contents the page keeps a frozen byte snapshot taken
/// at parse time and refreshed at commit, used as the before-image for log
/// records and recovery.
///
/// [`serialize`]: HeapPage::serialize
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    schema: Arc<Schema>,
    page_size: usize,
    num_slots: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Tuple slots that fit in one page: each slot costs its tuple bytes
    /// plus one header bit.
    pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// A page with an all-zero bitmap and no tuples, as written when a heap
    /// file grows.
    pub fn empty(pid: PageId, schema: Arc<Schema>, page_size: usize) -> Self {
        let num_slots = Self::slots_per_page(page_size, schema.byte_size());
        Self {
            pid,
            schema,
            page_size,
            num_slots,
            header: vec![0; Self::header_size(num_slots)],
            tuples: vec![None; num_slots],
            before_image: vec![0; page_size],
        }
    }

    /// Parses one page worth of bytes read from a heap file. The raw bytes
    /// become the page's before-image.
    pub fn parse(pid: PageId, schema: Arc<Schema>, page_size: usize, data: &[u8]) -> Result<Self> {
        if data.len() != page_size {
            return Err(StorageError::CorruptPage {
                page: pid,
                reason: format!("expected {page_size} bytes, got {}", data.len()),
            });
        }
        let tuple_size = schema.byte_size();
        let num_slots = Self::slots_per_page(page_size, tuple_size);
        let header_size = Self::header_size(num_slots);

        let header = data[..header_size].to_vec();
        let mut page = Self {
            pid,
            schema: schema.clone(),
            page_size,
            num_slots,
            header,
            tuples: vec![None; num_slots],
            before_image: data.to_vec(),
        };

        for slot in 0..num_slots {
            if !page.is_slot_used(slot) {
                continue;
            }
            let start = header_size + slot * tuple_size;
            let rid = RecordId::new(pid, slot as u16);
            let tuple = Tuple::parse(schema.clone(), rid, &data[start..start + tuple_size])?;
            page.tuples[slot] = Some(tuple);
        }
        Ok(page)
    }

    /// Serializes the page to exactly `page_size` bytes: header, slots
    /// (zeroed when empty), trailing zero padding.
    pub fn serialize(&self) -> Vec<u8> {
        let tuple_size = self.schema.byte_size();
        let mut out = Vec::with_capacity(self.page_size);
        out.extend_from_slice(&self.header);
        for slot in 0..self.num_slots {
            match &self.tuples[slot] {
                Some(tuple) if self.is_slot_used(slot) => tuple.serialize_into(&mut out),
                _ => out.resize(out.len() + tuple_size, 0),
            }
        }
        out.resize(self.page_size, 0);
        out
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        (self.header[slot / 8] >> (slot % 8)) & 1 == 1
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn empty_slot_count(&self) -> usize {
        (0..self.num_slots).filter(|&s| !self.is_slot_used(s)).count()
    }

    /// Places `tuple` in the lowest-numbered free slot and assigns its
    /// record id.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId> {
        if *tuple.schema().as_ref() != *self.schema {
            return Err(StorageError::SchemaMismatch);
        }
        let slot = (0..self.num_slots)
            .find(|&s| !self.is_slot_used(s))
            .ok_or(StorageError::PageFull { page: self.pid })?;
        let rid = RecordId::new(self.pid, slot as u16);
        tuple.set_record_id(rid);
        self.tuples[slot] = Some(tuple);
        self.mark_slot_used(slot, true);
        Ok(rid)
    }

    /// Clears the slot named by `tuple`'s record id. Fails if the slot is
    /// empty or holds a tuple with different contents.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(StorageError::TupleNotOnPage { page: self.pid })?;
        let slot = rid.slot as usize;
        if rid.page != self.pid || slot >= self.num_slots || !self.is_slot_used(slot) {
            return Err(StorageError::TupleNotOnPage { page: self.pid });
        }
        if self.tuples[slot].as_ref() != Some(tuple) {
            return Err(StorageError::TupleNotOnPage { page: self.pid });
        }
        self.mark_slot_used(slot, false);
        self.tuples[slot] = None;
        Ok(())
    }

    /// Iterates over occupied slots in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|t| t.as_ref())
    }

    /// The byte content of this page as of its last parse or commit.
    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Freezes the current contents as the new before-image. Called once a
    /// transaction's changes to this page reach stable storage.
    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }
}
