//! Slot table backing a [`BufferQueue`](super::BufferQueue).
//!
//! One slot per allocated buffer, keyed by sequence number. The free and
//! dirty lists hold sequence numbers only; the slot map owns everything else.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use super::fence::SyncFence;
use super::surface_buffer::SharedBuffer;
use super::types::{
    BufferRequestConfig, HdrMetaData, HdrMetaDataType, HdrMetadataKey, PresentTimestamp,
    ScalingMode,
};
use crate::util::geometry::Rect;

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    Free,
    /// Held by the producer, not yet flushed
    Requested,
    /// Flushed, waiting for the consumer
    Queued,
    /// Held by the consumer
    Acquired,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufferState::Free => "0 <released>",
            BufferState::Requested => "1 <requested>",
            BufferState::Queued => "2 <flushed>",
            BufferState::Acquired => "3 <acquired>",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct BufferSlot {
    pub buffer: SharedBuffer,
    pub state: BufferState,
    /// Discard the buffer the next time it comes back instead of recycling it
    pub is_deleting: bool,
    pub config: BufferRequestConfig,
    pub fence: Arc<SyncFence>,
    pub timestamp: i64,
    pub damage: Rect,
    pub scaling_mode: ScalingMode,
    pub hdr_metadata_type: HdrMetaDataType,
    pub metadata: Vec<HdrMetaData>,
    pub metadata_key: HdrMetadataKey,
    pub metadata_set: Vec<u8>,
    pub present_timestamp: PresentTimestamp,
}

impl BufferSlot {
    pub fn new(buffer: SharedBuffer, state: BufferState, config: BufferRequestConfig) -> Self {
        Self {
            buffer,
            state,
            is_deleting: false,
            config,
            fence: SyncFence::invalid(),
            timestamp: 0,
            damage: Rect::default(),
            scaling_mode: ScalingMode::default(),
            hdr_metadata_type: HdrMetaDataType::default(),
            metadata: Vec::new(),
            metadata_key: HdrMetadataKey::default(),
            metadata_set: Vec::new(),
            present_timestamp: PresentTimestamp::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SlotTable {
    slots: BTreeMap<u32, BufferSlot>,
    free: VecDeque<u32>,
    dirty: VecDeque<u32>,
    /// Sequences discarded since the producer last heard about it
    deleting: Vec<u32>,
}

impl SlotTable {
    pub fn used(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.slots.contains_key(&sequence)
    }

    pub fn get(&self, sequence: u32) -> Option<&BufferSlot> {
        self.slots.get(&sequence)
    }

    pub fn get_mut(&mut self, sequence: u32) -> Option<&mut BufferSlot> {
        self.slots.get_mut(&sequence)
    }

    pub fn first(&self) -> Option<u32> {
        self.slots.keys().next().copied()
    }

    pub fn sequences(&self) -> Vec<u32> {
        self.slots.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &BufferSlot)> {
        self.slots.iter()
    }

    pub fn insert(&mut self, sequence: u32, slot: BufferSlot) {
        self.slots.insert(sequence, slot);
    }

    /// Pop a free sequence, preferring one whose cached config equals `config`.
    pub fn pop_free(&mut self, config: &BufferRequestConfig) -> Option<u32> {
        let matching = self
            .free
            .iter()
            .position(|seq| self.slots.get(seq).is_some_and(|slot| slot.config == *config));
        match matching {
            Some(idx) => self.free.remove(idx),
            None => self.free.pop_front(),
        }
    }

    pub fn push_free(&mut self, sequence: u32) {
        self.free.push_back(sequence);
    }

    pub fn pop_dirty(&mut self) -> Option<u32> {
        self.dirty.pop_front()
    }

    pub fn push_dirty(&mut self, sequence: u32) {
        self.dirty.push_back(sequence);
    }

    /// Remove a slot and remember its sequence for the next request reply.
    ///
    /// The sequence must not sit on the free or dirty list any more.
    pub fn remove(&mut self, sequence: u32) -> Option<BufferSlot> {
        let slot = self.slots.remove(&sequence)?;
        self.deleting.push(sequence);
        Some(slot)
    }

    /// Remove a slot without reporting it through the deletion list.
    pub fn detach(&mut self, sequence: u32) -> Option<BufferSlot> {
        self.slots.remove(&sequence)
    }

    pub fn take_deleting(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.deleting)
    }

    /// Drop free slots from the front of the free list, up to `count`.
    pub fn evict_free(&mut self, count: usize) -> Vec<u32> {
        let mut evicted = Vec::new();
        while evicted.len() < count {
            let Some(sequence) = self.free.pop_front() else {
                break;
            };
            if self.remove(sequence).is_some() {
                evicted.push(sequence);
            }
        }
        evicted
    }

    /// Flag up to `count` busy slots for lazy deletion. Returns how many were flagged.
    pub fn mark_deleting(&mut self, count: usize) -> usize {
        let mut marked = 0;
        for slot in self.slots.values_mut() {
            if marked >= count {
                break;
            }
            if slot.state != BufferState::Free && !slot.is_deleting {
                slot.is_deleting = true;
                marked += 1;
            }
        }
        marked
    }

    /// Drop everything. Returns the sequences that were cached.
    pub fn clear(&mut self) -> Vec<u32> {
        let sequences = self.sequences();
        self.slots.clear();
        self.free.clear();
        self.dirty.clear();
        self.deleting.clear();
        sequences
    }

    pub fn total_size(&self) -> u64 {
        self.slots.values().map(|slot| slot.buffer.size() as u64).sum()
    }
}
