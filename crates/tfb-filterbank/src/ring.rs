//! Slot-addressed circular history.
//!
//! A [`SlotRing`] is one flat buffer divided into `slots` equal-length
//! slots. Slots are addressed through a [`SlotCursor`], which wraps modulo
//! the slot count. Both the per-channel sample histories of the polyphase
//! core and the per-channel spectrum history of the hybrid stage use it.
//!
//! Cursors live outside the rings: one cursor is shared by every channel
//! of a direction, so all channels see the same slot on a given call.

/// Position within a fixed number of slots, advancing modulo the slot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCursor {
    position: usize,
    len: usize,
}

impl SlotCursor {
    /// Cursor at slot 0 of `len` slots
    pub fn new(len: usize) -> Self {
        debug_assert!(len > 0);
        Self { position: 0, len }
    }

    /// Current slot index
    #[inline]
    pub fn position(self) -> usize {
        self.position
    }

    /// Number of slots the cursor wraps over
    #[inline]
    pub fn len(self) -> usize {
        self.len
    }

    /// Step forward one slot
    #[inline]
    pub fn advance(&mut self) {
        self.position += 1;
        if self.position == self.len {
            self.position = 0;
        }
    }

    /// Slot index `offset` slots ahead of the cursor
    #[inline]
    pub fn offset(self, offset: usize) -> usize {
        (self.position + offset) % self.len
    }
}

/// Fixed number of equal-length slots in one contiguous buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRing<T> {
    data: Vec<T>,
    slot_len: usize,
    slots: usize,
}

impl<T: Copy + Default> SlotRing<T> {
    /// Zero-initialised ring
    pub fn new(slots: usize, slot_len: usize) -> Self {
        Self {
            data: vec![T::default(); slots * slot_len],
            slot_len,
            slots,
        }
    }

    /// Number of slots
    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Length of each slot
    #[inline]
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Slot contents
    #[inline]
    pub fn slot(&self, index: usize) -> &[T] {
        let start = index * self.slot_len;
        &self.data[start..start + self.slot_len]
    }

    /// Mutable slot contents
    #[inline]
    pub fn slot_mut(&mut self, index: usize) -> &mut [T] {
        let start = index * self.slot_len;
        &mut self.data[start..start + self.slot_len]
    }

    /// Overwrite one slot. `src` must be exactly one slot long.
    #[inline]
    pub fn write_slot(&mut self, index: usize, src: &[T]) {
        self.slot_mut(index).copy_from_slice(src);
    }

    /// Every slot in order starting at the cursor, paired with its distance
    /// from the cursor.
    pub fn slots_from(&self, cursor: SlotCursor) -> impl Iterator<Item = (usize, &[T])> + '_ {
        debug_assert_eq!(cursor.len(), self.slots);
        (0..self.slots).map(move |k| (k, self.slot(cursor.offset(k))))
    }

    /// Reset contents to `T::default()` without reallocating
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }

    /// Whole buffer, slot 0 first
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}
