//! Two-bit chunk occupancy bitmaps and the per-zone free slot cache.
//!
//! Each chunk owns two consecutive bits in its zone's bitmap, addressed by
//! its *bit slot* (`chunk_number * 2`). Bit 0 means in use; bit 1 means the
//! chunk was used before (and therefore carries a canary) or is a canary
//! chunk. A free never-touched chunk is 00; an in-use chunk has bit 0 set
//! and bit 1 clear; a freed or canary chunk has bit 1 set.

use crate::config::BIT_SLOT_CACHE_SZ;
use crate::diag::fatal;
use crate::rand;

/// A chunk's position as the starting bit offset of its two-bit group.
pub type BitSlot = usize;

/// Sentinel for "no slot".
pub const BAD_SLOT: BitSlot = usize::MAX;

/// Bits per chunk in the occupancy encoding.
pub const BITS_PER_CHUNK: usize = 2;

/// The bitmap is scanned a 32-bit word at a time.
pub const BITS_PER_WORD: usize = 32;

/// A transient view over a zone's bitmap region. Constructed from the
/// unmasked region pointers each time the bitmap is needed, so the zone
/// header itself never holds a live bitmap pointer.
pub struct Bitmap {
    words: *mut u32,
    num_words: usize,
}

impl Bitmap {
    /// # Safety
    /// `start` must point to at least `size_bytes` of mapped bitmap memory
    /// and remain valid for the lifetime of the view.
    #[inline]
    pub unsafe fn from_region(start: *mut u8, size_bytes: usize) -> Bitmap {
        Bitmap {
            words: start as *mut u32,
            num_words: size_bytes / (BITS_PER_WORD / 8),
        }
    }

    #[inline]
    pub fn num_words(&self) -> usize {
        self.num_words
    }

    /// Whether `slot` falls inside the words this view covers. Bitmap sizes
    /// round down to whole bytes, so the last few chunks of an oddly sized
    /// zone may be uncovered; those chunks are never handed out.
    #[inline]
    pub fn covers(&self, slot: BitSlot) -> bool {
        slot / BITS_PER_WORD < self.num_words
    }

    #[inline]
    fn load(&self, word: usize) -> u32 {
        debug_assert!(word < self.num_words);
        unsafe { self.words.add(word).read() }
    }

    #[inline]
    fn store(&self, word: usize, value: u32) {
        debug_assert!(word < self.num_words);
        unsafe { self.words.add(word).write(value) }
    }

    /// Read the two-bit group at `slot` as `(in_use, was_used)`.
    #[inline]
    pub fn get(&self, slot: BitSlot) -> (bool, bool) {
        let word = self.load(slot / BITS_PER_WORD);
        let bit = slot % BITS_PER_WORD;
        (word & (1 << bit) != 0, word & (1 << (bit + 1)) != 0)
    }

    #[inline]
    pub fn in_use(&self, slot: BitSlot) -> bool {
        self.get(slot).0
    }

    #[inline]
    pub fn was_used(&self, slot: BitSlot) -> bool {
        self.get(slot).1
    }

    /// Write the two-bit group at `slot` in one read-modify-write.
    #[inline]
    pub fn set(&self, slot: BitSlot, in_use: bool, was_used: bool) {
        let idx = slot / BITS_PER_WORD;
        let bit = slot % BITS_PER_WORD;
        let mut word = self.load(idx);
        word &= !(0b11 << bit);
        word |= (in_use as u32) << bit;
        word |= (was_used as u32) << (bit + 1);
        self.store(idx, word);
    }

    /// Walk the bitmap a word at a time; a zero word means 16 consecutive
    /// untouched chunks, so return its first bit slot.
    pub fn scan_free_fast(&self) -> Option<BitSlot> {
        for i in 0..self.num_words {
            if self.load(i) == 0 {
                return Some(i * BITS_PER_WORD);
            }
        }
        None
    }

    /// Walk the bitmap two bits at a time and return the first slot whose
    /// in-use bit is clear. Slow in a heavily used zone.
    pub fn scan_free_slow(&self) -> Option<BitSlot> {
        for i in 0..self.num_words {
            let word = self.load(i);
            for j in (0..BITS_PER_WORD).step_by(BITS_PER_CHUNK) {
                if word & (1 << j) == 0 {
                    return Some(i * BITS_PER_WORD + j);
                }
            }
        }
        None
    }
}

/// A fixed ring of pre-computed free bit slots.
///
/// Refilled by a bounded scan from a random start, consumed by allocations,
/// fed by frees. The randomized refill keeps allocation order from biasing
/// toward the front of the user region.
#[repr(C)]
pub struct FreeSlotCache {
    slots: [BitSlot; BIT_SLOT_CACHE_SZ],
    /// Next append position.
    write_idx: usize,
    /// Next slot to hand out.
    read_idx: usize,
}

impl FreeSlotCache {
    pub const fn new() -> Self {
        FreeSlotCache {
            slots: [BAD_SLOT; BIT_SLOT_CACHE_SZ],
            write_idx: 0,
            read_idx: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_idx == self.write_idx
    }

    /// Reset the cache and refill it with free slots found by scanning
    /// forward from a random word within the first quarter of the bitmap.
    /// There is no guarantee the scan finds any free slots.
    pub fn refill(&mut self, bm: &Bitmap) {
        self.slots = [BAD_SLOT; BIT_SLOT_CACHE_SZ];
        self.write_idx = 0;
        self.read_idx = 0;

        let num_words = bm.num_words();
        if num_words == 0 {
            return;
        }

        let mut word = (rand::weak_u64() as usize % num_words) / 4;
        while word < num_words {
            for j in (0..BITS_PER_WORD).step_by(BITS_PER_CHUNK) {
                if self.write_idx >= BIT_SLOT_CACHE_SZ {
                    return;
                }
                let slot = word * BITS_PER_WORD + j;
                if !bm.in_use(slot) {
                    self.slots[self.write_idx] = slot;
                    self.write_idx += 1;
                }
            }
            word += 1;
        }
    }

    /// Hand out the slot at the read index, overwriting the entry with the
    /// sentinel and advancing. Returns `None` when the cache is exhausted
    /// or its indices are inconsistent.
    pub fn pop(&mut self) -> Option<BitSlot> {
        if self.read_idx >= BIT_SLOT_CACHE_SZ || self.read_idx > self.write_idx {
            return None;
        }
        let slot = self.slots[self.read_idx];
        self.slots[self.read_idx] = BAD_SLOT;
        self.read_idx += 1;
        if slot == BAD_SLOT {
            None
        } else {
            Some(slot)
        }
    }

    /// Append a freed slot. An entry already holding this slot means the
    /// cache was corrupted into handing out an in-use chunk, so abort.
    /// A full cache drops the insert; the slot is found by a later scan.
    pub fn push(&mut self, slot: BitSlot, zone_index: usize) {
        for i in self.read_idx..BIT_SLOT_CACHE_SZ {
            if self.slots[i] == slot {
                fatal!(
                    "zone[{}] free slot cache already holds bit slot {}",
                    zone_index,
                    slot
                );
            }
        }

        if self.write_idx >= BIT_SLOT_CACHE_SZ {
            return;
        }
        self.slots[self.write_idx] = slot;
        self.write_idx += 1;
    }
}

impl Default for FreeSlotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bitmap(words: usize) -> (Vec<u32>, Bitmap) {
        let mut storage = vec![0u32; words];
        let bm = unsafe { Bitmap::from_region(storage.as_mut_ptr() as *mut u8, words * 4) };
        (storage, bm)
    }

    #[test]
    fn two_bit_states() {
        let (_s, bm) = make_bitmap(4);

        assert_eq!(bm.get(0), (false, false));

        bm.set(0, true, false);
        assert_eq!(bm.get(0), (true, false));
        assert!(bm.in_use(0));
        assert!(!bm.was_used(0));

        bm.set(0, false, true);
        assert_eq!(bm.get(0), (false, true));

        bm.set(0, true, true);
        assert_eq!(bm.get(0), (true, true));

        // Neighboring groups are untouched
        assert_eq!(bm.get(2), (false, false));
        assert_eq!(bm.get(30), (false, false));
    }

    #[test]
    fn fast_scan_skips_nonzero_words() {
        let (_s, bm) = make_bitmap(3);
        bm.set(4, true, false);
        assert_eq!(bm.scan_free_fast(), Some(32));
    }

    #[test]
    fn slow_scan_finds_hole_within_word() {
        let (_s, bm) = make_bitmap(2);
        for j in (0..32).step_by(2) {
            bm.set(j, true, false);
        }
        bm.set(6, false, true);
        assert_eq!(bm.scan_free_slow(), Some(6));
    }

    #[test]
    fn slow_scan_exhausted() {
        let (_s, bm) = make_bitmap(1);
        for j in (0..32).step_by(2) {
            bm.set(j, true, false);
        }
        assert_eq!(bm.scan_free_slow(), None);
        assert_eq!(bm.scan_free_fast(), None);
    }

    #[test]
    fn cache_refill_and_pop() {
        let (_s, bm) = make_bitmap(8);
        let mut cache = FreeSlotCache::new();
        cache.refill(&bm);
        assert!(!cache.is_empty());

        let mut seen = std::collections::HashSet::new();
        while let Some(slot) = cache.pop() {
            assert_eq!(slot % 2, 0);
            assert!(bm.covers(slot));
            assert!(seen.insert(slot), "cache produced duplicate slot {}", slot);
        }
    }

    #[test]
    fn cache_refill_skips_in_use() {
        let (_s, bm) = make_bitmap(2);
        for j in (0..32).step_by(2) {
            bm.set(j, true, false);
        }
        let mut cache = FreeSlotCache::new();
        cache.refill(&bm);
        while let Some(slot) = cache.pop() {
            assert!(slot >= 32, "slot {} belongs to the in-use word", slot);
        }
    }

    #[test]
    fn push_then_pop_round_trips() {
        let mut cache = FreeSlotCache::new();
        // An empty never-refilled cache is empty by construction
        assert!(cache.is_empty());
        cache.push(10, 0);
        cache.push(44, 0);
        assert!(!cache.is_empty());
        assert_eq!(cache.pop(), Some(10));
        assert_eq!(cache.pop(), Some(44));
        assert!(cache.is_empty());
    }

    #[test]
    fn push_drops_when_full() {
        let mut cache = FreeSlotCache::new();
        for i in 0..BIT_SLOT_CACHE_SZ {
            cache.push(i * 2, 0);
        }
        // One past capacity is silently dropped
        cache.push(BIT_SLOT_CACHE_SZ * 2, 0);
        let mut count = 0;
        while cache.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, BIT_SLOT_CACHE_SZ);
    }
}
