//! Zones: the unit of size-classed backing storage.
//!
//! A zone owns two mappings. The bitmap mapping holds the two-bit occupancy
//! state for every chunk, and the user mapping holds `ZONE_USER_SIZE` bytes
//! of chunk storage. Both are bracketed by inaccessible guard pages so any
//! linear overflow or underflow out of the region faults immediately.
//!
//! The four region pointers are stored in the header XORed with a per-zone
//! mask drawn from the OS entropy source. [`Zone::regions`] returns an
//! unmasked copy on the stack for the duration of one operation; the header
//! itself never holds a cleartext pointer, so there is no re-mask step that
//! a control path could miss.

use core::ptr;

use crate::bitmap::{Bitmap, BitSlot, FreeSlotCache, BAD_SLOT, BITS_PER_CHUNK};
use crate::canary;
use crate::config::{
    ALIGNMENT, CANARY_COUNT_DIV, MAX_DEFAULT_ZONE_SZ, ZONE_USER_SIZE,
};
use crate::platform::{self, Advice};
use crate::rand;
use crate::util::align_up;

/// Unmasked copies of a zone's region pointers, valid only while the root
/// lock is held.
#[derive(Clone, Copy)]
pub struct Regions {
    pub bitmap_start: *mut u8,
    pub bitmap_end: *mut u8,
    pub user_start: *mut u8,
    pub user_end: *mut u8,
}

/// A size-classed region and its metadata. Lives in the root's zone table;
/// an all-zero header is a vacant entry.
#[repr(C)]
pub struct Zone {
    /// Stable position in the root's zone table.
    pub index: usize,
    /// Size of every chunk in this zone, a multiple of [`ALIGNMENT`].
    pub chunk_size: usize,
    /// Bytes of occupancy bitmap, two bits per chunk.
    pub bitmap_size: usize,
    /// Created by the allocator for a default size class, as opposed to a
    /// caller-owned special zone. Only internally managed zones serve
    /// ordinary allocation requests, and only their pages are ever
    /// returned to the OS.
    pub internally_managed: bool,
    /// Hint that the last exhaustive scan found no free slot.
    pub is_full: bool,

    canary_secret: u64,
    pointer_mask: usize,
    masked_bitmap_start: usize,
    masked_bitmap_end: usize,
    masked_user_start: usize,
    masked_user_end: usize,

    bitmap_guard_below: *mut u8,
    user_guard_below: *mut u8,
    bitmap_map_len: usize,
    user_map_len: usize,

    pub cache: FreeSlotCache,
    /// The slot the next allocation from this zone will use, or
    /// [`BAD_SLOT`] when none is primed.
    pub next_free_slot: BitSlot,
}

impl Zone {
    /// Initialize a vacant table entry as a live zone of the given chunk
    /// size. Maps and guards both regions, draws the zone secrets, seeds
    /// canary chunks, fills the free slot cache, and primes the first slot.
    ///
    /// # Safety
    /// `self` must be a vacant (zeroed) zone table entry. Must run under
    /// the root lock or during single-threaded initialization.
    pub unsafe fn init(&mut self, index: usize, size: usize, internal: bool, page_size: usize) {
        let chunk_size = align_up(size, ALIGNMENT);

        self.index = index;
        self.chunk_size = chunk_size;
        self.internally_managed = internal;
        self.is_full = false;

        let chunk_count = ZONE_USER_SIZE / chunk_size;
        self.bitmap_size = chunk_count * BITS_PER_CHUNK / 8;

        self.bitmap_map_len = align_up(self.bitmap_size + 2 * page_size, page_size);
        let base = platform::map_rw(self.bitmap_size + 2 * page_size);
        self.bitmap_guard_below = base;
        let bitmap_start = base.add(page_size);
        let bitmap_guard_above = base.add(self.bitmap_map_len - page_size);

        platform::protect_none(base, page_size);
        platform::advise(base, page_size, Advice::DontNeed);
        platform::protect_none(bitmap_guard_above, page_size);
        platform::advise(bitmap_guard_above, page_size, Advice::DontNeed);

        // Bitmap pages are touched often and mostly in order
        platform::advise(bitmap_start, self.bitmap_size, Advice::WillNeed);
        platform::advise(bitmap_start, self.bitmap_size, Advice::Sequential);

        self.user_map_len = align_up(ZONE_USER_SIZE + 2 * page_size, page_size);
        let base = platform::map_rw(ZONE_USER_SIZE + 2 * page_size);
        self.user_guard_below = base;
        let user_start = base.add(page_size);
        let user_guard_above = base.add(self.user_map_len - page_size);

        platform::protect_none(base, page_size);
        platform::advise(base, page_size, Advice::DontNeed);
        platform::protect_none(user_guard_above, page_size);
        platform::advise(user_guard_above, page_size, Advice::DontNeed);

        // User pages are touched in no predictable order
        platform::advise(user_start, ZONE_USER_SIZE, Advice::WillNeed);
        platform::advise(user_start, ZONE_USER_SIZE, Advice::Random);

        self.canary_secret = rand::secret_u64();
        self.pointer_mask = rand::secret_u64() as usize;
        self.set_regions(Regions {
            bitmap_start,
            bitmap_end: bitmap_start.add(self.bitmap_size),
            user_start,
            user_end: user_start.add(ZONE_USER_SIZE),
        });

        self.seed_canary_chunks();

        let regions = self.regions();
        let bm = Bitmap::from_region(regions.bitmap_start, self.bitmap_size);
        self.cache.refill(&bm);
        self.next_free_slot = self.cache.pop().unwrap_or(BAD_SLOT);
    }

    /// Number of chunks backed by the user region.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        ZONE_USER_SIZE / self.chunk_size
    }

    /// Unmask the region pointers into a stack copy.
    #[inline]
    pub fn regions(&self) -> Regions {
        let mask = self.pointer_mask;
        Regions {
            bitmap_start: (self.masked_bitmap_start ^ mask) as *mut u8,
            bitmap_end: (self.masked_bitmap_end ^ mask) as *mut u8,
            user_start: (self.masked_user_start ^ mask) as *mut u8,
            user_end: (self.masked_user_end ^ mask) as *mut u8,
        }
    }

    fn set_regions(&mut self, regions: Regions) {
        let mask = self.pointer_mask;
        self.masked_bitmap_start = regions.bitmap_start as usize ^ mask;
        self.masked_bitmap_end = regions.bitmap_end as usize ^ mask;
        self.masked_user_start = regions.user_start as usize ^ mask;
        self.masked_user_end = regions.user_end as usize ^ mask;
    }

    /// Whether `p` lies inside this zone's user region.
    #[inline]
    pub fn owns(&self, p: *const u8) -> bool {
        let regions = self.regions();
        regions.user_start as usize <= p as usize && (p as usize) < regions.user_end as usize
    }

    /// The chunk address for a bit slot.
    #[inline]
    pub fn slot_to_chunk(&self, regions: &Regions, slot: BitSlot) -> *mut u8 {
        unsafe {
            regions
                .user_start
                .add((slot / BITS_PER_CHUNK) * self.chunk_size)
        }
    }

    /// Write this zone's canary at both ends of the chunk at `p`.
    ///
    /// # Safety
    /// `p` must point at a chunk inside this zone's user region.
    pub unsafe fn write_canary(&self, p: *mut u8) {
        canary::write(self.canary_secret, self.chunk_size, p);
    }

    /// Verify the canary of the chunk at `p`, aborting on mismatch.
    ///
    /// # Safety
    /// `p` must point at a chunk inside this zone's user region.
    pub unsafe fn verify_canary(&self, p: *const u8) {
        canary::verify(self.canary_secret, self.chunk_size, self.index, p);
    }

    /// Verify the canary of the chunk at `p` without aborting.
    ///
    /// # Safety
    /// `p` must point at a chunk inside this zone's user region.
    pub unsafe fn verify_canary_silent(&self, p: *const u8) -> bool {
        canary::verify_silent(self.canary_secret, self.chunk_size, p)
    }

    /// Mark roughly `1 / CANARY_COUNT_DIV` of the chunks, chosen uniformly
    /// at random, as permanent canary chunks. Only zones within the default
    /// size range are seeded; repeated draws landing on the same chunk are
    /// acceptable.
    unsafe fn seed_canary_chunks(&mut self) {
        if self.chunk_size > MAX_DEFAULT_ZONE_SZ {
            return;
        }

        let regions = self.regions();
        let bm = Bitmap::from_region(regions.bitmap_start, self.bitmap_size);
        let covered_chunks = self
            .chunk_count()
            .min(bm.num_words() * crate::bitmap::BITS_PER_WORD / BITS_PER_CHUNK);
        if covered_chunks == 0 {
            return;
        }

        let canary_count = self.chunk_count() / CANARY_COUNT_DIV;
        for _ in 0..canary_count {
            let chunk = rand::weak_u64() as usize % covered_chunks;
            let slot = chunk * BITS_PER_CHUNK;
            bm.set(slot, true, true);
            self.write_canary(self.slot_to_chunk(&regions, slot));
        }
    }

    /// Check the canary of every chunk whose was-used bit is set: seeded
    /// canary chunks, permanently freed chunks, and ordinary freed chunks
    /// all carry one. Aborts on the first mismatch.
    ///
    /// # Safety
    /// Must run under the root lock on a live zone.
    pub unsafe fn verify(&self) {
        let regions = self.regions();
        let bm = Bitmap::from_region(regions.bitmap_start, self.bitmap_size);

        for word in 0..bm.num_words() {
            for j in (0..crate::bitmap::BITS_PER_WORD).step_by(BITS_PER_CHUNK) {
                let slot = word * crate::bitmap::BITS_PER_WORD + j;
                if bm.was_used(slot) {
                    self.verify_canary(self.slot_to_chunk(&regions, slot));
                }
            }
        }
    }

    /// Tear the zone down.
    ///
    /// Internally managed zones return both mappings (guards included) to
    /// the OS and zero the header so stale handles fault cleanly. External
    /// zones must never have their pages reused, so both regions are made
    /// inaccessible instead and the header is left in place.
    ///
    /// # Safety
    /// Must run under the root lock (or during teardown). No pointer into
    /// this zone may be used afterwards.
    pub unsafe fn destroy(&mut self) {
        if self.internally_managed {
            platform::unmap(self.bitmap_guard_below, self.bitmap_map_len);
            platform::unmap(self.user_guard_below, self.user_map_len);
            ptr::write_bytes(self as *mut Zone as *mut u8, 0, core::mem::size_of::<Zone>());
        } else {
            let regions = self.regions();
            platform::protect_none(regions.bitmap_start, self.bitmap_size);
            platform::protect_none(regions.user_start, ZONE_USER_SIZE);
        }
    }
}
