//! The allocator front end: find-fit, allocate, free, and lookup over the
//! root's zone table. Every function here runs with the root lock held.

use core::ptr;

use crate::bitmap::{Bitmap, BAD_SLOT, BITS_PER_CHUNK, BITS_PER_WORD};
use crate::config::{
    ALIGNMENT, DEFAULT_ZONE_SIZES, MAX_ZONES, OVERSIZE_CHECK_MIN, POISON_BYTE, WASTED_MULTIPLIER,
};
use crate::diag::fatal;
use crate::root::Root;
use crate::util::is_aligned;
use crate::zone::Zone;

/// Create a zone of the given chunk size in the next vacant table entry.
/// Aborts when the table is full. Returns the new zone's index.
///
/// # Safety
/// Must run under the root lock or during single-threaded initialization.
pub(crate) unsafe fn new_zone(root: &mut Root, size: usize, internal: bool) -> usize {
    if root.zones_used >= MAX_ZONES {
        fatal!(
            "cannot create another zone, all {} table entries are in use",
            MAX_ZONES
        );
    }

    let index = root.zones_used;
    let page_size = root.system_page_size;
    root.zones[index].init(index, size, internal, page_size);
    root.zones_used += 1;
    index
}

/// Decide whether `zone` can serve a request of `size` bytes, priming
/// `next_free_slot` when it can.
///
/// Rejects grossly oversized zones for large requests so a right-sized zone
/// gets created instead, then tries the free slot cache (refilling it if
/// empty), the word-at-a-time scan, and finally the bit-by-bit scan. A zone
/// that fails every search is marked full.
unsafe fn is_zone_usable(zone: &mut Zone, size: usize) -> bool {
    if zone.next_free_slot != BAD_SLOT {
        return true;
    }

    if zone.chunk_size >= size.saturating_mul(WASTED_MULTIPLIER) && size > OVERSIZE_CHECK_MIN {
        return false;
    }

    let regions = zone.regions();
    let bm = Bitmap::from_region(regions.bitmap_start, zone.bitmap_size);

    if zone.cache.is_empty() {
        zone.cache.refill(&bm);
    }

    if let Some(slot) = zone.cache.pop() {
        zone.next_free_slot = slot;
        return true;
    }

    if let Some(slot) = bm.scan_free_fast() {
        zone.next_free_slot = slot;
        return true;
    }

    if let Some(slot) = bm.scan_free_slow() {
        zone.next_free_slot = slot;
        return true;
    }

    zone.is_full = true;
    false
}

/// Find a zone that can serve `size` bytes, priming it. Linear scan over
/// the table; zones that are too small, caller-owned, or full are skipped.
unsafe fn find_zone_fit(root: &mut Root, size: usize) -> Option<usize> {
    for i in 0..root.zones_used {
        let zone = &mut root.zones[i];

        if zone.chunk_size < size || !zone.internally_managed || zone.is_full {
            continue;
        }

        if is_zone_usable(zone, size) {
            return Some(i);
        }
    }

    None
}

/// Find the zone whose user region contains `p`. Freeing or sizing a
/// pointer this allocator never produced is a caller bug and aborts.
fn find_zone_range(root: &Root, p: *const u8) -> usize {
    for i in 0..root.zones_used {
        if root.zones[i].owns(p) {
            return i;
        }
    }
    fatal!("pointer {:p} was not allocated from any zone", p);
}

/// Allocate a chunk of at least `size` bytes. Never returns null: an
/// unservable request aborts.
///
/// # Safety
/// Must run under the root lock.
pub(crate) unsafe fn alloc(root: &mut Root, size: usize) -> *mut u8 {
    let zone_idx = match find_zone_fit(root, size) {
        Some(i) => i,
        None => {
            // No existing zone fits. All allocations stay word-aligned by
            // only creating zones of default class sizes, or of the
            // aligned request when it exceeds every class.
            let mut chunk_size = size;
            for &class in DEFAULT_ZONE_SIZES.iter() {
                if size <= class {
                    chunk_size = class;
                    break;
                }
            }
            new_zone(root, chunk_size, true)
        }
    };

    let zone = &mut root.zones[zone_idx];

    let slot = zone.next_free_slot;
    if slot == BAD_SLOT {
        fatal!(
            "zone[{}] selected for a {} byte request has no free bit slot",
            zone.index,
            size
        );
    }
    zone.next_free_slot = BAD_SLOT;

    let regions = zone.regions();
    let p = zone.slot_to_chunk(&regions, slot);

    if (p as usize) + zone.chunk_size > regions.user_end as usize {
        fatal!(
            "zone[{}] bit slot {} maps chunk {:p} outside the user region {:p}..{:p}",
            zone.index,
            slot,
            p,
            regions.user_start,
            regions.user_end
        );
    }

    let bm = Bitmap::from_region(regions.bitmap_start, zone.bitmap_size);
    let (in_use, was_used) = bm.get(slot);

    if in_use {
        fatal!(
            "zone[{}] bit slot {} for chunk {:p} is already marked in use",
            zone.index,
            slot,
            p
        );
    }

    // A previously freed chunk carries a canary. Verify it survived, then
    // clear both copies so the caller gets plain uninitialized memory.
    if was_used {
        zone.verify_canary(p);
        ptr::write_bytes(p, 0, crate::config::CANARY_SIZE);
        ptr::write_bytes(
            p.add(zone.chunk_size - crate::config::CANARY_SIZE),
            0,
            crate::config::CANARY_SIZE,
        );
    }

    bm.set(slot, true, false);

    p
}

/// Zeroing allocate. Aborts when `nmemb * size` overflows.
///
/// # Safety
/// Must run under the root lock.
pub(crate) unsafe fn calloc(root: &mut Root, nmemb: usize, size: usize) -> *mut u8 {
    let total = match nmemb.checked_mul(size) {
        Some(t) => t,
        None => fatal!("calloc overflows, nmemb={} size={}", nmemb, size),
    };

    let p = alloc(root, total);
    ptr::write_bytes(p, 0, total);
    p
}

/// Release the chunk at `p`. With `permanent` set the chunk keeps its
/// in-use bit and becomes indistinguishable from a canary chunk, so it is
/// never handed out again.
///
/// # Safety
/// Must run under the root lock. `p` must be non-null.
pub(crate) unsafe fn free(root: &mut Root, p: *mut u8, permanent: bool) {
    let zone_idx = find_zone_range(root, p);
    free_chunk_from_zone(&mut root.zones[zone_idx], p, permanent);
}

unsafe fn free_chunk_from_zone(zone: &mut Zone, p: *mut u8, permanent: bool) {
    if !is_aligned(p as usize, ALIGNMENT) {
        fatal!(
            "chunk {:p} in zone[{}] is not {} byte aligned",
            p,
            zone.index,
            ALIGNMENT
        );
    }

    let regions = zone.regions();
    let chunk_offset = p as usize - regions.user_start as usize;

    if chunk_offset % zone.chunk_size != 0 {
        fatal!(
            "chunk {:p} is not a multiple of zone[{}] chunk size {}, off by {} bytes",
            p,
            zone.index,
            zone.chunk_size,
            chunk_offset % zone.chunk_size
        );
    }

    let chunk_number = chunk_offset / zone.chunk_size;
    let slot = chunk_number * BITS_PER_CHUNK;

    let bm = Bitmap::from_region(regions.bitmap_start, zone.bitmap_size);
    if slot / BITS_PER_WORD >= bm.num_words() {
        fatal!(
            "cannot locate chunk {:p} of zone[{}] in its bitmap",
            p,
            zone.index
        );
    }

    if !bm.in_use(slot) {
        fatal!(
            "double free of chunk {:p} detected in zone[{}], bit slot {}",
            p,
            zone.index,
            slot
        );
    }

    // The was-used bit records that this chunk now carries a canary. A
    // permanent free also keeps the in-use bit, turning the chunk into a
    // canary chunk for the rest of the process lifetime.
    bm.set(slot, permanent, true);

    ptr::write_bytes(p, POISON_BYTE, zone.chunk_size);
    zone.write_canary(p);

    // The chunks on either side, if they are in a freed-or-canary state,
    // have canaries of their own worth checking while we are here.
    if chunk_number + 1 < zone.chunk_count() {
        let over = (chunk_number + 1) * BITS_PER_CHUNK;
        if bm.covers(over) && bm.was_used(over) {
            zone.verify_canary(p.add(zone.chunk_size));
        }
    }

    if chunk_number > 0 {
        let under = (chunk_number - 1) * BITS_PER_CHUNK;
        if bm.was_used(under) {
            zone.verify_canary(p.sub(zone.chunk_size));
        }
    }

    zone.cache.push(slot, zone.index);
    zone.is_full = false;
}

/// The size class of the chunk containing `p`.
///
/// # Safety
/// Must run under the root lock. `p` must be non-null.
pub(crate) unsafe fn lookup_chunk_size(root: &Root, p: *const u8) -> usize {
    let zone_idx = find_zone_range(root, p);
    root.zones[zone_idx].chunk_size
}

/// Verify the canaries of every free and canary chunk in every zone.
///
/// # Safety
/// Must run under the root lock.
pub(crate) unsafe fn verify_all_zones(root: &Root) {
    for i in 0..root.zones_used {
        root.zones[i].verify();
    }
}
