//! Compile-time tunables.

/// Bytes of user memory backing every zone.
pub const ZONE_USER_SIZE: usize = 4 * 1024 * 1024;

/// Chunk sizes of the zones created at initialization, ascending.
/// Every size is a multiple of [`ALIGNMENT`].
pub const DEFAULT_ZONE_SIZES: [usize; 9] = [16, 32, 64, 128, 256, 512, 1024, 2048, 4096];

/// Largest default chunk size. Zones above this never get canary chunks
/// seeded at creation, as each canary would tie up a large chunk.
pub const MAX_DEFAULT_ZONE_SZ: usize = 4096;

/// Capacity of the root's zone table.
pub const MAX_ZONES: usize = 256;

/// Entries in each zone's free bit slot cache.
pub const BIT_SLOT_CACHE_SZ: usize = 255;

/// Roughly `1 / CANARY_COUNT_DIV` of a default zone's chunks are seeded
/// as permanent canaries at zone creation.
pub const CANARY_COUNT_DIV: usize = 100;

/// A zone whose chunk size is at least this many times the requested size
/// is rejected for requests above [`OVERSIZE_CHECK_MIN`], forcing creation
/// of a right-sized zone instead.
pub const WASTED_MULTIPLIER: usize = 8;

/// The oversize rejection only applies to requests larger than this.
pub const OVERSIZE_CHECK_MIN: usize = 1024;

/// Byte written over the body of every freed chunk.
pub const POISON_BYTE: u8 = 0xDE;

/// Alignment guaranteed for every returned chunk, and the granularity
/// chunk sizes are rounded to.
pub const ALIGNMENT: usize = 8;

/// Bytes of canary written at each end of a free chunk.
pub const CANARY_SIZE: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_zones_sorted_and_aligned() {
        for w in DEFAULT_ZONE_SIZES.windows(2) {
            assert!(w[0] < w[1]);
        }
        for &sz in &DEFAULT_ZONE_SIZES {
            assert_eq!(sz % ALIGNMENT, 0, "class {} not aligned", sz);
        }
        assert_eq!(*DEFAULT_ZONE_SIZES.last().unwrap(), MAX_DEFAULT_ZONE_SZ);
    }

    #[test]
    fn user_size_divides_into_default_chunks() {
        for &sz in &DEFAULT_ZONE_SIZES {
            assert_eq!(ZONE_USER_SIZE % sz, 0);
        }
    }
}
