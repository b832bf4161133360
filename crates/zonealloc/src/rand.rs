//! Randomness for the allocator.
//!
//! Two tiers: [`secret_u64`] draws per-zone secrets (canary secret, pointer
//! mask) from the OS entropy source, and [`weak_u64`] is a xorshift64* PRNG
//! seeded from two time-of-day samples mixed with the pid, used only where
//! predictability is not catastrophic (slot positions, the handle mask).
//! A failing entropy source degrades secrets to the weak PRNG rather than
//! failing allocation.

use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::platform;

static STATE: AtomicU64 = AtomicU64::new(0);

/// Seed the weak PRNG. Called once during initialization.
pub fn seed() {
    let mut t1 = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let mut t2 = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let pid = unsafe {
        libc::gettimeofday(&mut t1, ptr::null_mut());
        libc::gettimeofday(&mut t2, ptr::null_mut());
        libc::getpid()
    };

    let mixed = (t1.tv_usec as u64)
        .wrapping_mul(t1.tv_sec as u64)
        .wrapping_add((t2.tv_usec as u64).wrapping_mul(t2.tv_sec as u64))
        .wrapping_add(pid as u64);

    // splitmix spreads the low-entropy seed; | 1 keeps xorshift out of
    // its zero fixed point
    STATE.store(splitmix64(mixed) | 1, Ordering::Relaxed);
}

/// Next value from the weak PRNG.
pub fn weak_u64() -> u64 {
    let mut s = STATE.load(Ordering::Relaxed);
    if s == 0 {
        seed();
        s = STATE.load(Ordering::Relaxed);
    }
    // xorshift64*
    s ^= s >> 12;
    s ^= s << 25;
    s ^= s >> 27;
    STATE.store(s, Ordering::Relaxed);
    s.wrapping_mul(0x2545F4914F6CDD1D)
}

/// A 64-bit secret from the OS entropy source, falling back to the weak
/// PRNG if the source is unavailable.
pub fn secret_u64() -> u64 {
    let mut buf = [0u8; 8];
    if platform::os_entropy(&mut buf) {
        u64::from_ne_bytes(buf)
    } else {
        weak_u64()
    }
}

/// splitmix64 finalizer.
#[inline(always)]
pub fn splitmix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_values_vary() {
        seed();
        let a = weak_u64();
        let b = weak_u64();
        let c = weak_u64();
        assert!(a != b || b != c);
    }

    #[test]
    fn secrets_vary() {
        assert_ne!(secret_u64(), secret_u64());
    }
}
