//! The process-wide zone registry.
//!
//! Exactly one root exists per process. It lives in its own guarded mapping
//! and holds the zone table; a single futex lock serializes every public
//! operation. The lock and the root pointer are statics outside the root
//! mapping, so the root pages can be sealed with `PROT_NONE` while the lock
//! remains usable.

use core::mem::size_of;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::config::MAX_ZONES;
use crate::diag::fatal;
use crate::platform;
use crate::util::align_up;
use crate::zone::Zone;

/// The zone registry. An all-zero struct is the valid vacant state, which
/// lets the root live directly in a freshly mapped (zero-filled) region.
#[repr(C)]
pub struct Root {
    pub zones: [Zone; MAX_ZONES],
    pub zones_used: usize,
    pub system_page_size: usize,
    /// XORed into zone references when they are exported to callers as
    /// opaque handles.
    pub zone_handle_mask: usize,
    guard_below: *mut u8,
    guard_above: *mut u8,
    map_len: usize,
}

/// The root lock. The crate has exactly one lock site ([`with_root`] and
/// the seal/unseal paths below), so rather than a general-purpose mutex
/// this is a single futex word. std's Mutex is off limits regardless: it
/// may allocate, and this lock guards the allocator itself.
///
/// States: FREE, HELD (no sleepers), PARKED (at least one thread may be
/// asleep on the word). A releasing holder only issues the wake syscall
/// when the word says someone parked.
struct RootLock {
    word: AtomicU32,
}

const FREE: u32 = 0;
const HELD: u32 = 1;
const PARKED: u32 = 2;

impl RootLock {
    const fn new() -> Self {
        RootLock {
            word: AtomicU32::new(FREE),
        }
    }

    fn acquire(&self) {
        // Bounded spin keeps uncontended and briefly-contended
        // acquisitions syscall-free.
        for _ in 0..64 {
            if self
                .word
                .compare_exchange_weak(FREE, HELD, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            core::hint::spin_loop();
        }

        // Publish a sleeper, then park until the holder hands the word
        // back to FREE. Taking the lock through this path leaves the word
        // at PARKED, so the eventual release wakes any remaining sleeper.
        while self.word.swap(PARKED, Ordering::Acquire) != FREE {
            futex_wait(&self.word, PARKED);
        }
    }

    fn release(&self) {
        if self.word.swap(FREE, Ordering::Release) == PARKED {
            futex_wake_one(&self.word);
        }
    }
}

#[cfg(target_os = "linux")]
fn futex_wait(word: &AtomicU32, expected: u32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected as libc::c_int,
            core::ptr::null::<libc::timespec>(),
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn futex_wait(_word: &AtomicU32, _expected: u32) {
    core::hint::spin_loop();
}

#[cfg(target_os = "linux")]
fn futex_wake_one(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1i32,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn futex_wake_one(_word: &AtomicU32) {}

static LOCK: RootLock = RootLock::new();
static ROOT: AtomicPtr<Root> = AtomicPtr::new(core::ptr::null_mut());

impl Root {
    /// Map and guard a new root. The mapping is one page of guard, the
    /// root pages, and one page of guard; mmap hands back zeroed memory,
    /// so the zone table starts vacant.
    ///
    /// # Safety
    /// Must be called once, from single-threaded initialization.
    pub unsafe fn create(page_size: usize) -> *mut Root {
        let map_len = align_up(size_of::<Root>() + 2 * page_size, page_size);
        let base = platform::map_rw(size_of::<Root>() + 2 * page_size);
        let root = base.add(page_size) as *mut Root;

        (*root).system_page_size = page_size;
        (*root).guard_below = base;
        (*root).guard_above = base.add(map_len - page_size);
        (*root).map_len = map_len;

        platform::protect_none(base, page_size);
        platform::advise(base, page_size, platform::Advice::DontNeed);
        platform::protect_none((*root).guard_above, page_size);
        platform::advise((*root).guard_above, page_size, platform::Advice::DontNeed);

        root
    }

    /// The root's own mapping, for teardown: `(base, length)`.
    pub fn mapping(&self) -> (*mut u8, usize) {
        (self.guard_below, self.map_len)
    }
}

/// Publish the root pointer. Called once from initialization.
pub(crate) fn install(root: *mut Root) {
    ROOT.store(root, Ordering::Release);
}

/// Retire the root pointer after its mapping is gone.
pub(crate) fn clear() {
    ROOT.store(core::ptr::null_mut(), Ordering::Release);
}

/// Run `f` with exclusive access to the root. Every public operation routes
/// through here; the lock is held for the operation's full duration. An
/// abort inside `f` terminates the process with the lock held, which is
/// fine: nothing runs afterwards.
pub(crate) fn with_root<R>(f: impl FnOnce(&mut Root) -> R) -> R {
    LOCK.acquire();
    let root = ROOT.load(Ordering::Acquire);
    if root.is_null() {
        fatal!("root registry is missing");
    }
    let result = f(unsafe { &mut *root });
    LOCK.release();
    result
}

/// Seal the root pages. Any later touch of the zone table, including every
/// allocation and free, faults immediately until [`unprotect_root`] runs.
pub(crate) fn protect_root() {
    LOCK.acquire();
    let root = ROOT.load(Ordering::Acquire);
    if root.is_null() {
        fatal!("root registry is missing");
    }
    unsafe { platform::protect_none(root as *mut u8, size_of::<Root>()) };
    LOCK.release();
}

/// Unseal the root pages.
pub(crate) fn unprotect_root() {
    LOCK.acquire();
    let root = ROOT.load(Ordering::Acquire);
    if root.is_null() {
        fatal!("root registry is missing");
    }
    unsafe { platform::protect_rw(root as *mut u8, size_of::<Root>()) };
    LOCK.release();
}
