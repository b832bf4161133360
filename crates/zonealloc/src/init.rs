//! Allocator lifecycle.
//!
//! The allocator is a lazily constructed singleton: the first public call
//! from any thread runs initialization exactly once, other threads spin
//! until it is ready. [`teardown`] verifies and destroys every zone and
//! retires the root; the allocator cannot be revived afterwards, and any
//! later call aborts.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::allocator;
use crate::config::DEFAULT_ZONE_SIZES;
use crate::diag::fatal;
use crate::platform;
use crate::rand;
use crate::root::{self, Root};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const DESTROYED: u8 = 3;

static INIT_STATE: AtomicU8 = AtomicU8::new(UNINIT);

/// Initialize the allocator if it has not been already.
pub fn ensure_initialized() {
    match INIT_STATE.load(Ordering::Acquire) {
        READY => return,
        DESTROYED => fatal!("allocator used after teardown"),
        _ => {}
    }
    initialize();
}

#[cold]
#[inline(never)]
fn initialize() {
    match INIT_STATE.compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {}
        Err(INITIALIZING) => {
            while INIT_STATE.load(Ordering::Acquire) == INITIALIZING {
                core::hint::spin_loop();
            }
            if INIT_STATE.load(Ordering::Acquire) == DESTROYED {
                fatal!("allocator used after teardown");
            }
            return;
        }
        Err(DESTROYED) => fatal!("allocator used after teardown"),
        Err(_) => return,
    }

    let page_size = platform::page_size();
    rand::seed();

    // Single-threaded here: other threads spin on INIT_STATE until READY,
    // so the lock is not needed yet.
    unsafe {
        let root = Root::create(page_size);
        root::install(root);

        for &class in DEFAULT_ZONE_SIZES.iter() {
            allocator::new_zone(&mut *root, class, true);
        }

        (*root).zone_handle_mask = rand::weak_u64() as usize;
    }

    INIT_STATE.store(READY, Ordering::Release);
}

/// Verify every zone, destroy every zone, and release the root. Safe to
/// call at most once; later calls are no-ops and later allocator use
/// aborts.
///
/// # Safety
/// No other thread may be using the allocator, and no pointer it handed
/// out may be used afterwards.
pub unsafe fn teardown() {
    if INIT_STATE
        .compare_exchange(READY, DESTROYED, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let (base, len) = root::with_root(|root| {
        for i in 0..root.zones_used {
            unsafe {
                root.zones[i].verify();
                root.zones[i].destroy();
            }
        }
        root.mapping()
    });

    root::clear();
    platform::unmap(base, len);
}
