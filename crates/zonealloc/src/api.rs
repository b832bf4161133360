//! The public surface.
//!
//! Free functions over the process-wide root singleton. Every operation
//! initializes the allocator on first use, takes the root lock for its full
//! duration, and either succeeds or aborts the process; the only
//! recoverable outcome is a successful return.

use crate::allocator;
use crate::init;
use crate::root;

/// Allocate a chunk of at least `size` bytes, aligned to
/// [`ALIGNMENT`](crate::config::ALIGNMENT). Never returns null; a request
/// the allocator cannot serve aborts.
///
/// # Safety
/// The returned memory is uninitialized. The caller must release it with
/// [`free`] or [`free_permanent`] and not use it afterwards.
pub unsafe fn alloc(size: usize) -> *mut u8 {
    init::ensure_initialized();
    root::with_root(|root| unsafe { allocator::alloc(root, size) })
}

/// Allocate a zeroed region of `nmemb * size` bytes. Aborts if the
/// multiplication overflows.
///
/// # Safety
/// Same contract as [`alloc`].
pub unsafe fn calloc(nmemb: usize, size: usize) -> *mut u8 {
    init::ensure_initialized();
    root::with_root(|root| unsafe { allocator::calloc(root, nmemb, size) })
}

/// Release a chunk. A null `p` is a no-op. Freeing a foreign pointer, a
/// misaligned pointer, or an already-free chunk aborts.
///
/// # Safety
/// `p` must be null or a pointer returned by [`alloc`] / [`calloc`] that
/// has not been freed since.
pub unsafe fn free(p: *mut u8) {
    if p.is_null() {
        return;
    }
    init::ensure_initialized();
    root::with_root(|root| unsafe { allocator::free(root, p, false) });
}

/// Release a chunk permanently: it is marked as a canary chunk and never
/// handed out again, extending corruption detection over its memory for
/// the life of the process.
///
/// # Safety
/// Same contract as [`free`].
pub unsafe fn free_permanent(p: *mut u8) {
    if p.is_null() {
        return;
    }
    init::ensure_initialized();
    root::with_root(|root| unsafe { allocator::free(root, p, true) });
}

/// The size class of the chunk containing `p`, or 0 for null. Aborts for
/// pointers the allocator never produced.
///
/// # Safety
/// `p` must be null or a pointer into a live allocation.
pub unsafe fn chunk_size(p: *mut u8) -> usize {
    if p.is_null() {
        return 0;
    }
    init::ensure_initialized();
    root::with_root(|root| unsafe { allocator::lookup_chunk_size(root, p) })
}

/// Verify the canaries of every free and canary chunk in every zone.
/// Returns on success, aborts on the first corruption. Has no effect on
/// allocator state.
pub fn verify_all() {
    init::ensure_initialized();
    root::with_root(|root| unsafe { allocator::verify_all_zones(root) });
}

/// Seal the root registry pages. Any allocator use before
/// [`unprotect_root`] faults; useful around phases where no allocation is
/// expected.
pub fn protect_root() {
    init::ensure_initialized();
    root::protect_root();
}

/// Unseal the root registry pages.
pub fn unprotect_root() {
    init::ensure_initialized();
    root::unprotect_root();
}

/// Verify and destroy every zone and release the root. The allocator is
/// unusable afterwards.
///
/// # Safety
/// No other thread may be using the allocator, and no pointer it handed
/// out may be used afterwards.
pub unsafe fn teardown() {
    init::teardown();
}
