//! The virtual memory layer.
//!
//! Everything above this module treats mapped memory as infallible: a
//! failing mmap or mprotect means the process is in no state to continue,
//! so those paths abort rather than return errors.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::diag::fatal;
use crate::util::align_up;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

/// Access-pattern hints forwarded to madvise. Best effort only.
#[derive(Clone, Copy)]
pub enum Advice {
    WillNeed,
    Sequential,
    Random,
    DontNeed,
}

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// The system page size, read once from sysconf.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let sz = if sz <= 0 { 4096 } else { sz as usize };
    PAGE_SIZE.store(sz, Ordering::Relaxed);
    sz
}

/// Map anonymous read/write pages. `size` is rounded up to a page
/// multiple. Aborts on failure.
pub fn map_rw(size: usize) -> *mut u8 {
    let size = align_up(size, page_size());
    let p = unsafe { sys::map_anonymous(size) };
    if p.is_null() {
        fatal!("failed to map {} rw bytes", size);
    }
    p
}

/// Make a region inaccessible. Aborts on failure.
///
/// # Safety
/// `ptr` must be page-aligned and refer to a mapped region of at least
/// `size` bytes.
pub unsafe fn protect_none(ptr: *mut u8, size: usize) {
    if !sys::protect(ptr, size, false) {
        fatal!("failed to protect pages at {:p}", ptr);
    }
}

/// Make a region readable and writable again. Aborts on failure.
///
/// # Safety
/// Same requirements as [`protect_none`].
pub unsafe fn protect_rw(ptr: *mut u8, size: usize) {
    if !sys::protect(ptr, size, true) {
        fatal!("failed to unprotect pages at {:p}", ptr);
    }
}

/// Hint the kernel about the expected access pattern. The hint may be
/// ignored; failures are not reported.
///
/// # Safety
/// `ptr` must be page-aligned and refer to a mapped region.
pub unsafe fn advise(ptr: *mut u8, size: usize, advice: Advice) {
    sys::advise(ptr, size, advice);
}

/// Unmap a region previously obtained from [`map_rw`].
///
/// # Safety
/// `ptr` and `size` must describe a whole mapping returned by [`map_rw`].
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    sys::unmap(ptr, size);
}

/// Fill `buf` from the OS entropy source. Returns false if the source is
/// unavailable.
pub fn os_entropy(buf: &mut [u8]) -> bool {
    sys::os_entropy(buf)
}
