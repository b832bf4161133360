use core::ptr;

use crate::platform::Advice;

/// Map anonymous read-write memory. Returns null on failure.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Unmap memory.
///
/// # Safety
/// `ptr` must have been returned by `map_anonymous` with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// Change protection to none or read-write. Returns false on failure.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn protect(ptr: *mut u8, size: usize, read_write: bool) -> bool {
    let prot = if read_write {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_NONE
    };
    libc::mprotect(ptr as *mut libc::c_void, size, prot) == 0
}

/// Forward an access-pattern hint to madvise.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn advise(ptr: *mut u8, size: usize, advice: Advice) {
    let hint = match advice {
        Advice::WillNeed => libc::MADV_WILLNEED,
        Advice::Sequential => libc::MADV_SEQUENTIAL,
        Advice::Random => libc::MADV_RANDOM,
        Advice::DontNeed => libc::MADV_DONTNEED,
    };
    libc::madvise(ptr as *mut libc::c_void, size, hint);
}

/// Fill `buf` from getrandom(2).
pub fn os_entropy(buf: &mut [u8]) -> bool {
    let mut filled = 0;
    while filled < buf.len() {
        let n = unsafe {
            libc::getrandom(
                buf[filled..].as_mut_ptr() as *mut libc::c_void,
                buf.len() - filled,
                0,
            )
        };
        if n < 0 {
            return false;
        }
        filled += n as usize;
    }
    true
}
