use core::ptr;

use crate::platform::Advice;

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

pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

pub unsafe fn protect(ptr: *mut u8, size: usize, read_write: bool) -> bool {
    let prot = if read_write {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_NONE
    };
    libc::mprotect(ptr as *mut libc::c_void, size, prot) == 0
}

pub unsafe fn advise(ptr: *mut u8, size: usize, advice: Advice) {
    let hint = match advice {
        Advice::WillNeed => libc::MADV_WILLNEED,
        Advice::Sequential => libc::MADV_SEQUENTIAL,
        Advice::Random => libc::MADV_RANDOM,
        Advice::DontNeed => libc::MADV_DONTNEED,
    };
    libc::madvise(ptr as *mut libc::c_void, size, hint);
}

/// Fill `buf` from getentropy(2), 256 bytes per call.
pub fn os_entropy(buf: &mut [u8]) -> bool {
    for chunk in buf.chunks_mut(256) {
        let ret = unsafe { libc::getentropy(chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };
        if ret != 0 {
            return false;
        }
    }
    true
}
