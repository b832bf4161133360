//! Functional tests for the allocator's observable guarantees: alignment,
//! size classes, poisoning, permanent frees, and verification.

use std::ptr;

use zonealloc as za;

#[test]
fn returned_pointers_are_aligned_and_sized() {
    unsafe {
        for &size in &[0usize, 1, 8, 15, 16, 17, 64, 100, 512, 1000, 1025, 4096] {
            let p = za::alloc(size);
            assert!(!p.is_null());
            assert_eq!(p as usize % 8, 0, "pointer for size {} misaligned", size);
            assert!(za::chunk_size(p) >= size);
            za::free(p);
        }
    }
}

#[test]
fn class_boundaries_land_in_expected_zones() {
    unsafe {
        let p = za::alloc(0);
        assert_eq!(za::chunk_size(p), 16);
        za::free(p);

        for &class in &[16usize, 32, 64, 128, 256, 512, 1024, 2048, 4096] {
            let exact = za::alloc(class);
            assert_eq!(za::chunk_size(exact), class);

            let under = za::alloc(class - 1);
            assert_eq!(za::chunk_size(under), class);

            za::free(exact);
            za::free(under);
        }

        // One past a class boundary rolls into the next class
        let p = za::alloc(1025);
        assert_eq!(za::chunk_size(p), 2048);
        za::free(p);
    }
}

#[test]
fn freed_chunks_are_poisoned() {
    unsafe {
        let p = za::alloc(2048);
        let sz = za::chunk_size(p);
        ptr::write_bytes(p, 0xAB, sz);
        za::free(p);

        // The body holds the poison byte; the first and last words hold
        // the canary.
        for i in 8..sz - 8 {
            assert_eq!(ptr::read_volatile(p.add(i)), 0xDE, "offset {}", i);
        }

        za::verify_all();
    }
}

#[test]
fn sentinel_write_then_free_verifies_clean() {
    unsafe {
        let a = za::alloc(64);
        ptr::write_volatile(a, 0xAB);
        za::free(a);
        za::verify_all();
    }
}

#[test]
fn calloc_returns_zeroed_memory() {
    unsafe {
        // Dirty a chunk and free it so calloc may recycle it
        let p = za::alloc(128);
        ptr::write_bytes(p, 0xFF, 128);
        za::free(p);

        let q = za::calloc(4, 32);
        for i in 0..128 {
            assert_eq!(ptr::read_volatile(q.add(i)), 0, "offset {}", i);
        }
        za::free(q);
    }
}

#[test]
fn permanent_free_never_reused() {
    unsafe {
        let a = za::alloc(16);
        za::free_permanent(a);

        let mut held = Vec::with_capacity(512);
        for _ in 0..512 {
            let p = za::alloc(16);
            assert_ne!(p, a, "permanently freed chunk was handed out again");
            held.push(p);
        }
        for p in held {
            za::free(p);
        }

        // The retired chunk keeps its canary under verification
        za::verify_all();
    }
}

#[test]
fn thousand_chunks_reverse_free_and_refill() {
    unsafe {
        let mut ptrs: Vec<*mut u8> = (0..1000).map(|_| za::alloc(32)).collect();
        for &p in &ptrs {
            assert_eq!(za::chunk_size(p), 32);
        }

        for &p in ptrs.iter().rev() {
            za::free(p);
        }
        ptrs.clear();

        for _ in 0..1000 {
            let p = za::alloc(32);
            assert_eq!(za::chunk_size(p), 32);
            ptrs.push(p);
        }
        for &p in &ptrs {
            za::free(p);
        }

        za::verify_all();
    }
}

#[test]
fn oversize_allocation_creates_matching_zone() {
    unsafe {
        let a = za::alloc(100_000);
        assert!(za::chunk_size(a) >= 100_000);
        ptr::write_bytes(a, 0x5A, 100_000);
        za::free(a);
        za::verify_all();

        // The zone survives for the next oversize request
        let b = za::alloc(100_000);
        assert!(za::chunk_size(b) >= 100_000);
        za::free(b);
    }
}

#[test]
fn verify_all_is_idempotent() {
    unsafe {
        let p = za::alloc(64);
        za::free(p);
        za::verify_all();
        za::verify_all();

        let q = za::alloc(64);
        za::free(q);
    }
}

#[test]
fn chunk_size_of_null_is_zero() {
    unsafe {
        assert_eq!(za::chunk_size(ptr::null_mut()), 0);
    }
}

#[test]
fn free_of_null_is_a_noop() {
    unsafe {
        za::free(ptr::null_mut());
        za::free_permanent(ptr::null_mut());
    }
}
