//! Thread stress tests: heavy concurrent alloc/free traffic over the
//! single-lock allocator, with full canary verification at the end.

use std::ptr;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use zonealloc as za;

const DEFAULT_SIZES: [usize; 9] = [16, 32, 64, 128, 256, 512, 1024, 2048, 4096];

fn stress_alloc_free_pairs(num_threads: usize, iterations: usize) {
    // Initialize on the main thread first
    za::verify_all();

    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut rng: u64 = 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(t as u64 + 1) | 1;
                for _ in 0..iterations {
                    rng ^= rng >> 12;
                    rng ^= rng << 25;
                    rng ^= rng >> 27;
                    let size = DEFAULT_SIZES[rng as usize % DEFAULT_SIZES.len()];
                    unsafe {
                        let p = za::alloc(size);
                        assert!(!p.is_null(), "alloc returned null under contention");
                        ptr::write_bytes(p, 0xCC, size);
                        za::free(p);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked during alloc/free stress");
    }

    za::verify_all();
}

#[test]
fn stress_two_threads_hundred_thousand_pairs() {
    stress_alloc_free_pairs(2, 100_000);
}

#[test]
fn stress_eight_threads() {
    stress_alloc_free_pairs(8, 20_000);
}

/// Wrapper to send raw chunk pointers across threads. The allocator is
/// thread-safe and ownership moves with the pointer.
#[derive(Clone, Copy)]
struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

#[test]
fn cross_thread_free() {
    const COUNT: usize = 1_000;
    const SIZE: usize = 64;

    za::verify_all();

    let shared: Arc<Mutex<Vec<SendPtr>>> = Arc::new(Mutex::new(Vec::with_capacity(COUNT)));
    let barrier = Arc::new(Barrier::new(2));

    let producer = {
        let shared = Arc::clone(&shared);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..COUNT {
                let p = unsafe { za::alloc(SIZE) };
                unsafe { ptr::write_bytes(p, (i & 0xFF) as u8, SIZE) };
                shared.lock().unwrap().push(SendPtr(p));
            }
        })
    };

    let consumer = {
        let shared = Arc::clone(&shared);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut freed = 0;
            while freed < COUNT {
                let next = shared.lock().unwrap().pop();
                match next {
                    Some(SendPtr(p)) => {
                        unsafe { za::free(p) };
                        freed += 1;
                    }
                    None => thread::yield_now(),
                }
            }
        })
    };

    producer.join().expect("producer panicked");
    consumer.join().expect("consumer panicked");

    za::verify_all();
}
