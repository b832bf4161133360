//! A hardened general-purpose memory allocator.
//!
//! Memory is carved out of size-classed zones. Each zone pairs a fixed-size
//! user region with a two-bits-per-chunk occupancy bitmap, both bracketed by
//! inaccessible guard pages. Freed chunks are poisoned and sealed with
//! address-derived canaries, zone metadata pointers are stored XOR-masked,
//! and every detected inconsistency (double free, foreign pointer, canary
//! corruption) aborts the process with a diagnostic.

extern crate libc;

pub mod allocator;
pub mod api;
pub mod bitmap;
pub mod canary;
pub mod config;
pub mod diag;
pub mod global_alloc;
pub mod init;
pub mod platform;
pub mod rand;
pub mod root;
pub mod util;
pub mod zone;

pub use api::{
    alloc, calloc, chunk_size, free, free_permanent, protect_root, teardown, unprotect_root,
    verify_all,
};
pub use global_alloc::ZoneAlloc;
