//! Lease allocation module.
//!
//! Hands out addresses from one configured range, one per hardware address,
//! for the lifetime of the process.

mod allocator;

pub use allocator::{Lease, LeaseAllocator};
