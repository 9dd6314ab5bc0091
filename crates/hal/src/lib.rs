#![cfg_attr(not(feature = "std"), no_std)]

//! Physical memory management: a zoned buddy page allocator with a
//! slab/object allocator layered above it.

extern crate alloc;

pub mod mm;
