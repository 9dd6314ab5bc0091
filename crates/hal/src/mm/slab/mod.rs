//! Slab allocator: named caches plus the general-purpose `kmalloc` size
//! classes built on top of them (SPEC_FULL §4.E, §6).

pub mod cache;
pub mod cpucache;
pub mod page;
pub mod reap;

use super::alloc::PageAllocator;
use super::frame::FrameTable;
use super::zonelist::GfpFlags;
use cache::Cache;
use reap::Reaper;
use talus_utils::HashMap;

/// General-cache sizes, `size-32` .. `size-131072` (SPEC_FULL §6).
pub const GENERAL_CACHE_SIZES: [usize; 13] = [
    32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072,
];

/// The global cache chain (SPEC_FULL §4.E, §5): a handle-indexed registry
/// replacing the teacher's raw intrusive chain (REDESIGN FLAGS §9).
pub struct Registry {
    caches: alloc::vec::Vec<Cache>,
    by_name: HashMap<&'static str, u32>,
    reaper: Reaper,
    /// First general cache's index into `caches`; `kmalloc` only searches
    /// this contiguous run.
    general_base: u32,
    general_dma_base: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            caches: alloc::vec::Vec::new(),
            by_name: HashMap::new(),
            reaper: Reaper::new(),
            general_base: 0,
            general_dma_base: 0,
        }
    }

    /// `kmem_cache_create`.
    pub fn create(
        &mut self,
        name: &'static str,
        objsize: usize,
        align: usize,
        page_size: usize,
        forced_flags: GfpFlags,
        ctor: Option<cache::ObjectHook>,
        dtor: Option<cache::ObjectHook>,
    ) -> u32 {
        let id = self.caches.len() as u32;
        self.caches
            .push(Cache::create(name, objsize, align, page_size, forced_flags, ctor, dtor));
        self.by_name.insert(name, id);
        id
    }

    pub fn find(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn cache(&self, id: u32) -> &Cache {
        &self.caches[id as usize]
    }

    pub fn cache_mut(&mut self, id: u32) -> &mut Cache {
        &mut self.caches[id as usize]
    }

    pub fn alloc(&mut self, table: &mut FrameTable, pa: &PageAllocator, id: u32) -> Option<usize> {
        self.caches[id as usize].alloc(table, pa, id)
    }

    pub fn free_mut(&mut self, table: &FrameTable, id: u32, addr: usize) {
        self.caches[id as usize].free(table, addr);
    }

    /// `kmem_cache_destroy`; the cache is removed from the chain only on
    /// success (SPEC_FULL §7 soft error on refusal).
    pub fn destroy(&mut self, table: &mut FrameTable, pa: &PageAllocator, id: u32) -> Result<(), cache::CacheError> {
        self.caches[id as usize].destroy(table, pa)?;
        let cache = self.caches.swap_remove(id as usize);
        self.by_name.remove(cache.name);
        if (id as usize) < self.caches.len() {
            let moved_name = self.caches[id as usize].name;
            self.by_name.insert(moved_name, id);
        }
        Ok(())
    }

    pub fn reap(&mut self, table: &mut FrameTable, pa: &PageAllocator) -> Option<usize> {
        self.reaper.reap(&mut self.caches, table, pa)
    }

    /// Build the standard `size-N` and `size-N(DMA)` caches up front.
    pub fn create_general_caches(&mut self, page_size: usize) {
        self.general_base = self.caches.len() as u32;
        for &size in &GENERAL_CACHE_SIZES {
            self.create(general_name(size), size, 8, page_size, GfpFlags::empty(), None, None);
        }
        self.general_dma_base = self.caches.len() as u32;
        for &size in &GENERAL_CACHE_SIZES {
            self.create(general_dma_name(size), size, 8, page_size, GfpFlags::DMA, None, None);
        }
    }

    /// `kmem_find_general_cachep`: smallest general cache with `cs_size >= n`.
    pub fn find_general_cachep(&self, n: usize, dma: bool) -> Option<u32> {
        let base = if dma { self.general_dma_base } else { self.general_base };
        GENERAL_CACHE_SIZES
            .iter()
            .position(|&size| size >= n)
            .map(|i| base + i as u32)
    }

    pub fn kmalloc(&mut self, table: &mut FrameTable, pa: &PageAllocator, n: usize, flags: GfpFlags) -> Option<usize> {
        let id = self.find_general_cachep(n, flags.contains(GfpFlags::DMA))?;
        self.alloc(table, pa, id)
    }

    pub fn kfree(&mut self, table: &FrameTable, id: u32, addr: usize) {
        self.free_mut(table, id, addr);
    }

    /// `slabinfo` diagnostics (SPEC_FULL §6).
    pub fn slabinfo(&self, out: &mut dyn core::fmt::Write) -> core::fmt::Result {
        writeln!(out, "name active/total objsize active/total-slabs pages-per-slab")?;
        for cache in &self.caches {
            writeln!(
                out,
                "{} {}/{} {} {}/{} {}",
                cache.name,
                cache.active_objects(),
                cache.total_objects(),
                cache.objsize,
                cache.num_slabs() - cache.trailing_empty_count().min(cache.num_slabs()),
                cache.num_slabs(),
                1usize << cache.order
            )?;
        }
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn general_name(size: usize) -> &'static str {
    match size {
        32 => "size-32",
        64 => "size-64",
        128 => "size-128",
        256 => "size-256",
        512 => "size-512",
        1024 => "size-1024",
        2048 => "size-2048",
        4096 => "size-4096",
        8192 => "size-8192",
        16384 => "size-16384",
        32768 => "size-32768",
        65536 => "size-65536",
        131072 => "size-131072",
        _ => "size-?",
    }
}

fn general_dma_name(size: usize) -> &'static str {
    match size {
        32 => "size-32(DMA)",
        64 => "size-64(DMA)",
        128 => "size-128(DMA)",
        256 => "size-256(DMA)",
        512 => "size-512(DMA)",
        1024 => "size-1024(DMA)",
        2048 => "size-2048(DMA)",
        4096 => "size-4096(DMA)",
        8192 => "size-8192(DMA)",
        16384 => "size-16384(DMA)",
        32768 => "size-32768(DMA)",
        65536 => "size-65536(DMA)",
        131072 => "size-131072(DMA)",
        _ => "size-?(DMA)",
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::mm::frame::Frame;
    use crate::mm::node::Node;
    use crate::mm::zone::{Zone, ZoneKind, BALANCE_RATIO_NORMAL};
    extern crate std;
    use std::boxed::Box;
    use std::vec;

    fn setup(pages: usize) -> (FrameTable, PageAllocator) {
        let frames = vec![Frame::new(); pages].into_boxed_slice();
        let frames = Box::leak(frames);
        let mut table = unsafe { FrameTable::new(frames, 0x1000, 4096) };
        let zone = Zone::new(ZoneKind::Normal, "Normal", 0, pages as u32, BALANCE_RATIO_NORMAL);
        zone.seed(&mut table, 0, pages as u32);
        let node = Node::new(None, Some(zone), None);
        (table, PageAllocator::new(node))
    }

    #[test]
    fn kmalloc_selects_the_smallest_big_enough_general_cache() {
        let (mut table, pa) = setup(64);
        let mut reg = Registry::new();
        reg.create_general_caches(4096);

        let id100 = reg.find_general_cachep(100, false).unwrap();
        let id128 = reg.find_general_cachep(128, false).unwrap();
        let id129 = reg.find_general_cachep(129, false).unwrap();
        assert_eq!(id100, id128);
        assert_eq!(reg.cache(id128).objsize, 128);
        assert_eq!(reg.cache(id129).objsize, 256);

        let p = reg.kmalloc(&mut table, &pa, 100, GfpFlags::empty()).unwrap();
        assert_ne!(p, 0);
    }
}
