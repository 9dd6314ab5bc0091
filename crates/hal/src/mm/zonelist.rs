//! Allocation flags and per-flag-word zonelists (SPEC_FULL §4.C, §6).

use bitflags::bitflags;

bitflags! {
    /// Allocation flag word passed by a caller of `alloc_pages` (SPEC_FULL §6).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GfpFlags: u32 {
        /// Caller can only accept DMA-reachable memory.
        const DMA      = 1 << 0;
        /// Caller accepts high memory (otherwise Normal/DMA only).
        const HIGHMEM  = 1 << 1;
        /// Caller may sleep/retry/trigger reclaim.
        const WAIT     = 1 << 2;
        /// Request is on behalf of I/O.
        const IO       = 1 << 3;
        /// Caller must not sleep or trigger reclaim (interrupt context).
        const ATOMIC   = 1 << 4;
        /// Request is on behalf of a userspace process.
        const USER     = 1 << 5;
        /// Request originates from network filesystem code.
        const NFS      = 1 << 6;
        /// Request is kswapd itself; must not recurse into reclaim.
        const KSWAPD   = 1 << 7;
        /// Do not grow this zone's usage further under memory pressure.
        const NO_GROW  = 1 << 8;
        /// Recursive allocation, marked by a per-thread flag in the source
        /// allocator (`PF_MEMALLOC`): the caller is itself in the reclaim
        /// path, so it may consume reserves below the ordinary
        /// `pages_min/4` floor (SPEC_FULL §4.D step 5).
        const MEMALLOC = 1 << 9;
    }
}

impl GfpFlags {
    pub fn may_sleep(self) -> bool {
        self.contains(GfpFlags::WAIT) && !self.contains(GfpFlags::ATOMIC)
    }
}

/// Ordered fallback chain of zone indices to try for one allocation flag
/// combination (SPEC_FULL §4.C). Indices are positions into a `Node`'s
/// `zones` array; `NULL`-terminated in the source, represented here as a
/// bounded, possibly-short slice.
#[derive(Clone, Copy, Debug, Default)]
pub struct Zonelist {
    chain: [Option<u8>; 3],
}

impl Zonelist {
    pub const fn empty() -> Self {
        Self { chain: [None; 3] }
    }

    pub fn from_order(order: &[u8]) -> Self {
        let mut chain = [None; 3];
        for (slot, &zi) in chain.iter_mut().zip(order.iter()) {
            *slot = Some(zi);
        }
        Self { chain }
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.chain.iter().filter_map(|z| *z)
    }
}
