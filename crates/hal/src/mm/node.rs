//! Node (component C): the owner of up to three zones plus the precomputed
//! zonelist table used to pick a fallback chain from an allocation flag
//! word (SPEC_FULL §4.C).

use super::zone::{Zone, ZoneKind};
use super::zonelist::{GfpFlags, Zonelist};

const ZONE_DMA: usize = 0;
const ZONE_NORMAL: usize = 1;
const ZONE_HIGHMEM: usize = 2;

/// A NUMA node (single-node systems just have one). Owns its zones and a
/// zonelist table indexed by the caller's DMA/HIGHMEM flag bits.
pub struct Node {
    pub zones: [Option<Zone>; 3],
    /// Indexed by `(flags.contains(DMA) as usize) | (flags.contains(HIGHMEM) as usize) << 1`.
    zonelists: [Zonelist; 4],
}

impl Node {
    pub fn new(dma: Option<Zone>, normal: Option<Zone>, highmem: Option<Zone>) -> Self {
        let mut node = Self {
            zones: [dma, normal, highmem],
            zonelists: [Zonelist::empty(); 4],
        };
        node.build_zonelists();
        node
    }

    fn has_zone(&self, idx: usize) -> bool {
        self.zones[idx].as_ref().is_some_and(|z| z.size > 0)
    }

    /// Precompute one fallback chain per flag combination: requests for
    /// high memory fall back High -> Normal -> DMA; DMA-only requests never
    /// fall upward. Zero-size zones are omitted from every chain
    /// (SPEC_FULL §4.C).
    fn build_zonelists(&mut self) {
        for flags in 0u8..4 {
            let want_highmem = flags & 0b10 != 0;
            let want_dma_only = flags & 0b01 != 0;

            let order: &[usize] = if want_dma_only {
                &[ZONE_DMA]
            } else if want_highmem {
                &[ZONE_HIGHMEM, ZONE_NORMAL, ZONE_DMA]
            } else {
                &[ZONE_NORMAL, ZONE_DMA]
            };

            let chain: alloc::vec::Vec<u8> = order
                .iter()
                .copied()
                .filter(|&i| self.has_zone(i))
                .map(|i| i as u8)
                .collect();
            self.zonelists[flags as usize] = Zonelist::from_order(&chain);
        }
    }

    /// Look up the precomputed fallback chain for a caller's flag word.
    pub fn zonelist_for(&self, flags: GfpFlags) -> Zonelist {
        let key = (u8::from(flags.contains(GfpFlags::DMA)))
            | (u8::from(flags.contains(GfpFlags::HIGHMEM)) << 1);
        self.zonelists[key as usize]
    }

    pub fn zone(&self, idx: u8) -> Option<&Zone> {
        self.zones[idx as usize].as_ref()
    }

    pub fn zone_kind(&self, idx: u8) -> Option<ZoneKind> {
        self.zones[idx as usize].as_ref().map(|z| z.kind)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::mm::zone::BALANCE_RATIO_NORMAL;

    #[test]
    fn dma_only_request_never_falls_back_to_normal() {
        let dma = Zone::new(ZoneKind::Dma, "DMA", 0, 64, BALANCE_RATIO_NORMAL);
        let normal = Zone::new(ZoneKind::Normal, "Normal", 64, 256, BALANCE_RATIO_NORMAL);
        let node = Node::new(Some(dma), Some(normal), None);

        let chain: alloc::vec::Vec<u8> = node.zonelist_for(GfpFlags::DMA).iter().collect();
        assert_eq!(chain, alloc::vec![0]);
    }

    #[test]
    fn highmem_request_falls_back_through_normal_to_dma() {
        let dma = Zone::new(ZoneKind::Dma, "DMA", 0, 64, BALANCE_RATIO_NORMAL);
        let normal = Zone::new(ZoneKind::Normal, "Normal", 64, 256, BALANCE_RATIO_NORMAL);
        let high = Zone::new(ZoneKind::HighMem, "HighMem", 320, 512, BALANCE_RATIO_NORMAL);
        let node = Node::new(Some(dma), Some(normal), Some(high));

        let chain: alloc::vec::Vec<u8> = node.zonelist_for(GfpFlags::HIGHMEM).iter().collect();
        assert_eq!(chain, alloc::vec![2, 1, 0]);
    }

    #[test]
    fn zero_size_zone_is_omitted_from_chain() {
        let normal = Zone::new(ZoneKind::Normal, "Normal", 0, 256, BALANCE_RATIO_NORMAL);
        let empty_dma = Zone::new(ZoneKind::Dma, "DMA", 0, 0, BALANCE_RATIO_NORMAL);
        let node = Node::new(Some(empty_dma), Some(normal), None);

        let chain: alloc::vec::Vec<u8> = node.zonelist_for(GfpFlags::empty()).iter().collect();
        assert_eq!(chain, alloc::vec![1]);
    }
}
