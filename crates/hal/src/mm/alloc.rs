//! Top-level page allocator (SPEC_FULL §4.D): `alloc_pages`/`free_pages` and
//! friends, built over a [`Node`]'s zonelists.
//!
//! The retry ladder is modelled as an explicit state machine
//! (`AllocPhase`) rather than the goto-driven loop it is grounded on
//! (REDESIGN FLAGS §9), so each rung is a named, testable transition.

use super::frame::FrameTable;
use super::node::Node;
use super::zone::WatermarkLevel;
use super::zonelist::GfpFlags;

/// States of the watermark retry ladder an allocation request walks
/// through before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocPhase {
    /// Cheap first pass: every zone in the fallback chain checked with a
    /// free-only comparison against its low watermark (SPEC_FULL §4.D
    /// step 1), skipping the lock-held `free + inactive_clean` accounting
    /// the later rungs need.
    TryFast,
    /// Same chain, `free + inactive_clean` checked against the high
    /// watermark.
    TryHigh,
    /// Same chain, relaxed to the low watermark.
    TryLow,
    /// Same chain, relaxed to the min watermark.
    TryMin,
    /// Higher-order (`order > 0`), waiting requests only: launder dirty
    /// inactive pages and let the reclaim collaborator walk each zone's
    /// inactive-clean list, then retry at the min watermark.
    ReclaimHighOrder,
    /// Wake the page-out daemon (or, for waiting requests without `IO`,
    /// ask the reclaim collaborator to free pages directly) and retry at
    /// the low watermark.
    WaitKswapd,
    /// Last pass before failing: watermarks bypassed entirely. Ordinary
    /// callers still stop at each zone's `pages_min / 4` reserve; `ATOMIC`
    /// and `MEMALLOC` (recursive) callers may consume the rest.
    FinalScan,
    Fail,
}

/// Whether `flags` grants access to a zone's last reserves below its
/// `pages_min / 4` floor (SPEC_FULL §4.D step 5): `ATOMIC` callers can
/// never wait for reclaim to make room, and `MEMALLOC` callers are
/// recursive allocations made from inside the reclaim path itself, so
/// both are let through the final bypass rung's floor where an ordinary
/// caller would stop.
fn bypasses_reserve_floor(flags: GfpFlags) -> bool {
    flags.contains(GfpFlags::ATOMIC) || flags.contains(GfpFlags::MEMALLOC)
}

/// Reclaim collaborator. Out of scope to implement for real (SPEC_FULL
/// §1); this is the interface a real reclaim subsystem plugs into the
/// retry ladder through.
pub trait ReclaimHooks {
    /// Attempt to reclaim one page, returning whether progress was made.
    fn reclaim_page(&self) -> bool {
        false
    }
    /// Write back a dirty inactive page.
    fn page_launder(&self) {}
    /// Try to free at least `order` worth of pages; returns pages freed.
    fn try_to_free_pages(&self, _order: u8) -> u32 {
        0
    }
    fn wakeup_kswapd(&self) {}
    fn wakeup_bdflush(&self) {}
}

/// A collaborator with every hook a no-op; used when no reclaim daemon is
/// wired in (e.g. in tests).
pub struct NoReclaim;
impl ReclaimHooks for NoReclaim {}

/// Cooperative yield point, provided by the surrounding runtime
/// (REDESIGN FLAGS §9) instead of inlining a scheduling policy here.
pub trait YieldHint {
    fn yield_now(&self);
}

/// A `YieldHint` that does nothing; appropriate for `ATOMIC` retry paths
/// and tests that don't model a scheduler.
pub struct NoYield;
impl YieldHint for NoYield {
    fn yield_now(&self) {}
}

/// The page allocator for one node: owns the node's zones and runs the
/// watermark retry ladder over them.
pub struct PageAllocator {
    pub node: Node,
}

impl PageAllocator {
    pub const fn new(node: Node) -> Self {
        Self { node }
    }

    fn scan(&self, table: &mut FrameTable, flags: GfpFlags, order: u8, level: WatermarkLevel) -> Option<u32> {
        for zi in self.node.zonelist_for(flags).iter() {
            if let Some(zone) = self.node.zone(zi) {
                if zone.watermark_ok(level) {
                    if let Some(idx) = zone.rmqueue(table, order) {
                        return Some(idx);
                    }
                }
            }
        }
        None
    }

    /// `TryFast`'s cheap free-only scan (SPEC_FULL §4.D step 1).
    fn scan_fast(&self, table: &mut FrameTable, flags: GfpFlags, order: u8) -> Option<u32> {
        for zi in self.node.zonelist_for(flags).iter() {
            if let Some(zone) = self.node.zone(zi) {
                if zone.fast_path_ok() {
                    if let Some(idx) = zone.rmqueue(table, order) {
                        return Some(idx);
                    }
                }
            }
        }
        None
    }

    /// `FinalScan`'s watermark-bypass scan, still gated by each zone's
    /// `pages_min / 4` reserve unless `recursive` lets the caller through
    /// (SPEC_FULL §4.D step 5).
    fn scan_reserve(&self, table: &mut FrameTable, flags: GfpFlags, order: u8, recursive: bool) -> Option<u32> {
        for zi in self.node.zonelist_for(flags).iter() {
            if let Some(zone) = self.node.zone(zi) {
                if recursive || zone.free_pages_at_least(zone.pages_min / 4) {
                    if let Some(idx) = zone.rmqueue(table, order) {
                        return Some(idx);
                    }
                }
            }
        }
        None
    }

    /// Run the retry ladder for one request (SPEC_FULL §4.D).
    pub fn alloc_pages(
        &self,
        table: &mut FrameTable,
        flags: GfpFlags,
        order: u8,
        hooks: &impl ReclaimHooks,
        yield_hint: &impl YieldHint,
    ) -> Option<u32> {
        let may_wait = flags.may_sleep();
        let recursive = flags.contains(GfpFlags::MEMALLOC);
        let mut phase = AllocPhase::TryFast;

        loop {
            phase = match phase {
                AllocPhase::TryFast => {
                    if let Some(idx) = self.scan_fast(table, flags, order) {
                        return Some(idx);
                    }
                    AllocPhase::TryHigh
                }
                AllocPhase::TryHigh => {
                    if let Some(idx) = self.scan(table, flags, order, WatermarkLevel::High) {
                        return Some(idx);
                    }
                    AllocPhase::TryLow
                }
                AllocPhase::TryLow => {
                    if let Some(idx) = self.scan(table, flags, order, WatermarkLevel::Low) {
                        return Some(idx);
                    }
                    AllocPhase::TryMin
                }
                AllocPhase::TryMin => {
                    if let Some(idx) = self.scan(table, flags, order, WatermarkLevel::Min) {
                        return Some(idx);
                    }
                    if bypasses_reserve_floor(flags) {
                        AllocPhase::FinalScan
                    } else if order > 0 && may_wait {
                        AllocPhase::ReclaimHighOrder
                    } else if may_wait {
                        AllocPhase::WaitKswapd
                    } else {
                        AllocPhase::Fail
                    }
                }
                AllocPhase::ReclaimHighOrder => {
                    hooks.page_launder();
                    hooks.reclaim_page();
                    if let Some(idx) = self.scan(table, flags, order, WatermarkLevel::Min) {
                        return Some(idx);
                    }
                    AllocPhase::WaitKswapd
                }
                AllocPhase::WaitKswapd => {
                    if flags.contains(GfpFlags::IO) {
                        hooks.wakeup_kswapd();
                        yield_hint.yield_now();
                    } else {
                        hooks.try_to_free_pages(order);
                    }
                    if let Some(idx) = self.scan(table, flags, order, WatermarkLevel::Low) {
                        return Some(idx);
                    }
                    AllocPhase::FinalScan
                }
                AllocPhase::FinalScan => {
                    if let Some(idx) = self.scan_reserve(table, flags, order, recursive) {
                        return Some(idx);
                    }
                    AllocPhase::Fail
                }
                AllocPhase::Fail => return None,
            };
        }
    }

    pub fn get_zeroed_page(
        &self,
        table: &mut FrameTable,
        flags: GfpFlags,
        hooks: &impl ReclaimHooks,
        yield_hint: &impl YieldHint,
    ) -> Option<u32> {
        // Zeroing the backing memory is the HAL's job once the physical
        // address is mapped; this crate only reserves the frame.
        self.alloc_pages(table, flags, 0, hooks, yield_hint)
    }

    pub fn free_pages(&self, table: &mut FrameTable, idx: u32, order: u8) {
        for zi in 0u8..3 {
            if let Some(zone) = self.node.zone(zi) {
                if idx >= zone.base && idx < zone.base + zone.size {
                    zone.free_pages(table, idx, order);
                    return;
                }
            }
        }
        unreachable!("freed frame does not belong to any zone in this node");
    }

    pub fn nr_free_pages(&self) -> u64 {
        (0u8..3)
            .filter_map(|zi| self.node.zone(zi))
            .map(super::zone::Zone::free_pages_count)
            .sum()
    }

    pub fn nr_inactive_clean_pages(&self) -> u64 {
        (0u8..3)
            .filter_map(|zi| self.node.zone(zi))
            .map(super::zone::Zone::inactive_clean_pages)
            .sum()
    }

    pub fn nr_free_highpages(&self) -> u64 {
        (0u8..3)
            .filter_map(|zi| self.node.zone(zi))
            .find(|z| z.kind == super::zone::ZoneKind::HighMem)
            .map_or(0, super::zone::Zone::free_pages_count)
    }

    /// Render a human-readable free-area summary (`show_free_areas`,
    /// SPEC_FULL §6) into the caller's buffer.
    pub fn show_free_areas(&self, out: &mut dyn core::fmt::Write) -> core::fmt::Result {
        for zi in 0u8..3 {
            if let Some(zone) = self.node.zone(zi) {
                writeln!(
                    out,
                    "{}: free={} min={} low={} high={}",
                    zone.name,
                    zone.free_pages_count(),
                    zone.pages_min,
                    zone.pages_low,
                    zone.pages_high
                )?;
            }
        }
        Ok(())
    }
}
