//! Boot-time bump allocator (external collaborator stand-in, SPEC_FULL §1).
//!
//! The real boot allocator is out of scope for this core; this is a minimal
//! concrete implementation of its contract (hand out raw frames once, no
//! free) so the buddy/slab layers have something to seed from in tests and
//! in a standalone build.

use core::sync::atomic::{AtomicU32, Ordering};

/// Hands out frame indices in order, never reusing one. Mirrors
/// `init_bootmem_core`'s "no free before handoff" contract.
pub struct BootAllocator {
    next: AtomicU32,
    limit: u32,
}

impl BootAllocator {
    pub const fn new(start_frame: u32, frame_count: u32) -> Self {
        Self {
            next: AtomicU32::new(start_frame),
            limit: start_frame.saturating_add(frame_count),
        }
    }

    /// Reserve `count` consecutive frame indices, or `None` if the pool is
    /// exhausted.
    pub fn alloc(&self, count: u32) -> Option<core::ops::Range<u32>> {
        loop {
            let cur = self.next.load(Ordering::Relaxed);
            let end = cur.checked_add(count)?;
            if end > self.limit {
                return None;
            }
            if self
                .next
                .compare_exchange(cur, end, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(cur..end);
            }
        }
    }

    /// Frames handed out so far; used to hand the remainder to a zone via
    /// [`crate::mm::zone::Zone::seed`].
    pub fn watermark(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn alloc_hands_out_disjoint_ranges() {
        let boot = BootAllocator::new(0, 10);
        let a = boot.alloc(4).unwrap();
        let b = boot.alloc(4).unwrap();
        assert_eq!(a, 0..4);
        assert_eq!(b, 4..8);
        assert!(boot.alloc(4).is_none());
        assert!(boot.alloc(2).is_some());
    }
}
