//! Frame descriptor table (component A).
//!
//! One [`Frame`] per physical page frame, held in a flat [`FrameTable`].
//! Allocator logic does not live here; this module only exposes the
//! descriptor shape and bit/counter accessors.

use bitflags::bitflags;

bitflags! {
    /// Per-frame state bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        /// Frame is handed out by the boot allocator and not yet owned by
        /// any zone free list.
        const RESERVED       = 1 << 0;
        /// Frame belongs to a slab (`payload` is `SlabMember`).
        const SLAB           = 1 << 1;
        /// Frame is locked (pinned) and must not be freed or reclaimed.
        const LOCKED         = 1 << 2;
        const REFERENCED     = 1 << 3;
        const DIRTY          = 1 << 4;
        const ACTIVE         = 1 << 5;
        const INACTIVE_DIRTY = 1 << 6;
        const INACTIVE_CLEAN = 1 << 7;
        const SWAP_CACHE     = 1 << 8;
        /// Frame is the head of a free run tracked by a zone free list.
        const FREE           = 1 << 9;
    }
}

/// What a frame's link slots mean right now.
///
/// Replaces the type-punned `page.list.next/prev` reuse pattern with an
/// explicit tagged union: a frame is either free (linked into a zone's
/// per-order list), owned by a slab, or carries no allocator-owned payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FramePayload {
    #[default]
    Other,
    /// Head of a free run of order `order`. `next`/`prev` are frame-table
    /// indices forming a doubly linked ring for that order's free list.
    Free {
        order: u8,
        next: Option<u32>,
        prev: Option<u32>,
    },
    /// Frame backs a slab; `cache_id`/`slab_id` locate the owning cache and
    /// slab in the slab layer's registries.
    SlabMember { cache_id: u32, slab_id: u32 },
}

impl FramePayload {
    pub fn as_free(&self) -> Option<(u8, Option<u32>, Option<u32>)> {
        match *self {
            FramePayload::Free { order, next, prev } => Some((order, next, prev)),
            _ => None,
        }
    }

    pub fn as_slab_member(&self) -> Option<(u32, u32)> {
        match *self {
            FramePayload::SlabMember { cache_id, slab_id } => Some((cache_id, slab_id)),
            _ => None,
        }
    }
}

/// A descriptor for a single physical page frame.
#[derive(Clone, Copy, Debug)]
pub struct Frame {
    pub flags: FrameFlags,
    pub refcount: u16,
    pub age: u8,
    pub payload: FramePayload,
}

impl Frame {
    pub const fn new() -> Self {
        Self {
            flags: FrameFlags::RESERVED,
            refcount: 0,
            age: 0,
            payload: FramePayload::Other,
        }
    }

    pub fn is_free(&self) -> bool {
        self.flags.contains(FrameFlags::FREE)
    }

    pub fn is_reserved(&self) -> bool {
        self.flags.contains(FrameFlags::RESERVED)
    }

    pub fn is_slab(&self) -> bool {
        self.flags.contains(FrameFlags::SLAB)
    }

    /// Reset to the "free, order k, unlinked" state; caller links it in.
    pub fn mark_free(&mut self, order: u8) {
        self.flags.remove(FrameFlags::RESERVED | FrameFlags::SLAB);
        self.flags.insert(FrameFlags::FREE);
        self.refcount = 0;
        self.payload = FramePayload::Free {
            order,
            next: None,
            prev: None,
        };
    }

    pub fn mark_allocated(&mut self, order: u8) {
        self.flags.remove(FrameFlags::FREE | FrameFlags::RESERVED);
        self.refcount = 1;
        self.payload = FramePayload::Other;
        let _ = order;
    }

    pub fn mark_slab_member(&mut self, cache_id: u32, slab_id: u32) {
        self.flags.remove(FrameFlags::FREE | FrameFlags::RESERVED);
        self.flags.insert(FrameFlags::SLAB);
        self.payload = FramePayload::SlabMember { cache_id, slab_id };
    }

    /// Reverse of [`Frame::mark_slab_member`]: called when a slab's backing
    /// pages are handed back to the page allocator, so `free_pages`'s
    /// "not still owned by a slab" assertion holds.
    pub fn clear_slab_member(&mut self) {
        self.flags.remove(FrameFlags::SLAB);
        self.payload = FramePayload::Other;
    }

    pub fn order(&self) -> u8 {
        match self.payload {
            FramePayload::Free { order, .. } => order,
            _ => 0,
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat array of frame descriptors, indexed by frame number.
///
/// Exposes only getters/setters for bits and counters, and index<->address
/// translation; no allocator logic lives here (SPEC_FULL §4.A).
pub struct FrameTable {
    frames: &'static mut [Frame],
    /// Physical address corresponding to frame index 0.
    phys_base: usize,
    page_size: usize,
}

impl FrameTable {
    /// # Safety
    /// `frames` must outlive every use of this table, and `phys_base` must
    /// be the physical address of the frame at `frames[0]`.
    pub unsafe fn new(frames: &'static mut [Frame], phys_base: usize, page_size: usize) -> Self {
        Self {
            frames,
            phys_base,
            page_size,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, idx: u32) -> &Frame {
        &self.frames[idx as usize]
    }

    pub fn get_mut(&mut self, idx: u32) -> &mut Frame {
        &mut self.frames[idx as usize]
    }

    pub fn pa_to_index(&self, pa: usize) -> Option<u32> {
        if pa < self.phys_base {
            return None;
        }
        let idx = (pa - self.phys_base) / self.page_size;
        if idx < self.frames.len() {
            Some(idx as u32)
        } else {
            None
        }
    }

    pub fn index_to_pa(&self, idx: u32) -> usize {
        self.phys_base + idx as usize * self.page_size
    }
}
