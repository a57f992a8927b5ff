//! Buffers and the page bookkeeping behind copy-on-write.
//!
//! A heap-backed buffer owns a vector of [`PageSlot`]s. Slots carry a
//! shared frame count so two buffers created by [`crate::cow`] can point
//! at the same physical frame until one of them writes.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use gvm_abi::MemRights;

use crate::heap::{PhysAddr, PhysRange};

/// One page of a heap-backed buffer. The count says how many buffers
/// currently reference the frame.
#[derive(Debug)]
pub struct PageSlot {
    phys: PhysAddr,
    refs: Arc<AtomicU32>,
}

impl PageSlot {
    pub fn new(phys: PhysAddr) -> Self {
        Self {
            phys,
            refs: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Another buffer takes a reference to the same frame.
    pub fn share(&self) -> Self {
        self.refs.fetch_add(1, Ordering::Relaxed);
        Self {
            phys: self.phys,
            refs: Arc::clone(&self.refs),
        }
    }

    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Relaxed)
    }

    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// Drop this slot's reference. Returns the frame when the count hit
    /// zero, meaning the caller now owns it and must free it.
    pub fn release(self) -> Option<PhysAddr> {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            Some(self.phys)
        } else {
            None
        }
    }

    /// Swap in a freshly allocated private frame, handing back the slot
    /// that previously occupied this position.
    pub fn replace(&mut self, phys: PhysAddr) -> PageSlot {
        core::mem::replace(self, PageSlot::new(phys))
    }
}

#[derive(Debug)]
pub enum BufferBacking {
    /// Pages allocated from a registry heap, possibly shared after a
    /// copy-on-write duplication.
    Heap { heap_id: u32, pages: Vec<PageSlot> },
    /// Caller-supplied physical range bound into the session.
    External { range: PhysRange },
    /// Range published under a sharing identifier by a peer subsystem.
    Secure { id: u32, range: PhysRange },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Heap,
    External,
    Secure,
}

/// Snapshot of a buffer's externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub handle: u64,
    pub size: u64,
    pub kind: BufferKind,
    pub rights: MemRights,
    pub page_count: u64,
}

#[derive(Debug)]
pub struct Buffer {
    handle: u64,
    size: u64,
    rights: MemRights,
    backing: BufferBacking,
}

impl Buffer {
    pub fn new_heap(
        handle: u64,
        size: u64,
        rights: MemRights,
        heap_id: u32,
        frames: Vec<PhysAddr>,
    ) -> Self {
        let pages = frames.into_iter().map(PageSlot::new).collect();
        Self {
            handle,
            size,
            rights,
            backing: BufferBacking::Heap { heap_id, pages },
        }
    }

    /// Wrap page slots that may already be shared with another buffer.
    pub fn from_slots(
        handle: u64,
        size: u64,
        rights: MemRights,
        heap_id: u32,
        pages: Vec<PageSlot>,
    ) -> Self {
        Self {
            handle,
            size,
            rights,
            backing: BufferBacking::Heap { heap_id, pages },
        }
    }

    pub fn new_bound(handle: u64, size: u64, rights: MemRights, backing: BufferBacking) -> Self {
        Self {
            handle,
            size,
            rights,
            backing,
        }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn rights(&self) -> MemRights {
        self.rights
    }

    pub fn backing(&self) -> &BufferBacking {
        &self.backing
    }

    pub fn backing_mut(&mut self) -> &mut BufferBacking {
        &mut self.backing
    }

    pub fn kind(&self) -> BufferKind {
        match self.backing {
            BufferBacking::Heap { .. } => BufferKind::Heap,
            BufferBacking::External { .. } => BufferKind::External,
            BufferBacking::Secure { .. } => BufferKind::Secure,
        }
    }

    pub fn page_count(&self) -> u64 {
        match &self.backing {
            BufferBacking::Heap { pages, .. } => pages.len() as u64,
            BufferBacking::External { .. } | BufferBacking::Secure { .. } => 0,
        }
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            handle: self.handle,
            size: self.size,
            kind: self.kind(),
            rights: self.rights,
            page_count: self.page_count(),
        }
    }

    /// Release every page reference, freeing frames whose count hit zero
    /// through `free_frame`. Returns the number of frames actually freed.
    pub fn release_pages(&mut self, mut free_frame: impl FnMut(u32, PhysAddr)) -> u64 {
        let BufferBacking::Heap { heap_id, pages } = &mut self.backing else {
            return 0;
        };
        let heap_id = *heap_id;
        let mut freed = 0;
        for slot in pages.drain(..) {
            if let Some(phys) = slot.release() {
                free_frame(heap_id, phys);
                freed += 1;
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_release_frees_only_last_reference() {
        let a = PageSlot::new(0x1000);
        let b = a.share();
        assert_eq!(a.ref_count(), 2);
        assert!(a.release().is_none());
        assert_eq!(b.release(), Some(0x1000));
    }

    #[test]
    fn heap_buffer_reports_freed_frames() {
        let mut buf = Buffer::new_heap(
            1,
            0x3000,
            MemRights::READ | MemRights::WRITE,
            0,
            alloc::vec![0x1000, 0x2000, 0x3000],
        );
        let mut freed = Vec::new();
        let count = buf.release_pages(|heap, phys| {
            assert_eq!(heap, 0);
            freed.push(phys);
        });
        assert_eq!(count, 3);
        assert_eq!(freed, alloc::vec![0x1000, 0x2000, 0x3000]);
        assert_eq!(buf.page_count(), 0);
    }

    #[test]
    fn shared_pages_survive_one_owner_release() {
        let mut a = Buffer::new_heap(1, 0x1000, MemRights::READ, 0, alloc::vec![0x5000]);
        let shared = match a.backing() {
            BufferBacking::Heap { pages, .. } => pages[0].share(),
            _ => unreachable!(),
        };
        let count = a.release_pages(|_, _| panic!("frame still referenced"));
        assert_eq!(count, 0);
        assert_eq!(shared.release(), Some(0x5000));
    }

    #[test]
    fn bound_buffer_has_no_pages() {
        let mut buf = Buffer::new_bound(
            7,
            0x2000,
            MemRights::READ,
            BufferBacking::External {
                range: PhysRange {
                    base: 0x9000_0000,
                    size: 0x2000,
                },
            },
        );
        assert_eq!(buf.kind(), BufferKind::External);
        assert_eq!(buf.release_pages(|_, _| ()), 0);
    }
}
