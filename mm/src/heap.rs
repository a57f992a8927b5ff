//! Heap strategies backing buffer allocations.
//!
//! Two strategies exist: a general-purpose heap that delegates to the
//! platform's page allocator (an opaque [`HeapBackend`] capability handed
//! in at init), and a carveout heap that suballocates a physically
//! contiguous region reserved at configuration time. Both hand out whole
//! pages; buffer-level bookkeeping lives in [`crate::buffer`].

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use gvm_abi::{HeapKind, MemError, MemResult};
use gvm_lib::klog_debug;
use spin::Mutex;

use crate::constants::PAGE_SIZE_4KB;

/// Physical address within the managed address space.
pub type PhysAddr = u64;

/// A physically contiguous byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysRange {
    pub base: PhysAddr,
    pub size: u64,
}

impl PhysRange {
    /// End-exclusive bound; `None` if the range wraps.
    pub fn end(&self) -> Option<PhysAddr> {
        self.base.checked_add(self.size)
    }
}

/// Platform page allocator behind the general-purpose heap.
///
/// External collaborator: the manager never looks inside, it only asks for
/// physically contiguous page runs and hands them back.
pub trait HeapBackend: Send + Sync {
    /// Allocate `count` contiguous pages, or fail.
    fn alloc_pages(&self, count: u32) -> Option<PhysAddr>;
    /// Return pages obtained from `alloc_pages`.
    fn free_pages(&self, base: PhysAddr, count: u32);
    /// Total pages this backend manages, when bounded.
    fn total_pages(&self) -> Option<u64> {
        None
    }
}

/// First-fit page pool over a fixed physical range.
///
/// One bit per frame; a set bit means allocated. Used both by the carveout
/// heap and, wrapped in [`PoolBackend`], as a ready-made general backend
/// for embedders and tests.
pub struct FramePool {
    base: PhysAddr,
    frame_count: u32,
    map: Vec<u64>,
    free_frames: u32,
}

impl FramePool {
    pub fn new(base: PhysAddr, size: u64) -> MemResult<Self> {
        if size == 0
            || base % PAGE_SIZE_4KB != 0
            || size % PAGE_SIZE_4KB != 0
            || base.checked_add(size).is_none()
        {
            return Err(MemError::InvalidArgument);
        }
        let frame_count = (size / PAGE_SIZE_4KB) as u32;
        let words = (frame_count as usize).div_ceil(64);
        Ok(Self {
            base,
            frame_count,
            map: vec![0u64; words],
            free_frames: frame_count,
        })
    }

    #[inline]
    fn test_bit(&self, frame: u32) -> bool {
        self.map[(frame / 64) as usize] & (1u64 << (frame % 64)) != 0
    }

    #[inline]
    fn set_bit(&mut self, frame: u32) {
        self.map[(frame / 64) as usize] |= 1u64 << (frame % 64);
    }

    #[inline]
    fn clear_bit(&mut self, frame: u32) {
        self.map[(frame / 64) as usize] &= !(1u64 << (frame % 64));
    }

    /// First-fit search for a run of `count` free frames.
    pub fn alloc(&mut self, count: u32) -> Option<PhysAddr> {
        if count == 0 || count > self.free_frames {
            return None;
        }
        let mut run_start = 0u32;
        let mut run_len = 0u32;
        for frame in 0..self.frame_count {
            if self.test_bit(frame) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = frame;
            }
            run_len += 1;
            if run_len == count {
                for f in run_start..run_start + count {
                    self.set_bit(f);
                }
                self.free_frames -= count;
                return Some(self.base + run_start as u64 * PAGE_SIZE_4KB);
            }
        }
        None
    }

    /// Return a run previously handed out by `alloc`.
    pub fn free(&mut self, base: PhysAddr, count: u32) -> MemResult<()> {
        if base < self.base || base % PAGE_SIZE_4KB != 0 {
            return Err(MemError::InvalidArgument);
        }
        let first = ((base - self.base) / PAGE_SIZE_4KB) as u32;
        let Some(end) = first.checked_add(count) else {
            return Err(MemError::InvalidArgument);
        };
        if end > self.frame_count {
            return Err(MemError::InvalidArgument);
        }
        for frame in first..end {
            if self.test_bit(frame) {
                self.clear_bit(frame);
                self.free_frames += 1;
            }
        }
        Ok(())
    }

    pub fn free_frames(&self) -> u32 {
        self.free_frames
    }

    pub fn total_frames(&self) -> u32 {
        self.frame_count
    }
}

/// [`FramePool`] behind a lock, usable as a [`HeapBackend`].
pub struct PoolBackend {
    pool: Mutex<FramePool>,
}

impl PoolBackend {
    pub fn new(base: PhysAddr, size: u64) -> MemResult<Self> {
        Ok(Self {
            pool: Mutex::new(FramePool::new(base, size)?),
        })
    }

    pub fn free_pages_remaining(&self) -> u64 {
        self.pool.lock().free_frames() as u64
    }
}

impl HeapBackend for PoolBackend {
    fn alloc_pages(&self, count: u32) -> Option<PhysAddr> {
        self.pool.lock().alloc(count)
    }

    fn free_pages(&self, base: PhysAddr, count: u32) {
        // Out-of-range frees indicate a bookkeeping bug upstream; the pool
        // rejects them and the backend drops the error on the floor like
        // any other platform allocator would.
        let _ = self.pool.lock().free(base, count);
    }

    fn total_pages(&self) -> Option<u64> {
        Some(self.pool.lock().total_frames() as u64)
    }
}

/// Per-heap accounting snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub allocated_bytes: u64,
}

/// Identity of a configured heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDescriptor {
    pub kind: HeapKind,
    pub id: u32,
    pub name: &'static str,
    /// Fixed physical range, carveout heaps only.
    pub range: Option<PhysRange>,
}

enum HeapInner {
    General {
        backend: Box<dyn HeapBackend>,
        allocated_pages: AtomicU64,
    },
    Carveout {
        pool: Mutex<FramePool>,
    },
}

/// A configured allocation strategy plus its memory source.
pub struct Heap {
    descriptor: HeapDescriptor,
    inner: HeapInner,
}

impl core::fmt::Debug for Heap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl Heap {
    pub fn general(id: u32, name: &'static str, backend: Box<dyn HeapBackend>) -> Self {
        Self {
            descriptor: HeapDescriptor {
                kind: HeapKind::General,
                id,
                name,
                range: None,
            },
            inner: HeapInner::General {
                backend,
                allocated_pages: AtomicU64::new(0),
            },
        }
    }

    pub fn carveout(id: u32, name: &'static str, range: PhysRange) -> MemResult<Self> {
        let pool = FramePool::new(range.base, range.size)?;
        klog_debug!(
            "heap: carveout '{}' at {:#x}..{:#x}",
            name,
            range.base,
            range.base + range.size
        );
        Ok(Self {
            descriptor: HeapDescriptor {
                kind: HeapKind::Carveout,
                id,
                name,
                range: Some(range),
            },
            inner: HeapInner::Carveout {
                pool: Mutex::new(pool),
            },
        })
    }

    pub fn descriptor(&self) -> &HeapDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> HeapKind {
        self.descriptor.kind
    }

    pub fn id(&self) -> u32 {
        self.descriptor.id
    }

    pub fn alloc_pages(&self, count: u32) -> MemResult<PhysAddr> {
        let base = match &self.inner {
            HeapInner::General {
                backend,
                allocated_pages,
            } => {
                let base = backend.alloc_pages(count).ok_or(MemError::OutOfMemory)?;
                allocated_pages.fetch_add(count as u64, Ordering::Relaxed);
                base
            }
            HeapInner::Carveout { pool } => {
                pool.lock().alloc(count).ok_or(MemError::OutOfMemory)?
            }
        };
        Ok(base)
    }

    pub fn free_pages(&self, base: PhysAddr, count: u32) {
        match &self.inner {
            HeapInner::General {
                backend,
                allocated_pages,
            } => {
                backend.free_pages(base, count);
                allocated_pages.fetch_sub(count as u64, Ordering::Relaxed);
            }
            HeapInner::Carveout { pool } => {
                let _ = pool.lock().free(base, count);
            }
        }
    }

    pub fn usage(&self) -> HeapUsage {
        match &self.inner {
            HeapInner::General {
                backend,
                allocated_pages,
            } => {
                let allocated = allocated_pages.load(Ordering::Relaxed) * PAGE_SIZE_4KB;
                let total = backend.total_pages().unwrap_or(0) * PAGE_SIZE_4KB;
                HeapUsage {
                    total_bytes: total,
                    free_bytes: total.saturating_sub(allocated),
                    allocated_bytes: allocated,
                }
            }
            HeapInner::Carveout { pool } => {
                let pool = pool.lock();
                let total = pool.total_frames() as u64 * PAGE_SIZE_4KB;
                let free = pool.free_frames() as u64 * PAGE_SIZE_4KB;
                HeapUsage {
                    total_bytes: total,
                    free_bytes: free,
                    allocated_bytes: total - free,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_alloc_free_round_trip() {
        let mut pool = FramePool::new(0x1000_0000, 16 * PAGE_SIZE_4KB).unwrap();
        assert_eq!(pool.free_frames(), 16);
        let a = pool.alloc(4).unwrap();
        assert_eq!(a, 0x1000_0000);
        assert_eq!(pool.free_frames(), 12);
        pool.free(a, 4).unwrap();
        assert_eq!(pool.free_frames(), 16);
    }

    #[test]
    fn pool_first_fit_skips_holes() {
        let mut pool = FramePool::new(0, 8 * PAGE_SIZE_4KB).unwrap();
        let a = pool.alloc(2).unwrap();
        let b = pool.alloc(2).unwrap();
        let _c = pool.alloc(2).unwrap();
        pool.free(a, 2).unwrap();
        pool.free(b, 2).unwrap();
        // A four-page run only exists at the freed front.
        let d = pool.alloc(4).unwrap();
        assert_eq!(d, 0);
        // Remaining free run is the tail two pages.
        assert!(pool.alloc(4).is_none());
        assert!(pool.alloc(2).is_some());
    }

    #[test]
    fn pool_rejects_bad_geometry() {
        assert!(FramePool::new(0x10, PAGE_SIZE_4KB).is_err());
        assert!(FramePool::new(0, 100).is_err());
        assert!(FramePool::new(0, 0).is_err());
        assert!(FramePool::new(u64::MAX - 0xFFF, PAGE_SIZE_4KB * 2).is_err());
    }

    #[test]
    fn pool_free_out_of_range_is_error() {
        let mut pool = FramePool::new(0x4000, 4 * PAGE_SIZE_4KB).unwrap();
        assert_eq!(pool.free(0, 1), Err(MemError::InvalidArgument));
        assert_eq!(
            pool.free(0x4000, 5),
            Err(MemError::InvalidArgument)
        );
    }

    #[test]
    fn carveout_heap_accounts_usage() {
        let heap = Heap::carveout(
            1,
            "carveout",
            PhysRange {
                base: 0x2000_0000,
                size: 8 * PAGE_SIZE_4KB,
            },
        )
        .unwrap();
        let before = heap.usage();
        assert_eq!(before.allocated_bytes, 0);
        let base = heap.alloc_pages(3).unwrap();
        assert_eq!(heap.usage().allocated_bytes, 3 * PAGE_SIZE_4KB);
        heap.free_pages(base, 3);
        assert_eq!(heap.usage(), before);
    }

    #[test]
    fn general_heap_tracks_backend_allocations() {
        let backend = Box::new(PoolBackend::new(0, 32 * PAGE_SIZE_4KB).unwrap());
        let heap = Heap::general(0, "general", backend);
        let base = heap.alloc_pages(2).unwrap();
        assert_eq!(heap.usage().allocated_bytes, 2 * PAGE_SIZE_4KB);
        heap.free_pages(base, 2);
        assert_eq!(heap.usage().allocated_bytes, 0);
    }
}
