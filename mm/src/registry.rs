//! Fixed set of heaps assembled at init and immutable afterwards.
//!
//! The registry is a value owned by [`crate::manager::MemoryManager`], not
//! a global. Building it either succeeds with every configured heap ready
//! or fails with everything already built torn back down.

use alloc::boxed::Box;
use alloc::vec::Vec;

use gvm_abi::{HeapKind, MemError, MemResult};
use gvm_lib::{klog_info, klog_warn};

use crate::constants::MAX_HEAPS;
use crate::heap::{Heap, HeapBackend, PhysAddr, PhysRange};

/// Declarative description of one heap, consumed by [`HeapRegistry::init`].
pub enum HeapSpec {
    General {
        id: u32,
        name: &'static str,
        backend: Box<dyn HeapBackend>,
    },
    Carveout {
        id: u32,
        name: &'static str,
        range: PhysRange,
    },
}

impl HeapSpec {
    fn identity(&self) -> (HeapKind, u32) {
        match self {
            HeapSpec::General { id, .. } => (HeapKind::General, *id),
            HeapSpec::Carveout { id, .. } => (HeapKind::Carveout, *id),
        }
    }
}

/// Aggregate accounting across every configured heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub allocated_bytes: u64,
}

#[derive(Debug)]
pub struct HeapRegistry {
    heaps: Vec<Heap>,
    sealed: bool,
}

impl HeapRegistry {
    /// Build every configured heap and seal the set. A failure part-way
    /// drops the heaps built so far before returning.
    pub fn init(specs: Vec<HeapSpec>) -> MemResult<Self> {
        if specs.is_empty() {
            return Err(MemError::InvalidArgument);
        }
        let mut registry = Self {
            heaps: Vec::with_capacity(specs.len()),
            sealed: false,
        };
        for spec in specs {
            if let Err(err) = registry.register_heap(spec) {
                klog_warn!("registry: heap rejected, unwinding init");
                return Err(err);
            }
        }
        registry.seal();
        Ok(registry)
    }

    /// Add one heap to an unsealed registry. Duplicate `(kind, id)`
    /// identities and registration after sealing are rejected.
    pub fn register_heap(&mut self, spec: HeapSpec) -> MemResult<u32> {
        if self.sealed || self.heaps.len() >= MAX_HEAPS {
            return Err(MemError::InvalidArgument);
        }
        let identity = spec.identity();
        if self.heaps.iter().any(|h| (h.kind(), h.id()) == identity) {
            return Err(MemError::InvalidArgument);
        }
        let heap = match spec {
            HeapSpec::General { id, name, backend } => Heap::general(id, name, backend),
            HeapSpec::Carveout { id, name, range } => Heap::carveout(id, name, range)?,
        };
        let id = heap.id();
        self.heaps.push(heap);
        Ok(id)
    }

    /// Freeze the heap set. Allocation never mutates it afterwards.
    pub fn seal(&mut self) {
        self.sealed = true;
        klog_info!("registry: {} heap(s) configured", self.heaps.len());
    }

    fn find_by_kind(&self, kind: HeapKind) -> Option<&Heap> {
        self.heaps.iter().find(|h| h.kind() == kind)
    }

    pub fn find_by_id(&self, heap_id: u32) -> Option<&Heap> {
        self.heaps.iter().find(|h| h.id() == heap_id)
    }

    /// Allocate `count` pages one frame at a time from the first heap of
    /// `kind`. Frames need not be contiguous. On mid-run exhaustion the
    /// frames already taken go back before the error surfaces.
    pub fn allocate_pages(&self, kind: HeapKind, count: u64) -> MemResult<(u32, Vec<PhysAddr>)> {
        let heap = self.find_by_kind(kind).ok_or(MemError::NotFound)?;
        let mut pages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match heap.alloc_pages(1) {
                Ok(addr) => pages.push(addr),
                Err(err) => {
                    for addr in pages {
                        heap.free_pages(addr, 1);
                    }
                    return Err(err);
                }
            }
        }
        Ok((heap.id(), pages))
    }

    /// Single-page allocation from a specific heap, used when a buffer's
    /// pages must stay on the heap that produced them.
    pub fn alloc_page_from(&self, heap_id: u32) -> MemResult<PhysAddr> {
        let heap = self.find_by_id(heap_id).ok_or(MemError::NotFound)?;
        heap.alloc_pages(1)
    }

    pub fn free_page(&self, heap_id: u32, addr: PhysAddr) {
        match self.find_by_id(heap_id) {
            Some(heap) => heap.free_pages(addr, 1),
            None => klog_warn!("registry: free on unknown heap {}", heap_id),
        }
    }

    pub fn heaps(&self) -> impl Iterator<Item = &Heap> {
        self.heaps.iter()
    }

    pub fn usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for heap in &self.heaps {
            let h = heap.usage();
            usage.total_bytes += h.total_bytes;
            usage.free_bytes += h.free_bytes;
            usage.allocated_bytes += h.allocated_bytes;
        }
        usage
    }

    /// Drops every heap. Callers are expected to have released all
    /// buffers first; anything still allocated is reported, not leaked
    /// silently.
    pub fn shutdown(self) {
        let leaked = self.usage().allocated_bytes;
        if leaked != 0 {
            klog_warn!("registry: shutdown with {} byte(s) still allocated", leaked);
        } else {
            klog_info!("registry: shutdown clean");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PAGE_SIZE_4KB;
    use crate::heap::PoolBackend;

    fn pool(pages: u64) -> Box<dyn HeapBackend> {
        Box::new(PoolBackend::new(0x1000_0000, pages * PAGE_SIZE_4KB).unwrap())
    }

    fn two_heap_registry() -> HeapRegistry {
        HeapRegistry::init(alloc::vec![
            HeapSpec::General {
                id: 0,
                name: "general",
                backend: pool(32),
            },
            HeapSpec::Carveout {
                id: 1,
                name: "carveout",
                range: PhysRange {
                    base: 0x8000_0000,
                    size: 8 * PAGE_SIZE_4KB,
                },
            },
        ])
        .unwrap()
    }

    #[test]
    fn init_rejects_duplicate_identity() {
        let err = HeapRegistry::init(alloc::vec![
            HeapSpec::General {
                id: 3,
                name: "a",
                backend: pool(4),
            },
            HeapSpec::General {
                id: 3,
                name: "b",
                backend: pool(4),
            },
        ])
        .unwrap_err();
        assert_eq!(err, MemError::InvalidArgument);
    }

    #[test]
    fn init_rejects_empty_and_oversized_sets() {
        assert_eq!(
            HeapRegistry::init(Vec::new()).unwrap_err(),
            MemError::InvalidArgument
        );
        let mut specs = Vec::new();
        for id in 0..(MAX_HEAPS as u32 + 1) {
            specs.push(HeapSpec::Carveout {
                id,
                name: "c",
                range: PhysRange {
                    base: 0x1_0000_0000 + id as u64 * 0x10_0000,
                    size: PAGE_SIZE_4KB,
                },
            });
        }
        assert_eq!(
            HeapRegistry::init(specs).unwrap_err(),
            MemError::InvalidArgument
        );
    }

    #[test]
    fn registration_after_seal_is_rejected() {
        let mut registry = two_heap_registry();
        let err = registry
            .register_heap(HeapSpec::General {
                id: 9,
                name: "late",
                backend: pool(4),
            })
            .unwrap_err();
        assert_eq!(err, MemError::InvalidArgument);
    }

    #[test]
    fn init_unwinds_on_bad_carveout() {
        let err = HeapRegistry::init(alloc::vec![
            HeapSpec::General {
                id: 0,
                name: "general",
                backend: pool(4),
            },
            HeapSpec::Carveout {
                id: 1,
                name: "bad",
                range: PhysRange {
                    base: 0x123,
                    size: PAGE_SIZE_4KB,
                },
            },
        ])
        .unwrap_err();
        assert_eq!(err, MemError::InvalidArgument);
    }

    #[test]
    fn allocation_routes_by_kind() {
        let registry = two_heap_registry();
        let (general_id, pages) = registry.allocate_pages(HeapKind::General, 3).unwrap();
        assert_eq!(general_id, 0);
        assert_eq!(pages.len(), 3);
        let (carveout_id, co_pages) = registry.allocate_pages(HeapKind::Carveout, 2).unwrap();
        assert_eq!(carveout_id, 1);
        assert!(co_pages.iter().all(|&p| p >= 0x8000_0000));
        for p in pages {
            registry.free_page(general_id, p);
        }
        for p in co_pages {
            registry.free_page(carveout_id, p);
        }
        assert_eq!(registry.usage().allocated_bytes, 0);
    }

    #[test]
    fn exhaustion_rolls_back_partial_runs() {
        let registry = two_heap_registry();
        // Carveout heap has 8 pages total.
        let err = registry.allocate_pages(HeapKind::Carveout, 9).unwrap_err();
        assert_eq!(err, MemError::OutOfMemory);
        assert_eq!(registry.usage().allocated_bytes, 0);
    }

    #[test]
    fn missing_kind_is_not_found() {
        let registry = HeapRegistry::init(alloc::vec![HeapSpec::General {
            id: 0,
            name: "general",
            backend: pool(4),
        }])
        .unwrap();
        assert_eq!(
            registry.allocate_pages(HeapKind::Carveout, 1).unwrap_err(),
            MemError::NotFound
        );
    }

    #[test]
    fn usage_aggregates_all_heaps() {
        let registry = two_heap_registry();
        let usage = registry.usage();
        assert_eq!(usage.total_bytes, 40 * PAGE_SIZE_4KB);
        assert_eq!(usage.allocated_bytes, 0);
        assert_eq!(usage.free_bytes, usage.total_bytes);
    }
}
