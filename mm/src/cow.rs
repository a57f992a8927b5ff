//! Copy-on-write duplication, range privatization and resizing.
//!
//! Duplication shares every page of the source, bumping each frame
//! count. Privatization walks a byte range and gives the buffer its own
//! frame wherever the count is above one, so repeating the same range is
//! a no-op. Only heap-backed buffers participate; bound memory belongs
//! to someone else.

use alloc::vec::Vec;

use gvm_abi::{MemError, MemResult, MemRights};
use gvm_lib::klog_debug;

use crate::buffer::{Buffer, BufferBacking, PageSlot};
use crate::constants::{MAX_BUFFER_SIZE, PAGE_SIZE_4KB, pages_for};
use crate::registry::HeapRegistry;

/// Share the source buffer's pages for a new buffer. Returns the heap,
/// size, rights and slot vector the caller wraps into the duplicate.
pub fn duplicate(src: &Buffer) -> MemResult<(u32, u64, MemRights, Vec<PageSlot>)> {
    let BufferBacking::Heap { heap_id, pages } = src.backing() else {
        return Err(MemError::InvalidArgument);
    };
    let shared = pages.iter().map(PageSlot::share).collect();
    Ok((*heap_id, src.size(), src.rights(), shared))
}

/// Give the buffer private frames across `[start, start + len)`.
/// Returns how many pages actually changed. Pages already private are
/// left alone. On exhaustion mid-range the pages privatized so far keep
/// their new frames and the error surfaces.
pub fn modify_range(
    registry: &HeapRegistry,
    buffer: &mut Buffer,
    start: u64,
    len: u64,
) -> MemResult<u64> {
    if !buffer.rights().contains(MemRights::WRITE) {
        return Err(MemError::PermissionDenied);
    }
    let end = start.checked_add(len).ok_or(MemError::InvalidArgument)?;
    if end > buffer.size() {
        return Err(MemError::InvalidArgument);
    }
    let BufferBacking::Heap { heap_id, pages } = buffer.backing_mut() else {
        return Err(MemError::InvalidArgument);
    };
    let heap_id = *heap_id;
    if len == 0 {
        return Ok(0);
    }

    let first = (start / PAGE_SIZE_4KB) as usize;
    let last = (end.div_ceil(PAGE_SIZE_4KB)) as usize;
    let mut changed = 0;
    for slot in &mut pages[first..last] {
        if !slot.is_shared() {
            continue;
        }
        let fresh = registry.alloc_page_from(heap_id)?;
        let old = slot.replace(fresh);
        if let Some(phys) = old.release() {
            // The peer dropped its reference between the check and the
            // swap; the old frame is ours to return.
            registry.free_page(heap_id, phys);
        }
        changed += 1;
    }
    if changed != 0 {
        klog_debug!(
            "cow: privatized {} page(s) of handle {}",
            changed,
            buffer.handle()
        );
    }
    Ok(changed)
}

/// Grow or shrink a heap-backed buffer in place. Returns the previous
/// size so the session can fix its byte accounting.
pub fn resize(registry: &HeapRegistry, buffer: &mut Buffer, new_size: u64) -> MemResult<u64> {
    if !buffer.rights().contains(MemRights::WRITE) {
        return Err(MemError::PermissionDenied);
    }
    if new_size == 0 || new_size > MAX_BUFFER_SIZE {
        return Err(MemError::InvalidArgument);
    }
    let old_size = buffer.size();
    let BufferBacking::Heap { heap_id, pages } = buffer.backing_mut() else {
        return Err(MemError::InvalidArgument);
    };
    let heap_id = *heap_id;

    let old_pages = pages.len() as u64;
    let new_pages = pages_for(new_size);
    if new_pages > old_pages {
        let mut fresh = Vec::with_capacity((new_pages - old_pages) as usize);
        for _ in old_pages..new_pages {
            match registry.alloc_page_from(heap_id) {
                Ok(phys) => fresh.push(phys),
                Err(err) => {
                    for phys in fresh {
                        registry.free_page(heap_id, phys);
                    }
                    return Err(err);
                }
            }
        }
        pages.extend(fresh.into_iter().map(PageSlot::new));
    } else {
        for slot in pages.drain(new_pages as usize..) {
            if let Some(phys) = slot.release() {
                registry.free_page(heap_id, phys);
            }
        }
    }
    buffer.set_size(new_size);
    Ok(old_size)
}
