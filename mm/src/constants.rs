//! Memory-manager constants.

/// Page granularity of every heap.
pub const PAGE_SIZE_4KB: u64 = 0x1000;

/// Maximum number of configured heaps.
pub const MAX_HEAPS: usize = 4;

/// Maximum number of live buffers per session.
pub const MAX_BUFFERS_PER_SESSION: usize = 64;

/// Per-buffer size limit (allocate, bind, resize).
pub const MAX_BUFFER_SIZE: u64 = 64 * 1024 * 1024;

/// Hard cap on the page-table dump scratch buffer. More than enough for a
/// fully populated page table; bounds kernel-side work for a call that has
/// no other limit.
pub const DUMP_SIZE_CAP: u64 = 8 * 1024 * 1024;

/// Convert a byte count to whole pages, rounding up.
#[inline(always)]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE_4KB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE_4KB), 1);
        assert_eq!(pages_for(PAGE_SIZE_4KB + 1), 2);
        assert_eq!(pages_for(0), 0);
    }
}
