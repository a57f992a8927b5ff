//! Diagnostic dump of the manager's state into a caller buffer.
//!
//! The dump is assembled in privileged scratch memory first. Addresses
//! embedded in the header point into that scratch while it is being
//! built and are rebased onto the caller's buffer just before the copy
//! out, so the caller only ever sees addresses inside its own range.
//! The scratch is a plain `Vec` and is dropped on every exit path.

use alloc::vec;
use alloc::vec::Vec;

use gvm_abi::{MemError, MemResult};
use gvm_lib::klog_debug;

use crate::constants::DUMP_SIZE_CAP;
use crate::user_mem::{validate_user_range, UserSpace};

pub const DUMP_MAGIC: u32 = 0x4756_4D44;
pub const DUMP_VERSION: u32 = 1;

/// magic, version, two (addr, size) section references.
const HEADER_SIZE: usize = 32;
/// Each section entry is a pair of words.
const ENTRY_SIZE: usize = 16;

/// Where the dump sections landed in the caller's buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpResult {
    pub register_writes: u64,
    pub register_writes_size: u32,
    pub page_table_dump: u64,
    pub page_table_dump_size: u32,
}

/// State snapshot to serialize: per-heap accounting entries and per-page
/// mappings, each a pair of words.
#[derive(Default)]
pub struct DumpContent {
    pub register_entries: Vec<[u64; 2]>,
    pub page_entries: Vec<[u64; 2]>,
}

impl DumpContent {
    pub fn required_size(&self) -> u64 {
        (HEADER_SIZE
            + (self.register_entries.len() + self.page_entries.len()) * ENTRY_SIZE) as u64
    }
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_ne_bytes());
}

fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_ne_bytes());
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Serialize `content` into the caller buffer at `buffer`.
///
/// The caller's size is validated before any scratch is allocated; a
/// zero or over-cap size never costs privileged memory.
pub fn write_dump(
    user: &mut dyn UserSpace,
    buffer: u64,
    size: u64,
    content: &DumpContent,
) -> MemResult<DumpResult> {
    validate_user_range(buffer, size)?;
    if size > DUMP_SIZE_CAP {
        return Err(MemError::InvalidArgument);
    }
    let needed = content.required_size();
    if needed > size {
        return Err(MemError::InvalidArgument);
    }

    let mut scratch = vec![0u8; needed as usize];
    let kernel_base = scratch.as_ptr() as u64;
    let reg_size = (content.register_entries.len() * ENTRY_SIZE) as u32;
    let pt_size = (content.page_entries.len() * ENTRY_SIZE) as u32;
    let reg_addr = kernel_base + HEADER_SIZE as u64;
    let pt_addr = reg_addr + reg_size as u64;

    put_u32(&mut scratch, 0, DUMP_MAGIC);
    put_u32(&mut scratch, 4, DUMP_VERSION);
    put_u64(&mut scratch, 8, reg_addr);
    put_u32(&mut scratch, 16, reg_size);
    put_u64(&mut scratch, 20, pt_addr);
    put_u32(&mut scratch, 28, pt_size);

    let mut off = HEADER_SIZE;
    for entry in content.register_entries.iter().chain(&content.page_entries) {
        put_u64(&mut scratch, off, entry[0]);
        put_u64(&mut scratch, off + 8, entry[1]);
        off += ENTRY_SIZE;
    }

    // Rebase the embedded section addresses onto the caller's buffer.
    for header_off in [8usize, 20] {
        let addr = read_u64(&scratch, header_off);
        put_u64(&mut scratch, header_off, addr - kernel_base + buffer);
    }

    user.copy_out(buffer, &scratch)?;
    klog_debug!("dump: wrote {} byte(s)", needed);
    Ok(DumpResult {
        register_writes: reg_addr - kernel_base + buffer,
        register_writes_size: reg_size,
        page_table_dump: pt_addr - kernel_base + buffer,
        page_table_dump_size: pt_size,
    })
}
