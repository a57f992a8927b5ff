//! Access to caller-owned memory.
//!
//! Every byte that crosses the privilege boundary moves through a
//! [`UserSpace`] implementation. Nothing in this crate dereferences a
//! caller pointer directly; addresses stay plain integers until an
//! address space turns them into data.

use gvm_abi::{MemError, MemResult};

use alloc::vec;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// A caller's address space as seen from the privileged side.
pub trait UserSpace {
    /// Whether `[addr, addr + len)` is mapped with the given access.
    fn check_access(&self, addr: u64, len: u64, access: Access) -> bool;
    /// Copy `dst.len()` bytes in from `addr`.
    fn copy_in(&self, addr: u64, dst: &mut [u8]) -> MemResult<()>;
    /// Copy `src` out to `addr`.
    fn copy_out(&mut self, addr: u64, src: &[u8]) -> MemResult<()>;
}

/// Reject empty and wrapping caller ranges before any access check.
pub fn validate_user_range(addr: u64, len: u64) -> MemResult<()> {
    if len == 0 || addr.checked_add(len).is_none() {
        return Err(MemError::InvalidArgument);
    }
    Ok(())
}

const COPY_CHUNK: usize = 256;

/// Copy between two caller ranges, staging through privileged scratch.
/// Returns the bytes copied, which is less than `size` when a fault
/// stops the copy part-way.
pub fn safe_copy(user: &mut dyn UserSpace, dest: u64, src: u64, size: u64) -> MemResult<u64> {
    validate_user_range(src, size)?;
    validate_user_range(dest, size)?;
    if !user.check_access(src, size, Access::Read)
        || !user.check_access(dest, size, Access::Write)
    {
        return Err(MemError::InvalidArgument);
    }

    let mut chunk = [0u8; COPY_CHUNK];
    let mut copied = 0u64;
    while copied < size {
        let step = core::cmp::min(COPY_CHUNK as u64, size - copied) as usize;
        if user.copy_in(src + copied, &mut chunk[..step]).is_err() {
            break;
        }
        if user.copy_out(dest + copied, &chunk[..step]).is_err() {
            break;
        }
        copied += step as u64;
    }
    Ok(copied)
}

/// In-process address space used by embedder tests. Backed by a flat
/// byte vector at a fixed base, with one-shot write fault injection for
/// exercising rollback paths.
pub struct FlatUserSpace {
    base: u64,
    mem: Vec<u8>,
    fail_next_write: bool,
}

impl FlatUserSpace {
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            mem: vec![0; len],
            fail_next_write: false,
        }
    }

    /// Make the next `copy_out` fault.
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    fn offset(&self, addr: u64, len: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base)?;
        let end = off.checked_add(len)?;
        if end <= self.mem.len() as u64 {
            Some(off as usize)
        } else {
            None
        }
    }

    pub fn read(&self, addr: u64, len: usize) -> &[u8] {
        let off = self.offset(addr, len as u64).expect("range in bounds");
        &self.mem[off..off + len]
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) {
        let off = self.offset(addr, data.len() as u64).expect("range in bounds");
        self.mem[off..off + data.len()].copy_from_slice(data);
    }
}

impl UserSpace for FlatUserSpace {
    fn check_access(&self, addr: u64, len: u64, _access: Access) -> bool {
        self.offset(addr, len).is_some()
    }

    fn copy_in(&self, addr: u64, dst: &mut [u8]) -> MemResult<()> {
        let off = self
            .offset(addr, dst.len() as u64)
            .ok_or(MemError::Fault)?;
        dst.copy_from_slice(&self.mem[off..off + dst.len()]);
        Ok(())
    }

    fn copy_out(&mut self, addr: u64, src: &[u8]) -> MemResult<()> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(MemError::Fault);
        }
        let off = self
            .offset(addr, src.len() as u64)
            .ok_or(MemError::Fault)?;
        self.mem[off..off + src.len()].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn range_validation_rejects_empty_and_wrap() {
        assert_eq!(
            validate_user_range(0x1000, 0).unwrap_err(),
            MemError::InvalidArgument
        );
        assert_eq!(
            validate_user_range(u64::MAX - 3, 8).unwrap_err(),
            MemError::InvalidArgument
        );
        assert!(validate_user_range(0x1000, 8).is_ok());
    }

    #[test]
    fn safe_copy_moves_bytes_between_ranges() {
        let mut user = FlatUserSpace::new(0x1000, 0x2000);
        user.write(0x1000, b"hello world");
        let copied = safe_copy(&mut user, 0x2000, 0x1000, 11).unwrap();
        assert_eq!(copied, 11);
        assert_eq!(user.read(0x2000, 11), b"hello world");
    }

    #[test]
    fn safe_copy_spans_multiple_chunks() {
        let mut user = FlatUserSpace::new(0, 0x1000);
        let pattern: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        user.write(0, &pattern);
        let copied = safe_copy(&mut user, 0x800, 0, 600).unwrap();
        assert_eq!(copied, 600);
        assert_eq!(user.read(0x800, 600), &pattern[..]);
    }

    #[test]
    fn safe_copy_rejects_unmapped_ranges() {
        let mut user = FlatUserSpace::new(0x1000, 0x1000);
        assert_eq!(
            safe_copy(&mut user, 0x1000, 0x9000, 16).unwrap_err(),
            MemError::InvalidArgument
        );
        assert_eq!(
            safe_copy(&mut user, 0x9000, 0x1000, 16).unwrap_err(),
            MemError::InvalidArgument
        );
    }

    #[test]
    fn safe_copy_reports_partial_progress_on_fault() {
        let mut user = FlatUserSpace::new(0, 0x1000);
        user.write(0, &[0xAB; 600]);
        user.fail_next_write();
        // First chunk faults, so nothing lands.
        let copied = safe_copy(&mut user, 0x800, 0, 600).unwrap();
        assert_eq!(copied, 0);
        // The injected fault is one-shot; a retry completes.
        let copied = safe_copy(&mut user, 0x800, 0, 600).unwrap();
        assert_eq!(copied, 600);
    }

    proptest! {
        #[test]
        fn range_validation_accepts_exactly_non_empty_non_wrapping(
            addr in any::<u64>(),
            len in any::<u64>(),
        ) {
            let ok = len > 0 && addr.checked_add(len).is_some();
            prop_assert_eq!(validate_user_range(addr, len).is_ok(), ok);
        }

        #[test]
        fn safe_copy_preserves_in_bounds_payloads(
            payload in proptest::collection::vec(any::<u8>(), 1..=700),
        ) {
            let mut user = FlatUserSpace::new(0, 0x1000);
            user.write(0, &payload);
            let size = payload.len() as u64;
            let copied = safe_copy(&mut user, 0x800, 0, size).unwrap();
            prop_assert_eq!(copied, size);
            prop_assert_eq!(user.read(0x800, payload.len()), &payload[..]);
        }
    }
}
