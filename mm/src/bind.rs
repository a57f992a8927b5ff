//! Binding caller-described memory into a session.
//!
//! Bound buffers do not come from the heap set. They either wrap a raw
//! physical range named by the caller or resolve a sharing identifier
//! published by a peer subsystem through [`SharingRegistry`].

use gvm_abi::{BackingKind, MemError, MemResult, MemRights};
use gvm_lib::klog_debug;

use crate::buffer::{BufferBacking, BufferKind};
use crate::constants::PAGE_SIZE_4KB;
use crate::heap::PhysRange;

/// Resolver for secure sharing identifiers owned by another subsystem.
/// A successful `lookup` takes a reference that `release` returns.
pub trait SharingRegistry: Send + Sync {
    fn lookup(&self, id: u32) -> Option<PhysRange>;
    fn release(&self, id: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindBacking {
    External { phys_addr: u64 },
    Secure { id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    pub size: u64,
    pub backing: BindBacking,
    pub rights: MemRights,
}

/// Validate a bind request and resolve it to buffer backing.
pub fn resolve_backing(
    sharing: Option<&dyn SharingRegistry>,
    request: &BindRequest,
) -> MemResult<BufferBacking> {
    if request.size == 0 || request.size % PAGE_SIZE_4KB != 0 {
        return Err(MemError::InvalidArgument);
    }
    match request.backing {
        BindBacking::External { phys_addr } => {
            if phys_addr % PAGE_SIZE_4KB != 0 || phys_addr.checked_add(request.size).is_none() {
                return Err(MemError::InvalidArgument);
            }
            klog_debug!("bind: external range {:#x}+{:#x}", phys_addr, request.size);
            Ok(BufferBacking::External {
                range: PhysRange {
                    base: phys_addr,
                    size: request.size,
                },
            })
        }
        #[cfg(feature = "secure-sharing")]
        BindBacking::Secure { id } => {
            let sharing = sharing.ok_or(MemError::Unsupported)?;
            let range = sharing.lookup(id).ok_or(MemError::NotFound)?;
            if request.size > range.size {
                sharing.release(id);
                return Err(MemError::InvalidArgument);
            }
            klog_debug!("bind: secure id {} -> {:#x}", id, range.base);
            Ok(BufferBacking::Secure { id, range })
        }
        #[cfg(not(feature = "secure-sharing"))]
        BindBacking::Secure { .. } => {
            let _ = sharing;
            Err(MemError::Unsupported)
        }
    }
}

/// Drop whatever reference `resolve_backing` took.
pub fn release_backing(sharing: Option<&dyn SharingRegistry>, backing: &BufferBacking) {
    if let BufferBacking::Secure { id, .. } = backing
        && let Some(sharing) = sharing
    {
        sharing.release(*id);
    }
}

/// Check that an unbind names the kind of backing the buffer actually
/// has. A mismatch is treated as naming a buffer that does not exist.
pub fn check_unbind_kind(kind: BufferKind, requested: BackingKind) -> MemResult<()> {
    let matches = matches!(
        (kind, requested),
        (BufferKind::External, BackingKind::External) | (BufferKind::Secure, BackingKind::Secure)
    );
    if matches {
        Ok(())
    } else {
        Err(MemError::NotFound)
    }
}
