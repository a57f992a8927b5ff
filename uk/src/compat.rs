//! Entry points for callers using the 32-bit pointer layout.
//!
//! Same records, same semantics; only the wire width of pointer-sized
//! fields differs. Each function forwards to the shared marshaling core
//! with the compat layout selected.

use gvm_abi::{MemResult, WireFormat};
use gvm_mm::{MemoryManager, UserSpace};

use crate::wrappers;

pub fn mem_allocate_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::allocate(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_free_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::free(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_bind_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::bind(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_unbind_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::unbind(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_cow_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::cow(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_cow_modify_range_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::cow_modify_range(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_resize_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::resize(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_usage_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::usage(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_query_dump_size_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::query_dump_size(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_dump_page_tables_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::dump_page_tables(mgr, session, user, addr, WireFormat::Compat32)
}

pub fn mem_write_safe_compat(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    wrappers::write_safe(mgr, session, user, addr, WireFormat::Compat32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::testutil::{get_record, manager, put_record, user_space, RECORD_ADDR};
    use crate::wrappers::{mem_allocate, mem_bind};
    use gvm_abi::{AllocRecord, BackingKind, BindRecord, MemError, MemRights, WireRecord};
    use gvm_mm::PAGE_SIZE_4KB;

    #[test]
    fn compat_alloc_matches_native_alloc() {
        let mgr = manager();
        let session = mgr.open_session();
        let mut user = user_space();

        let rec = AllocRecord {
            size: 3 * PAGE_SIZE_4KB,
            heap_kind: 0,
            rights: (MemRights::READ | MemRights::WRITE).bits(),
            ..Default::default()
        };
        put_record(&mut user, RECORD_ADDR, &rec, WireFormat::Native);
        mem_allocate(&mgr, session, &mut user, RECORD_ADDR).unwrap();
        let native: AllocRecord = get_record(&user, RECORD_ADDR, WireFormat::Native);

        put_record(&mut user, RECORD_ADDR, &rec, WireFormat::Compat32);
        mem_allocate_compat(&mgr, session, &mut user, RECORD_ADDR).unwrap();
        let compat: AllocRecord = get_record(&user, RECORD_ADDR, WireFormat::Compat32);

        assert_ne!(native.handle, compat.handle);
        let a = mgr.buffer_info(session, native.handle).unwrap();
        let b = mgr.buffer_info(session, compat.handle).unwrap();
        assert_eq!(a.size, b.size);
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.rights, b.rights);
        assert_eq!(a.page_count, b.page_count);
    }

    #[test]
    fn compat_record_is_narrower_on_the_wire() {
        let mgr = manager();
        let session = mgr.open_session();
        let mut user = user_space();

        // Sentinel bytes just past the compat image must survive.
        let compat_size = AllocRecord::wire_size(WireFormat::Compat32);
        assert!(compat_size < AllocRecord::wire_size(WireFormat::Native));
        user.write(RECORD_ADDR + compat_size as u64, &[0x5A; 8]);

        let rec = AllocRecord {
            size: PAGE_SIZE_4KB,
            heap_kind: 0,
            rights: MemRights::READ.bits(),
            ..Default::default()
        };
        put_record(&mut user, RECORD_ADDR, &rec, WireFormat::Compat32);
        mem_allocate_compat(&mgr, session, &mut user, RECORD_ADDR).unwrap();
        assert_eq!(user.read(RECORD_ADDR + compat_size as u64, 8), &[0x5A; 8]);
    }

    #[test]
    fn compat_bind_matches_native_bind() {
        let mgr = manager();
        let session = mgr.open_session();
        let mut user = user_space();

        let rec = BindRecord {
            size: 2 * PAGE_SIZE_4KB,
            phys_addr: 0x9000_0000,
            backing_kind: BackingKind::External as u32,
            rights: (MemRights::READ | MemRights::WRITE).bits(),
            ..Default::default()
        };
        put_record(&mut user, RECORD_ADDR, &rec, WireFormat::Native);
        mem_bind(&mgr, session, &mut user, RECORD_ADDR).unwrap();
        let native: BindRecord = get_record(&user, RECORD_ADDR, WireFormat::Native);

        put_record(&mut user, RECORD_ADDR, &rec, WireFormat::Compat32);
        mem_bind_compat(&mgr, session, &mut user, RECORD_ADDR).unwrap();
        let compat: BindRecord = get_record(&user, RECORD_ADDR, WireFormat::Compat32);

        assert_ne!(native.handle, compat.handle);
        assert_eq!(compat.ctx, 0);
        let a = mgr.buffer_info(session, native.handle).unwrap();
        let b = mgr.buffer_info(session, compat.handle).unwrap();
        assert_eq!(a.size, b.size);
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.rights, b.rights);
        assert_eq!(a.page_count, b.page_count);
    }

    #[test]
    fn compat_bind_checks_arguments_like_native() {
        let mgr = manager();
        let session = mgr.open_session();
        let mut user = user_space();
        let rec = BindRecord {
            size: PAGE_SIZE_4KB,
            phys_addr: 0x9000_0000,
            backing_kind: 9,
            rights: MemRights::READ.bits(),
            ..Default::default()
        };
        put_record(&mut user, RECORD_ADDR, &rec, WireFormat::Compat32);
        assert_eq!(
            mem_bind_compat(&mgr, session, &mut user, RECORD_ADDR).unwrap_err(),
            MemError::InvalidArgument
        );
    }
}
