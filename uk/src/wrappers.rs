//! Native-layout entry points and the shared marshaling cores.
//!
//! A caller can neither spoof another session nor learn a kernel
//! address through these functions: the context slot is overwritten
//! with the session identity before the operation runs and zeroed
//! before anything is copied back. When an operation commits a resource
//! and the result record then fails to reach the caller, the resource
//! is unwound with the operation's inverse so nothing unreachable
//! survives.

use gvm_abi::{
    AllocRecord, BackingKind, BindRecord, CowModifyRecord, CowRecord, DumpRecord, FreeRecord,
    HeapKind, MemError, MemResult, MemRights, QueryDumpSizeRecord, ResizeRecord, UnbindRecord,
    UsageRecord, WireFormat, WireReader, WireRecord, WireWriter, WriteSafeRecord, MAX_WIRE_SIZE,
};
use gvm_lib::klog_warn;
use gvm_mm::{safe_copy, BindBacking, BindRequest, MemoryManager, UserSpace};

pub(crate) fn read_record<R: WireRecord>(
    user: &dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<R> {
    let size = R::wire_size(format);
    let mut buf = [0u8; MAX_WIRE_SIZE];
    user.copy_in(addr, &mut buf[..size])?;
    let mut reader = WireReader::new(&buf[..size], format);
    R::decode(&mut reader).map_err(|_| MemError::InvalidArgument)
}

pub(crate) fn write_record<R: WireRecord>(
    user: &mut dyn UserSpace,
    addr: u64,
    record: &R,
    format: WireFormat,
) -> MemResult<()> {
    let size = R::wire_size(format);
    let mut buf = [0u8; MAX_WIRE_SIZE];
    let mut writer = WireWriter::new(&mut buf[..size], format);
    record.encode(&mut writer).map_err(|_| MemError::InvalidArgument)?;
    user.copy_out(addr, &buf[..size])
}

pub(crate) fn allocate(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: AllocRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    let kind = HeapKind::from_wire(rec.heap_kind).ok_or(MemError::InvalidArgument)?;
    let rights = MemRights::from_wire(rec.rights).ok_or(MemError::InvalidArgument)?;
    rec.handle = mgr.allocate(rec.ctx, kind, rec.size, rights)?;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn free(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: FreeRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    rec.pages_freed = mgr.free(rec.ctx, rec.handle)? as u32;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn bind(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: BindRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    let backing_kind =
        BackingKind::from_wire(rec.backing_kind).ok_or(MemError::InvalidArgument)?;
    let rights = MemRights::from_wire(rec.rights).ok_or(MemError::InvalidArgument)?;
    let request = BindRequest {
        size: rec.size,
        rights,
        backing: match backing_kind {
            BackingKind::External => BindBacking::External {
                phys_addr: rec.phys_addr,
            },
            BackingKind::Secure => BindBacking::Secure { id: rec.secure_id },
        },
    };
    let handle = mgr.bind(rec.ctx, request)?;
    rec.handle = handle;
    rec.ctx = 0;
    if let Err(err) = write_record(user, addr, &rec, format) {
        // The caller never saw the handle; unwind the bind so the
        // session looks as if the operation never happened.
        if mgr.unbind(session, handle, backing_kind).is_err() {
            klog_warn!("uk: compensating unbind of handle {} failed", handle);
        }
        return Err(err);
    }
    Ok(())
}

pub(crate) fn unbind(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: UnbindRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    let kind = BackingKind::from_wire(rec.backing_kind).ok_or(MemError::InvalidArgument)?;
    mgr.unbind(rec.ctx, rec.handle, kind)?;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn cow(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: CowRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    rec.new_handle = mgr.duplicate(rec.ctx, rec.src_handle)?;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn cow_modify_range(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: CowModifyRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    rec.pages_changed = mgr.modify_range(rec.ctx, rec.handle, rec.range_start, rec.range_size)? as u32;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn resize(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: ResizeRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    mgr.resize(rec.ctx, rec.handle, rec.new_size)?;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn usage(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: UsageRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    mgr.check_session(rec.ctx)?;
    let usage = mgr.usage();
    rec.total_bytes = usage.total_bytes;
    rec.free_bytes = usage.free_bytes;
    rec.allocated_bytes = usage.allocated_bytes;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn query_dump_size(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: QueryDumpSizeRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    rec.size = mgr.query_dump_size(rec.ctx)?;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn dump_page_tables(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: DumpRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    let result = mgr.dump(rec.ctx, user, rec.buffer, rec.size)?;
    rec.register_writes = result.register_writes;
    rec.register_writes_size = result.register_writes_size;
    rec.page_table_dump = result.page_table_dump;
    rec.page_table_dump_size = result.page_table_dump_size;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub(crate) fn write_safe(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
    format: WireFormat,
) -> MemResult<()> {
    let mut rec: WriteSafeRecord = read_record(user, addr, format)?;
    rec.ctx = session;
    // The copy itself carries no session state; the session is still
    // required to exist so a closed caller cannot keep using the path.
    mgr.check_session(rec.ctx)?;
    rec.size = safe_copy(user, rec.dest, rec.src, rec.size)?;
    rec.ctx = 0;
    write_record(user, addr, &rec, format)
}

pub fn mem_allocate(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    allocate(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_free(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    free(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_bind(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    bind(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_unbind(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    unbind(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_cow(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    cow(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_cow_modify_range(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    cow_modify_range(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_resize(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    resize(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_usage(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    usage(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_query_dump_size(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    query_dump_size(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_dump_page_tables(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    dump_page_tables(mgr, session, user, addr, WireFormat::Native)
}

pub fn mem_write_safe(
    mgr: &MemoryManager,
    session: u64,
    user: &mut dyn UserSpace,
    addr: u64,
) -> MemResult<()> {
    write_safe(mgr, session, user, addr, WireFormat::Native)
}

#[cfg(test)]
pub(crate) mod testutil {
    use alloc::boxed::Box;
    use gvm_abi::{WireFormat, WireReader, WireRecord, WireWriter, MAX_WIRE_SIZE};
    use gvm_mm::{
        FlatUserSpace, HeapBackend, HeapSpec, ManagerConfig, MemoryManager, PhysRange,
        PoolBackend, PAGE_SIZE_4KB,
    };

    pub(crate) const RECORD_ADDR: u64 = 0x1040;

    pub(crate) fn manager() -> MemoryManager {
        MemoryManager::init(ManagerConfig {
            heaps: alloc::vec![
                HeapSpec::General {
                    id: 0,
                    name: "general",
                    backend: Box::new(PoolBackend::new(0, 64 * PAGE_SIZE_4KB).unwrap())
                        as Box<dyn HeapBackend>,
                },
                HeapSpec::Carveout {
                    id: 1,
                    name: "carveout",
                    range: PhysRange {
                        base: 0x8000_0000,
                        size: 16 * PAGE_SIZE_4KB,
                    },
                },
            ],
            sharing: None,
        })
        .unwrap()
    }

    pub(crate) fn user_space() -> FlatUserSpace {
        FlatUserSpace::new(0x1000, 0x8000)
    }

    pub(crate) fn put_record<R: WireRecord>(
        user: &mut FlatUserSpace,
        addr: u64,
        record: &R,
        format: WireFormat,
    ) {
        let size = R::wire_size(format);
        let mut buf = [0u8; MAX_WIRE_SIZE];
        let mut writer = WireWriter::new(&mut buf[..size], format);
        record.encode(&mut writer).unwrap();
        user.write(addr, &buf[..size]);
    }

    pub(crate) fn get_record<R: WireRecord>(
        user: &FlatUserSpace,
        addr: u64,
        format: WireFormat,
    ) -> R {
        let size = R::wire_size(format);
        let mut reader = WireReader::new(user.read(addr, size), format);
        R::decode(&mut reader).unwrap()
    }
}
