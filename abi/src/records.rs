//! Fixed-size command records exchanged across the boundary.
//!
//! Every operation transfers exactly one of these records in each
//! direction. The first field of each record is the kernel context slot:
//! the marshaling layer overwrites it with the session identity on the way
//! in and zeroes it on the way out, so a caller can neither spoof another
//! session nor learn a kernel address.

use static_assertions::assert_eq_size;

use crate::wire::{FieldKind, WireError, WireReader, WireRecord, WireWriter};

/// Heap strategy selected by an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HeapKind {
    /// General-purpose heap with no fixed physical range.
    General = 0,
    /// Pre-reserved, physically contiguous carveout region.
    Carveout = 1,
}

impl HeapKind {
    pub fn from_wire(val: u32) -> Option<Self> {
        match val {
            0 => Some(HeapKind::General),
            1 => Some(HeapKind::Carveout),
            _ => None,
        }
    }
}

/// Kind of externally supplied backing named by a bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BackingKind {
    /// Raw physical address range owned by the caller.
    External = 1,
    /// Opaque id resolved by the secure sharing registry.
    Secure = 2,
}

impl BackingKind {
    pub fn from_wire(val: u32) -> Option<Self> {
        match val {
            1 => Some(BackingKind::External),
            2 => Some(BackingKind::Secure),
            _ => None,
        }
    }
}

macro_rules! impl_wire_record {
    ($ty:ty, schema: [$($kind:ident),* $(,)?], fields: [$($field:ident),* $(,)?]) => {
        impl WireRecord for $ty {
            const SCHEMA: &'static [FieldKind] = &[$(FieldKind::$kind),*];

            fn encode(&self, w: &mut WireWriter<'_>) -> Result<(), WireError> {
                $(impl_wire_record!(@put w, self.$field, $kind);)*
                Ok(())
            }

            fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
                Ok(Self {
                    $($field: impl_wire_record!(@get r, $kind),)*
                })
            }
        }
    };
    (@put $w:ident, $value:expr, U32) => { $w.put_u32($value)? };
    (@put $w:ident, $value:expr, U64) => { $w.put_u64($value)? };
    (@put $w:ident, $value:expr, Ptr) => { $w.put_ptr($value)? };
    (@get $r:ident, U32) => { $r.get_u32()? };
    (@get $r:ident, U64) => { $r.get_u64()? };
    (@get $r:ident, Ptr) => { $r.get_ptr()? };
}

/// `allocate`: heap_kind + size in, handle out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocRecord {
    pub ctx: u64,
    pub size: u64,
    pub heap_kind: u32,
    pub rights: u32,
    pub handle: u64,
}
impl_wire_record!(AllocRecord,
    schema: [Ptr, U64, U32, U32, U64],
    fields: [ctx, size, heap_kind, rights, handle]);
assert_eq_size!(AllocRecord, [u8; 32]);

/// `free`: handle in, pages released out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeRecord {
    pub ctx: u64,
    pub handle: u64,
    pub pages_freed: u32,
    pub reserved: u32,
}
impl_wire_record!(FreeRecord,
    schema: [Ptr, U64, U32, U32],
    fields: [ctx, handle, pages_freed, reserved]);
assert_eq_size!(FreeRecord, [u8; 24]);

/// `bind`: backing description in, handle out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindRecord {
    pub ctx: u64,
    pub size: u64,
    pub phys_addr: u64,
    pub secure_id: u32,
    pub backing_kind: u32,
    pub rights: u32,
    pub flags: u32,
    pub handle: u64,
}
impl_wire_record!(BindRecord,
    schema: [Ptr, U64, Ptr, U32, U32, U32, U32, U64],
    fields: [ctx, size, phys_addr, secure_id, backing_kind, rights, flags, handle]);
assert_eq_size!(BindRecord, [u8; 48]);

/// `unbind`: the exact (handle, backing kind) pair a prior bind produced.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnbindRecord {
    pub ctx: u64,
    pub handle: u64,
    pub backing_kind: u32,
    pub reserved: u32,
}
impl_wire_record!(UnbindRecord,
    schema: [Ptr, U64, U32, U32],
    fields: [ctx, handle, backing_kind, reserved]);
assert_eq_size!(UnbindRecord, [u8; 24]);

/// `cow_duplicate`: source handle in, new handle out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CowRecord {
    pub ctx: u64,
    pub src_handle: u64,
    pub new_handle: u64,
}
impl_wire_record!(CowRecord,
    schema: [Ptr, U64, U64],
    fields: [ctx, src_handle, new_handle]);
assert_eq_size!(CowRecord, [u8; 24]);

/// `cow_modify_range`: byte range in, privatized page count out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CowModifyRecord {
    pub ctx: u64,
    pub handle: u64,
    pub range_start: u64,
    pub range_size: u64,
    pub pages_changed: u32,
    pub reserved: u32,
}
impl_wire_record!(CowModifyRecord,
    schema: [Ptr, U64, U64, U64, U32, U32],
    fields: [ctx, handle, range_start, range_size, pages_changed, reserved]);
assert_eq_size!(CowModifyRecord, [u8; 40]);

/// `resize`: handle + new size in.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeRecord {
    pub ctx: u64,
    pub handle: u64,
    pub new_size: u64,
}
impl_wire_record!(ResizeRecord,
    schema: [Ptr, U64, U64],
    fields: [ctx, handle, new_size]);
assert_eq_size!(ResizeRecord, [u8; 24]);

/// `dump_page_tables`: caller buffer in; embedded section addresses,
/// rebased into the caller's buffer, out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpRecord {
    pub ctx: u64,
    pub buffer: u64,
    pub size: u64,
    pub register_writes: u64,
    pub register_writes_size: u32,
    pub reserved0: u32,
    pub page_table_dump: u64,
    pub page_table_dump_size: u32,
    pub reserved1: u32,
}
impl_wire_record!(DumpRecord,
    schema: [Ptr, Ptr, U64, Ptr, U32, U32, Ptr, U32, U32],
    fields: [ctx, buffer, size, register_writes, register_writes_size,
             reserved0, page_table_dump, page_table_dump_size, reserved1]);
assert_eq_size!(DumpRecord, [u8; 56]);

/// `safe_copy`: checked user-to-user copy; size echoes back on success.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSafeRecord {
    pub ctx: u64,
    pub dest: u64,
    pub src: u64,
    pub size: u64,
}
impl_wire_record!(WriteSafeRecord,
    schema: [Ptr, Ptr, Ptr, U64],
    fields: [ctx, dest, src, size]);
assert_eq_size!(WriteSafeRecord, [u8; 32]);

/// `mem_usage`: registry accounting snapshot out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageRecord {
    pub ctx: u64,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub allocated_bytes: u64,
}
impl_wire_record!(UsageRecord,
    schema: [Ptr, U64, U64, U64],
    fields: [ctx, total_bytes, free_bytes, allocated_bytes]);
assert_eq_size!(UsageRecord, [u8; 32]);

/// `query_dump_size`: required dump buffer size out.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryDumpSizeRecord {
    pub ctx: u64,
    pub size: u64,
}
impl_wire_record!(QueryDumpSizeRecord,
    schema: [Ptr, U64],
    fields: [ctx, size]);
assert_eq_size!(QueryDumpSizeRecord, [u8; 16]);
