//! Privilege-boundary marshaling for the gvm memory manager.
//!
//! Each entry point transfers exactly one command record: copy the
//! record in through the caller's address space, stamp its context slot
//! with the session identity, run the operation, zero the context slot
//! and copy the record back. The compat entry points accept the same
//! records in the 32-bit pointer layout.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod compat;
pub mod wrappers;

pub use wrappers::{
    mem_allocate, mem_bind, mem_cow, mem_cow_modify_range, mem_dump_page_tables, mem_free,
    mem_query_dump_size, mem_resize, mem_unbind, mem_usage, mem_write_safe,
};
