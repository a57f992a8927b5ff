//! gvm memory-manager core.
//!
//! Owns the heap set, per-session buffer tables, the bind/copy-on-write
//! engine and the diagnostic dump path. Everything that touches caller
//! memory goes through the [`user_mem`] access layer; everything that
//! crosses the privilege boundary is marshaled by the `gvm-uk` crate on
//! top of this one.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bind;
pub mod buffer;
pub mod constants;
pub mod cow;
pub mod dump;
pub mod heap;
pub mod manager;
pub mod registry;
pub mod session;
pub mod user_mem;

pub use bind::{BindBacking, BindRequest, SharingRegistry};
pub use buffer::{BufferInfo, BufferKind};
pub use constants::*;
pub use dump::DumpResult;
pub use heap::{HeapBackend, PhysAddr, PhysRange, PoolBackend};
pub use manager::{ManagerConfig, MemoryManager};
pub use registry::{HeapSpec, MemoryUsage};
pub use session::Session;
pub use user_mem::{safe_copy, validate_user_range, Access, FlatUserSpace, UserSpace};
