//! gvm boundary ABI types
//!
//! This crate provides the canonical definitions for every type that crosses
//! the user/kernel privilege boundary of the GPU memory manager. Having a
//! single source of truth eliminates:
//! - Duplicate record definitions on the two sides of the boundary
//! - Layout mismatches between the native and the 32-bit compat wire format
//! - The need for unsafe pointer punning when marshaling
//!
//! Command records are `#[repr(C)]` for ABI stability; the wire codec in
//! [`wire`] transfers them field by field so struct padding never reaches
//! the caller.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod error;
pub mod records;
pub mod rights;
pub mod wire;

pub use error::*;
pub use records::*;
pub use rights::*;
pub use wire::*;
