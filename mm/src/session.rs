//! Per-caller session state.
//!
//! A session owns a fixed table of buffer slots and a monotonically
//! increasing handle counter. Handle 0 is never issued, so a zeroed
//! record can never name a live buffer.

use alloc::vec::Vec;

use gvm_abi::{MemError, MemResult};

use crate::buffer::{Buffer, BufferInfo};
use crate::constants::MAX_BUFFERS_PER_SESSION;

pub struct Session {
    token: u64,
    next_handle: u64,
    buffers: Vec<Option<Buffer>>,
    bytes_allocated: u64,
}

impl Session {
    pub fn new(token: u64) -> Self {
        let mut buffers = Vec::with_capacity(MAX_BUFFERS_PER_SESSION);
        buffers.resize_with(MAX_BUFFERS_PER_SESSION, || None);
        Self {
            token,
            next_handle: 1,
            buffers,
            bytes_allocated: 0,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated
    }

    /// Fail early when no slot is free. Callers check this before
    /// acquiring resources the buffer would own.
    pub fn ensure_capacity(&self) -> MemResult<()> {
        if self.buffers.iter().any(Option::is_none) {
            Ok(())
        } else {
            Err(MemError::OutOfMemory)
        }
    }

    /// Reserve a slot and a fresh handle, then store the buffer the
    /// caller builds for that handle.
    pub fn insert(&mut self, build: impl FnOnce(u64) -> Buffer) -> MemResult<u64> {
        let slot = self
            .buffers
            .iter()
            .position(Option::is_none)
            .ok_or(MemError::OutOfMemory)?;
        let handle = self.next_handle;
        self.next_handle += 1;
        let buffer = build(handle);
        self.bytes_allocated += buffer.size();
        self.buffers[slot] = Some(buffer);
        Ok(handle)
    }

    pub fn get(&self, handle: u64) -> MemResult<&Buffer> {
        self.buffers
            .iter()
            .flatten()
            .find(|b| b.handle() == handle)
            .ok_or(MemError::NotFound)
    }

    pub fn get_mut(&mut self, handle: u64) -> MemResult<&mut Buffer> {
        self.buffers
            .iter_mut()
            .flatten()
            .find(|b| b.handle() == handle)
            .ok_or(MemError::NotFound)
    }

    pub fn remove(&mut self, handle: u64) -> MemResult<Buffer> {
        let slot = self
            .buffers
            .iter()
            .position(|b| b.as_ref().is_some_and(|b| b.handle() == handle))
            .ok_or(MemError::NotFound)?;
        let buffer = self.buffers[slot].take().ok_or(MemError::NotFound)?;
        self.bytes_allocated = self.bytes_allocated.saturating_sub(buffer.size());
        Ok(buffer)
    }

    /// Resize bookkeeping after a buffer's size changed in place.
    pub fn adjust_bytes(&mut self, old_size: u64, new_size: u64) {
        self.bytes_allocated = self
            .bytes_allocated
            .saturating_sub(old_size)
            .saturating_add(new_size);
    }

    pub fn buffer_info(&self, handle: u64) -> MemResult<BufferInfo> {
        Ok(self.get(handle)?.info())
    }

    /// Drain every remaining buffer for teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = Buffer> + '_ {
        self.bytes_allocated = 0;
        self.buffers.iter_mut().filter_map(Option::take)
    }

    pub fn iter_buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter().flatten()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().flatten().count()
    }
}
