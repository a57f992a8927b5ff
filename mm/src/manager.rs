//! Top-level memory manager.
//!
//! Owns the heap registry, the session table and the optional sharing
//! registry. Built as a value by [`MemoryManager::init`] and torn down
//! by [`MemoryManager::shutdown`]; embedders decide where it lives.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use gvm_abi::{BackingKind, HeapKind, MemError, MemResult, MemRights};
use gvm_lib::{klog_info, klog_warn};
use spin::Mutex;

use crate::bind::{self, BindRequest, SharingRegistry};
use crate::buffer::{Buffer, BufferBacking, BufferInfo};
use crate::constants::{pages_for, MAX_BUFFER_SIZE};
use crate::cow;
use crate::dump::{self, DumpContent, DumpResult};
use crate::registry::{HeapRegistry, HeapSpec, MemoryUsage};
use crate::session::Session;
use crate::user_mem::UserSpace;

pub struct ManagerConfig {
    pub heaps: Vec<HeapSpec>,
    pub sharing: Option<Box<dyn SharingRegistry>>,
}

pub struct MemoryManager {
    registry: HeapRegistry,
    sharing: Option<Box<dyn SharingRegistry>>,
    sessions: Mutex<Vec<Session>>,
    next_session: AtomicU64,
}

impl MemoryManager {
    pub fn init(config: ManagerConfig) -> MemResult<Self> {
        let registry = HeapRegistry::init(config.heaps)?;
        Ok(Self {
            registry,
            sharing: config.sharing,
            sessions: Mutex::new(Vec::new()),
            next_session: AtomicU64::new(1),
        })
    }

    /// Tear down every remaining session, then the heaps. Never fails;
    /// leftover state is released and logged.
    pub fn shutdown(self) {
        let mut sessions = self.sessions.lock();
        for session in sessions.iter_mut() {
            if session.live_buffers() != 0 {
                klog_warn!(
                    "manager: session {} still holds {} buffer(s) at shutdown",
                    session.token(),
                    session.live_buffers()
                );
            }
            release_session(&self.registry, self.sharing.as_deref(), session);
        }
        sessions.clear();
        drop(sessions);
        self.registry.shutdown();
    }

    pub fn open_session(&self) -> u64 {
        let token = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().push(Session::new(token));
        klog_info!("manager: session {} opened", token);
        token
    }

    /// Drop a session and everything it holds. Buffer release cannot
    /// fail, so teardown always completes.
    pub fn close_session(&self, token: u64) -> MemResult<()> {
        let mut sessions = self.sessions.lock();
        let idx = sessions
            .iter()
            .position(|s| s.token() == token)
            .ok_or(MemError::NotFound)?;
        let mut session = sessions.swap_remove(idx);
        release_session(&self.registry, self.sharing.as_deref(), &mut session);
        klog_info!("manager: session {} closed", token);
        Ok(())
    }

    fn with_session<R>(
        &self,
        token: u64,
        f: impl FnOnce(&mut Session) -> MemResult<R>,
    ) -> MemResult<R> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.token() == token)
            .ok_or(MemError::NotFound)?;
        f(session)
    }

    pub fn allocate(
        &self,
        token: u64,
        kind: HeapKind,
        size: u64,
        rights: MemRights,
    ) -> MemResult<u64> {
        if size == 0 || size > MAX_BUFFER_SIZE {
            return Err(MemError::InvalidArgument);
        }
        self.with_session(token, |session| {
            session.ensure_capacity()?;
            let (heap_id, frames) = self.registry.allocate_pages(kind, pages_for(size))?;
            session.insert(|handle| Buffer::new_heap(handle, size, rights, heap_id, frames))
        })
    }

    /// Release a buffer of any backing. Returns the number of heap
    /// frames actually freed, zero for bound buffers.
    pub fn free(&self, token: u64, handle: u64) -> MemResult<u64> {
        self.with_session(token, |session| {
            let mut buffer = session.remove(handle)?;
            Ok(release_buffer(
                &self.registry,
                self.sharing.as_deref(),
                &mut buffer,
            ))
        })
    }

    pub fn bind(&self, token: u64, request: BindRequest) -> MemResult<u64> {
        self.with_session(token, |session| {
            session.ensure_capacity()?;
            let backing = bind::resolve_backing(self.sharing.as_deref(), &request)?;
            session.insert(|handle| Buffer::new_bound(handle, request.size, request.rights, backing))
        })
    }

    pub fn unbind(&self, token: u64, handle: u64, kind: BackingKind) -> MemResult<()> {
        self.with_session(token, |session| {
            bind::check_unbind_kind(session.get(handle)?.kind(), kind)?;
            let buffer = session.remove(handle)?;
            bind::release_backing(self.sharing.as_deref(), buffer.backing());
            Ok(())
        })
    }

    /// Duplicate a heap-backed buffer, sharing its pages copy-on-write.
    pub fn duplicate(&self, token: u64, src_handle: u64) -> MemResult<u64> {
        self.with_session(token, |session| {
            session.ensure_capacity()?;
            let (heap_id, size, rights, slots) = cow::duplicate(session.get(src_handle)?)?;
            session.insert(|handle| Buffer::from_slots(handle, size, rights, heap_id, slots))
        })
    }

    /// Privatize the pages under a byte range of a duplicated buffer.
    pub fn modify_range(&self, token: u64, handle: u64, start: u64, len: u64) -> MemResult<u64> {
        self.with_session(token, |session| {
            cow::modify_range(&self.registry, session.get_mut(handle)?, start, len)
        })
    }

    pub fn resize(&self, token: u64, handle: u64, new_size: u64) -> MemResult<()> {
        self.with_session(token, |session| {
            let buffer = session.get_mut(handle)?;
            let old_size = cow::resize(&self.registry, buffer, new_size)?;
            session.adjust_bytes(old_size, new_size);
            Ok(())
        })
    }

    /// Confirm a session token is live.
    pub fn check_session(&self, token: u64) -> MemResult<()> {
        self.with_session(token, |_| Ok(()))
    }

    pub fn buffer_info(&self, token: u64, handle: u64) -> MemResult<BufferInfo> {
        self.with_session(token, |session| session.buffer_info(handle))
    }

    pub fn usage(&self) -> MemoryUsage {
        self.registry.usage()
    }

    fn dump_content(&self, session: &Session) -> DumpContent {
        let mut content = DumpContent::default();
        for heap in self.registry.heaps() {
            let usage = heap.usage();
            let tag = ((heap.id() as u64) << 32) | ((heap.kind() as u64) << 1);
            content.register_entries.push([tag, usage.total_bytes]);
            content.register_entries.push([tag | 1, usage.allocated_bytes]);
        }
        for buffer in session.iter_buffers() {
            if let BufferBacking::Heap { pages, .. } = buffer.backing() {
                for slot in pages {
                    content.page_entries.push([buffer.handle(), slot.phys()]);
                }
            }
        }
        content
    }

    /// Bytes a dump of this session's state needs right now.
    pub fn query_dump_size(&self, token: u64) -> MemResult<u64> {
        self.with_session(token, |session| Ok(self.dump_content(session).required_size()))
    }

    /// Serialize heap accounting and the session's page mappings into
    /// the caller buffer at `buffer`.
    pub fn dump(
        &self,
        token: u64,
        user: &mut dyn UserSpace,
        buffer: u64,
        size: u64,
    ) -> MemResult<DumpResult> {
        self.with_session(token, |session| {
            let content = self.dump_content(session);
            dump::write_dump(user, buffer, size, &content)
        })
    }
}

fn release_buffer(
    registry: &HeapRegistry,
    sharing: Option<&dyn SharingRegistry>,
    buffer: &mut Buffer,
) -> u64 {
    let freed = buffer.release_pages(|heap_id, phys| registry.free_page(heap_id, phys));
    bind::release_backing(sharing, buffer.backing());
    freed
}

fn release_session(
    registry: &HeapRegistry,
    sharing: Option<&dyn SharingRegistry>,
    session: &mut Session,
) {
    for mut buffer in session.drain() {
        release_buffer(registry, sharing, &mut buffer);
    }
}
