use std::collections::LinkedList;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{
    FrameId, PageId, Result, StrataError, DEFAULT_BUCKET_SIZE, HEADER_PAGE_ID, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::frame::Frame;
use super::lru_k_replacer::LruKReplacer;
use super::page_guard::{ReadPageGuard, WritePageGuard};

struct PoolInner {
    free_list: LinkedList<FrameId>,
    next_page_id: u32,
}

/// Shared pool state. Guards keep an `Arc` to it so a drop anywhere can
/// route back through the unpin path.
pub(crate) struct PoolState {
    frames: Vec<Arc<Frame>>,
    /// Serializes every public pool operation.
    latch: Mutex<PoolInner>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_scheduler: DiskScheduler,
}

impl PoolState {
    /// Produces a vacant, zeroed frame: pops the free list, or evicts.
    /// A dirty victim is written back before its page-table entry goes away.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.evict() {
            Some(frame_id) => frame_id,
            None => {
                debug!("buffer pool exhausted: every frame is pinned");
                return Err(StrataError::OutOfMemory);
            }
        };

        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            trace!(page_id = %old_page_id, frame_id = %frame_id, "writing back evicted page");
            let mut buf = [0u8; PAGE_SIZE];
            frame.copy_into(&mut buf);
            self.disk_scheduler.schedule_write_sync(old_page_id, &buf)?;
        }
        self.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }

    /// Pins the frame holding `page_id`, reading it from disk if absent.
    fn fetch_frame(&self, page_id: PageId) -> Result<Arc<Frame>> {
        let mut inner = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            self.replacer.record_access(frame_id)?;
            self.replacer.set_evictable(frame_id, false)?;
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.as_usize()];

        let mut buf = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut buf) {
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(page_id);
        frame.fill_from(&buf);
        frame.set_dirty(false);
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;
        Ok(Arc::clone(frame))
    }

    /// Shared unpin path for guards and the public API. False when the page
    /// is not resident or its pin count is already zero.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _inner = self.latch.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == Some(0) {
            // frame ids taken from the page table are always in range
            let _ = self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    fn write_frame(&self, page_id: PageId, frame: &Frame) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        frame.copy_into(&mut buf);
        self.disk_scheduler.schedule_write_sync(page_id, &buf)?;
        frame.set_dirty(false);
        Ok(())
    }
}

/// BufferPoolManager caches disk pages in a fixed array of frames, using an
/// extendible hash table as the page table and LRU-K for eviction.
///
/// `new_page` and the fetch methods hand back RAII guards that own one pin
/// each; every other operation keyes on page ids. Page-id allocation is
/// monotonic starting just past the header page, and deallocation never
/// reuses ids.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
}

impl BufferPoolManager {
    /// Creates a pool with `pool_size` frames and LRU-`replacer_k` eviction.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Result<Self> {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = LinkedList::new();
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            latch: Mutex::new(PoolInner {
                free_list,
                next_page_id: HEADER_PAGE_ID.as_u32() + 1,
            }),
            page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
            replacer: LruKReplacer::new(replacer_k, pool_size)?,
            disk_scheduler: DiskScheduler::new(disk_manager),
        });

        Ok(Self { pool_size, state })
    }

    /// Allocates a fresh page id, installs it in a zeroed frame pinned to 1,
    /// and returns the owning write guard.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let (page_id, frame) = {
            let mut inner = self.state.latch.lock();
            let frame_id = self.state.acquire_frame(&mut inner)?;
            let page_id = PageId::new(inner.next_page_id);
            inner.next_page_id += 1;

            let frame = &self.state.frames[frame_id.as_usize()];
            frame.set_page_id(page_id);
            frame.pin();
            self.state.page_table.insert(page_id, frame_id);
            self.state.replacer.record_access(frame_id)?;
            self.state.replacer.set_evictable(frame_id, false)?;
            (page_id, Arc::clone(frame))
        };

        // The data lock is taken outside the pool latch; the pin keeps the
        // frame from being evicted in between.
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Pins a page for shared access, reading it from disk if needed.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        if page_id.is_invalid() {
            return Err(StrataError::InvalidPage(page_id));
        }
        let frame = self.state.fetch_frame(page_id)?;
        Ok(unsafe { ReadPageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Pins a page for exclusive access, reading it from disk if needed.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        if page_id.is_invalid() {
            return Err(StrataError::InvalidPage(page_id));
        }
        let frame = self.state.fetch_frame(page_id)?;
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Drops one pin from a resident page, ORing in the caller's dirty flag.
    /// Returns false for a non-resident page or a pin count already at zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin_page(page_id, is_dirty)
    }

    /// Writes a resident page to disk whether or not it is dirty, then
    /// clears the dirty flag. `Ok(false)` when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id.is_invalid() {
            return Err(StrataError::InvalidPage(page_id));
        }

        let frame = {
            let _inner = self.state.latch.lock();
            let frame_id = match self.state.page_table.find(&page_id) {
                Some(frame_id) => frame_id,
                None => return Ok(false),
            };
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
            // Pin so the frame survives the write happening off-latch.
            frame.pin();
            self.state.replacer.set_evictable(frame_id, false)?;
            frame
        };

        let result = self.state.write_frame(page_id, &frame);
        self.state.unpin_page(page_id, false);
        result.map(|_| true)
    }

    /// Writes every resident dirty page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let dirty: Vec<(PageId, Arc<Frame>)> = {
            let _inner = self.state.latch.lock();
            let mut dirty = Vec::new();
            for frame in &self.state.frames {
                if frame.page_id().is_invalid() || !frame.is_dirty() {
                    continue;
                }
                frame.pin();
                self.state.replacer.set_evictable(frame.frame_id(), false)?;
                dirty.push((frame.page_id(), Arc::clone(frame)));
            }
            dirty
        };

        let mut first_err = None;
        for (page_id, frame) in dirty {
            let result = self.state.write_frame(page_id, &frame);
            self.state.unpin_page(page_id, false);
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Removes a page from the pool. Non-resident pages delete trivially
    /// (`Ok(true)`); a pinned page cannot be deleted (`Ok(false)`). Page ids
    /// are never reused, so on-disk deallocation is a no-op.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.latch.lock();

        let frame_id = match self.state.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(true),
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        if frame.is_dirty() {
            let mut buf = [0u8; PAGE_SIZE];
            frame.copy_into(&mut buf);
            self.state.disk_scheduler.schedule_write_sync(page_id, &buf)?;
        }

        self.state.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id)?;
        frame.reset();
        inner.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Current pin count of a resident page, None when not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _inner = self.state.latch.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.latch.lock().free_list.len()
    }
}
