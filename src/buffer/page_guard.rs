use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolState;
use super::frame::Frame;

/// RAII guard for shared access to a pinned page. Dropping the guard
/// releases the data lock and then performs exactly one unpin.
pub struct ReadPageGuard {
    page_id: PageId,
    state: Arc<PoolState>,
    _frame: Arc<Frame>,
    data: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The frame must stay alive for the guard's lifetime; the `Arc` held in
    /// the guard guarantees this, which is what makes the 'static transmute
    /// of the data lock sound.
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, state: Arc<PoolState>) -> Self {
        let data = frame.data.read();
        let data: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(data);
        Self {
            page_id,
            state,
            _frame: frame,
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the data lock before unpinning so an evictor that wins the
        // frame never waits on this guard.
        self.data.take();
        self.state.unpin_page(self.page_id, false);
    }
}

/// RAII guard for exclusive access to a pinned page. The dirty flag is
/// raised the first time the bytes are borrowed mutably and handed to the
/// pool on drop.
pub struct WritePageGuard {
    page_id: PageId,
    state: Arc<PoolState>,
    _frame: Arc<Frame>,
    data: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    is_dirty: bool,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<Frame>, state: Arc<PoolState>) -> Self {
        let data = frame.data.write();
        let data: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> = std::mem::transmute(data);
        Self {
            page_id,
            state,
            _frame: frame,
            data: Some(data),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data.take();
        self.state.unpin_page(self.page_id, self.is_dirty);
    }
}
