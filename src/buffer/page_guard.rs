use log::error;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::buffer::buffer_pool::BufferPoolManager;
use crate::buffer::page::{FrameId, PageBytesReadGuard, PageBytesWriteGuard, PageId, PAGE_SIZE};
use crate::recovery::Lsn;

/// Shared latch on a page plus one pin credit. Dropping the guard releases
/// the latch first and then returns the pin, so a frame with a zero pin
/// count is always latch-free.
#[derive(Debug)]
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    frame_id: FrameId,
    guard: ManuallyDrop<PageBytesReadGuard>,
}

impl ReadPageGuard {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        page_id: PageId,
        frame_id: FrameId,
        guard: PageBytesReadGuard,
    ) -> Self {
        Self {
            bpm,
            page_id,
            frame_id,
            guard: ManuallyDrop::new(guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }

    pub fn pin_count(&self) -> u32 {
        self.bpm.frame_meta_snapshot(self.frame_id).pin_count
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        if let Err(e) = self.bpm.unpin_page(self.page_id, false) {
            error!(
                "failed to unpin page {} after read latch release: {}",
                self.page_id, e
            );
        }
    }
}

/// Exclusive latch on a page plus one pin credit. The dirty bit is set when
/// the holder overwrites the page image and is handed to the buffer pool at
/// unpin time.
#[derive(Debug)]
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    frame_id: FrameId,
    dirtied: bool,
    guard: ManuallyDrop<PageBytesWriteGuard>,
}

impl WritePageGuard {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        page_id: PageId,
        frame_id: FrameId,
        guard: PageBytesWriteGuard,
    ) -> Self {
        Self {
            bpm,
            page_id,
            frame_id,
            dirtied: false,
            guard: ManuallyDrop::new(guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirtied = true;
        &mut self.guard[..]
    }

    /// Replaces the whole page image and marks the frame dirty.
    pub fn overwrite(&mut self, data: &[u8; PAGE_SIZE]) {
        self.guard.copy_from_slice(data);
        self.dirtied = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirtied = true;
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.bpm.set_frame_lsn(self.frame_id, lsn);
    }

    pub fn pin_count(&self) -> u32 {
        self.bpm.frame_meta_snapshot(self.frame_id).pin_count
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        let dirtied = self.dirtied;
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        if let Err(e) = self.bpm.unpin_page(self.page_id, dirtied) {
            error!(
                "failed to unpin page {} after write latch release: {}",
                self.page_id, e
            );
        }
    }
}
