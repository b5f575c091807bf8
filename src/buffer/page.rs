use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::sync::Arc;

use crate::recovery::{Lsn, INVALID_LSN};

pub type PageId = i32;
pub type FrameId = usize;

pub const INVALID_PAGE_ID: PageId = -1;
/// Page 0 is reserved for the catalog records mapping index names to roots.
pub const HEADER_PAGE_ID: PageId = 0;
pub const PAGE_SIZE: usize = 4096;

pub(crate) type PageBytes = [u8; PAGE_SIZE];
pub(crate) type PageBytesReadGuard = ArcRwLockReadGuard<RawRwLock, PageBytes>;
pub(crate) type PageBytesWriteGuard = ArcRwLockWriteGuard<RawRwLock, PageBytes>;

/// Bookkeeping for one buffer frame. Lives outside the frame latch so pins
/// and dirty bits can be updated without touching the page bytes.
#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub page_id: PageId,
    pub pin_count: u32,
    pub is_dirty: bool,
    pub lsn: Lsn,
}

impl FrameMeta {
    pub fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
            lsn: INVALID_LSN,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::empty();
    }
}

/// One slot of the buffer pool: metadata under its own latch, page bytes
/// under the frame's reader/writer latch. Frames are created once at pool
/// construction and recycled through the free list and the replacer.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) meta: Mutex<FrameMeta>,
    pub(crate) data: Arc<RwLock<PageBytes>>,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self {
            meta: Mutex::new(FrameMeta::empty()),
            data: Arc::new(RwLock::new([0u8; PAGE_SIZE])),
        }
    }
}
