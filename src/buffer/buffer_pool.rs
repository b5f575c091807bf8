use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::page::{Frame, FrameId, FrameMeta, PageId, INVALID_PAGE_ID};
use crate::buffer::page_guard::{ReadPageGuard, WritePageGuard};
use crate::config::{self, BufferPoolConfig, ReplacerPolicy};
use crate::error::{QuartzDBError, QuartzDBResult};
use crate::recovery::{Lsn, LogManager};
use crate::storage::disk_manager::DiskManager;
use crate::utils::cache::{ClockReplacer, LRUReplacer, Replacer};
use crate::utils::hash::ExtendibleHashTable;

/// Owns a fixed array of frames and coordinates the page table, the victim
/// selector, the free list, and the disk manager. The BPM-wide latch also
/// owns the free list, so page-table and free-list manipulation serialize on
/// it; the replacer and the page-table buckets carry their own latches.
///
/// Disk I/O is performed while the BPM latch is held.
#[derive(Debug)]
pub struct BufferPoolManager {
    pool: Vec<Frame>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: Mutex<Box<dyn Replacer>>,
    latch: Mutex<VecDeque<FrameId>>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let config = BufferPoolConfig {
            pool_size,
            ..Default::default()
        };
        Self::new_with_config(config, disk_manager, None)
    }

    pub fn new_with_config(
        config: BufferPoolConfig,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut pool = Vec::with_capacity(config.pool_size);
        let mut free_list = VecDeque::with_capacity(config.pool_size);
        for frame_id in 0..config.pool_size {
            pool.push(Frame::new());
            free_list.push_back(frame_id);
        }
        let replacer: Box<dyn Replacer> = match config.replacer {
            ReplacerPolicy::Lru => Box::new(LRUReplacer::new(config.pool_size)),
            ReplacerPolicy::Clock => Box::new(ClockReplacer::new(config.pool_size)),
        };
        Self {
            pool,
            page_table: ExtendibleHashTable::new(config.bucket_size),
            replacer: Mutex::new(replacer),
            latch: Mutex::new(free_list),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Pins `page_id` and takes its shared latch. On a miss the page is read
    /// from disk into a victim frame first.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> QuartzDBResult<ReadPageGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let guard = self.pool[frame_id].data.read_arc();
        Ok(ReadPageGuard::new(Arc::clone(self), page_id, frame_id, guard))
    }

    /// Pins `page_id` and takes its exclusive latch.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> QuartzDBResult<WritePageGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let guard = self.pool[frame_id].data.write_arc();
        Ok(WritePageGuard::new(
            Arc::clone(self),
            page_id,
            frame_id,
            guard,
        ))
    }

    /// Allocates a fresh disk page, installs it zeroed into a victim frame,
    /// and returns it pinned and exclusively latched.
    pub fn new_page(self: &Arc<Self>) -> QuartzDBResult<WritePageGuard> {
        let page_id;
        let frame_id;
        {
            let mut free_list = self.latch.lock();
            frame_id = self.take_victim_frame(&mut free_list)?;
            page_id = self.disk_manager.allocate_page();
            {
                let mut data = self.pool[frame_id].data.write();
                data.fill(0);
            }
            {
                let mut meta = self.pool[frame_id].meta.lock();
                meta.page_id = page_id;
                meta.pin_count = 1;
                meta.is_dirty = false;
                meta.lsn = 0;
            }
            self.page_table.insert(page_id, frame_id);
        }
        let guard = self.pool[frame_id].data.write_arc();
        Ok(WritePageGuard::new(
            Arc::clone(self),
            page_id,
            frame_id,
            guard,
        ))
    }

    /// Or-ins the dirty flag and returns the pin credit. A zero pin count is
    /// a caller bug and reported as an internal error.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> QuartzDBResult<bool> {
        let _latch = self.latch.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let mut meta = self.pool[frame_id].meta.lock();
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            return Err(QuartzDBError::Internal(format!(
                "unpin of page {} with zero pin count",
                page_id
            )));
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.lock().insert(frame_id);
        }
        Ok(true)
    }

    /// Writes the page back if dirty and clears the dirty bit. Returns false
    /// when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> QuartzDBResult<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let _latch = self.latch.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        self.flush_frame(frame_id)?;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> QuartzDBResult<()> {
        let _latch = self.latch.lock();
        for frame_id in 0..self.pool.len() {
            self.flush_frame(frame_id)?;
        }
        Ok(())
    }

    /// Drops a page from the pool and deallocates it on disk. Fails (returns
    /// false) when the page is still pinned; deallocation proceeds even when
    /// the page is not resident.
    pub fn delete_page(&self, page_id: PageId) -> QuartzDBResult<bool> {
        let mut free_list = self.latch.lock();
        if let Some(frame_id) = self.page_table.find(&page_id) {
            {
                let mut meta = self.pool[frame_id].meta.lock();
                if meta.pin_count > 0 {
                    return Ok(false);
                }
                meta.reset();
            }
            self.replacer.lock().erase(frame_id);
            self.page_table.remove(&page_id);
            {
                let mut data = self.pool[frame_id].data.write();
                data.fill(0);
            }
            free_list.push_back(frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// True when no frame holds a pin; the pool is quiescent.
    pub fn all_unpinned(&self) -> bool {
        self.pool
            .iter()
            .all(|frame| frame.meta.lock().pin_count == 0)
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let _latch = self.latch.lock();
        let frame_id = self.page_table.find(&page_id)?;
        Some(self.pool[frame_id].meta.lock().pin_count)
    }

    pub(crate) fn frame_meta_snapshot(&self, frame_id: FrameId) -> FrameMeta {
        self.pool[frame_id].meta.lock().clone()
    }

    pub(crate) fn set_frame_lsn(&self, frame_id: FrameId, lsn: Lsn) {
        self.pool[frame_id].meta.lock().lsn = lsn;
    }

    /// Looks the page up in the table (hit: bump the pin, pull the frame off
    /// the replacer) or loads it from disk into a victim frame. Runs under
    /// the BPM latch.
    fn pin_frame(&self, page_id: PageId) -> QuartzDBResult<FrameId> {
        if page_id == INVALID_PAGE_ID {
            return Err(QuartzDBError::Internal(
                "cannot fetch the invalid page id".to_string(),
            ));
        }
        let mut free_list = self.latch.lock();
        if let Some(frame_id) = self.page_table.find(&page_id) {
            {
                let mut meta = self.pool[frame_id].meta.lock();
                meta.pin_count += 1;
            }
            self.replacer.lock().erase(frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.take_victim_frame(&mut free_list)?;
        let data = self.disk_manager.read_page(page_id)?;
        {
            let mut buf = self.pool[frame_id].data.write();
            buf.copy_from_slice(&data);
        }
        {
            let mut meta = self.pool[frame_id].meta.lock();
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.is_dirty = false;
            meta.lsn = 0;
        }
        self.page_table.insert(page_id, frame_id);
        Ok(frame_id)
    }

    /// Prefers the free list, then the replacer tail. The chosen frame is
    /// written back if dirty and its old mapping removed.
    fn take_victim_frame(
        &self,
        free_list: &mut VecDeque<FrameId>,
    ) -> QuartzDBResult<FrameId> {
        if let Some(frame_id) = free_list.pop_front() {
            let meta = self.frame_meta_snapshot(frame_id);
            assert_eq!(
                meta.page_id, INVALID_PAGE_ID,
                "free-list frame still mapped to a page"
            );
            assert_eq!(meta.pin_count, 0, "free-list frame is pinned");
            return Ok(frame_id);
        }
        if let Some(frame_id) = self.replacer.lock().victim() {
            let meta = self.frame_meta_snapshot(frame_id);
            assert_eq!(meta.pin_count, 0, "replacer frame is pinned");
            if meta.page_id != INVALID_PAGE_ID {
                if meta.is_dirty {
                    // A zero pin count guarantees the frame is latch-free.
                    let data = self.pool[frame_id].data.read();
                    self.write_back(&meta, &data[..])?;
                }
                self.page_table.remove(&meta.page_id);
            }
            return Ok(frame_id);
        }
        Err(QuartzDBError::Storage(
            "buffer pool is full and every frame is pinned".to_string(),
        ))
    }

    /// Flushes one frame if it is dirty. Caller holds the BPM latch. A frame
    /// whose write latch is currently held is skipped: blocking on it here
    /// could deadlock with a latch holder waiting on the BPM latch, and its
    /// bytes reach disk at eviction anyway.
    fn flush_frame(&self, frame_id: FrameId) -> QuartzDBResult<()> {
        let meta = self.frame_meta_snapshot(frame_id);
        if meta.page_id == INVALID_PAGE_ID || !meta.is_dirty {
            return Ok(());
        }
        let Some(data) = self.pool[frame_id].data.try_read() else {
            warn!("skipping flush of write-latched page {}", meta.page_id);
            return Ok(());
        };
        self.write_back(&meta, &data[..])?;
        // Clear the bit while the read latch still excludes writers.
        self.pool[frame_id].meta.lock().is_dirty = false;
        drop(data);
        Ok(())
    }

    /// WAL rule: the log is forced up to the frame's lsn before its bytes
    /// reach the data file.
    fn write_back(&self, meta: &FrameMeta, data: &[u8]) -> QuartzDBResult<()> {
        if config::logging_enabled() {
            if let Some(log_manager) = &self.log_manager {
                log_manager.flush_to(meta.lsn)?;
            }
        }
        self.disk_manager.write_page(meta.page_id, data)
    }

    #[cfg(test)]
    pub(crate) fn free_list_len(&self) -> usize {
        self.latch.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn replacer_size(&self) -> usize {
        self.replacer.lock().size()
    }

    #[cfg(test)]
    pub(crate) fn resident(&self, page_id: PageId) -> bool {
        self.page_table.find(&page_id).is_some()
    }
}
