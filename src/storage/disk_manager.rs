use bytes::{Bytes, BytesMut};
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::buffer::{PageId, PAGE_SIZE};
use crate::error::{QuartzDBError, QuartzDBResult};

/// Synchronous, thread-safe page store over a single database file. Page ids
/// grow monotonically; page 0 is reserved for the header page and data pages
/// start at 1. Reading past the end of the file yields a zeroed page, which
/// is how the header page bootstraps itself on a fresh database.
#[derive(Debug)]
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
}

impl DiskManager {
    pub fn try_new(db_path: impl AsRef<Path>) -> QuartzDBResult<Self> {
        let db_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(db_path)?;
        let file_len = db_file.metadata()?.len();
        let num_pages = (file_len as usize).div_ceil(PAGE_SIZE);
        let next_page_id = num_pages.max(1) as PageId;
        Ok(Self {
            db_file: Mutex::new(db_file),
            next_page_id: AtomicI32::new(next_page_id),
        })
    }

    /// Mints a fresh page id. No disk I/O happens until the page is written.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Logically idempotent; the file is never shrunk and the id is not
    /// reused.
    pub fn deallocate_page(&self, page_id: PageId) {
        debug!("deallocate page {}", page_id);
    }

    pub fn read_page(&self, page_id: PageId) -> QuartzDBResult<Bytes> {
        if page_id < 0 {
            return Err(QuartzDBError::Internal(format!(
                "read of invalid page id {}",
                page_id
            )));
        }
        let mut db_file = self.db_file.lock();
        let mut buf = BytesMut::zeroed(PAGE_SIZE);
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let file_len = db_file.metadata()?.len();
        if offset < file_len {
            db_file.seek(SeekFrom::Start(offset))?;
            let mut total = 0;
            while total < PAGE_SIZE {
                match db_file.read(&mut buf[total..]) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(buf.freeze())
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> QuartzDBResult<()> {
        if page_id < 0 {
            return Err(QuartzDBError::Internal(format!(
                "write of invalid page id {}",
                page_id
            )));
        }
        if data.len() != PAGE_SIZE {
            return Err(QuartzDBError::Internal(format!(
                "page image is {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        let mut db_file = self.db_file.lock();
        db_file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        db_file.write_all(data)?;
        db_file.flush()?;
        Ok(())
    }

    pub fn sync(&self) -> QuartzDBResult<()> {
        self.db_file.lock().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_allocate_is_monotonic_from_one() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();
        assert_eq!(disk_manager.allocate_page(), 1);
        assert_eq!(disk_manager.allocate_page(), 2);
        assert_eq!(disk_manager.allocate_page(), 3);
    }

    #[test]
    fn test_write_read_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();

        let page_id = disk_manager.allocate_page();
        let mut image = vec![0u8; PAGE_SIZE];
        image[0] = 1;
        image[PAGE_SIZE - 1] = 2;
        disk_manager.write_page(page_id, &image).unwrap();

        let read = disk_manager.read_page(page_id).unwrap();
        assert_eq!(&read[..], &image[..]);
    }

    #[test]
    fn test_read_unwritten_page_is_zeroed() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();
        let read = disk_manager.read_page(42).unwrap();
        assert_eq!(read.len(), PAGE_SIZE);
        assert!(read.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_reopen_preserves_allocation_watermark() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let page_id = {
            let disk_manager = DiskManager::try_new(&db_path).unwrap();
            let page_id = disk_manager.allocate_page();
            disk_manager
                .write_page(page_id, &vec![7u8; PAGE_SIZE])
                .unwrap();
            page_id
        };
        let disk_manager = DiskManager::try_new(&db_path).unwrap();
        assert!(disk_manager.allocate_page() > page_id);
    }
}
