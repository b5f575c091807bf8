use log::warn;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::QuartzDBResult;

pub type Lsn = u64;

pub const INVALID_LSN: Lsn = 0;

/// Append-only write-ahead log. Records are buffered in memory until a
/// caller forces them out with `flush_to`; the buffer pool does so before
/// writing back any dirty page (WAL rule).
#[derive(Debug)]
pub struct LogManager {
    log_file: Mutex<File>,
    /// Records appended but not yet durable, with their lsn.
    buffer: Mutex<VecDeque<(Lsn, Vec<u8>)>>,
    next_lsn: AtomicU64,
    persistent_lsn: AtomicU64,
    shutdown: AtomicBool,
}

impl LogManager {
    pub fn try_new(log_path: impl AsRef<Path>) -> QuartzDBResult<Self> {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        Ok(Self {
            log_file: Mutex::new(log_file),
            buffer: Mutex::new(VecDeque::new()),
            next_lsn: AtomicU64::new(INVALID_LSN + 1),
            persistent_lsn: AtomicU64::new(INVALID_LSN),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Buffers a record and returns the lsn assigned to it.
    pub fn append(&self, record: &[u8]) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        self.buffer.lock().push_back((lsn, record.to_vec()));
        lsn
    }

    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// Makes every record with `record_lsn <= lsn` durable.
    pub fn flush_to(&self, lsn: Lsn) -> QuartzDBResult<()> {
        if lsn <= self.persistent_lsn() {
            return Ok(());
        }
        let mut buffer = self.buffer.lock();
        let mut log_file = self.log_file.lock();
        let mut flushed = self.persistent_lsn();
        while buffer.front().is_some_and(|(record_lsn, _)| *record_lsn <= lsn) {
            let Some((record_lsn, record)) = buffer.pop_front() else {
                break;
            };
            log_file.write_all(&(record.len() as u32).to_be_bytes())?;
            log_file.write_all(&record)?;
            flushed = record_lsn;
        }
        log_file.sync_data()?;
        self.persistent_lsn.fetch_max(flushed, Ordering::SeqCst);
        Ok(())
    }

    pub fn flush_all(&self) -> QuartzDBResult<()> {
        let latest = self.next_lsn.load(Ordering::SeqCst) - 1;
        self.flush_to(latest)
    }

    /// Spawns the periodic flusher honoring `log_timeout`; it runs until
    /// `shutdown` is called.
    pub fn start_background_flush(self: &Arc<Self>, log_timeout: Duration) -> thread::JoinHandle<()> {
        let log_manager = Arc::clone(self);
        thread::spawn(move || {
            while !log_manager.shutdown.load(Ordering::Relaxed) {
                thread::sleep(log_timeout);
                if let Err(e) = log_manager.flush_all() {
                    warn!("background log flush failed: {}", e);
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flush_to_advances_persistent_lsn() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("test.wal");
        let log_manager = LogManager::try_new(&log_path).unwrap();

        let lsn1 = log_manager.append(b"first");
        let lsn2 = log_manager.append(b"second");
        let lsn3 = log_manager.append(b"third");
        assert_eq!(log_manager.persistent_lsn(), INVALID_LSN);

        log_manager.flush_to(lsn2).unwrap();
        assert_eq!(log_manager.persistent_lsn(), lsn2);

        log_manager.flush_to(lsn3).unwrap();
        assert_eq!(log_manager.persistent_lsn(), lsn3);
        assert!(std::fs::metadata(&log_path).unwrap().len() > 0);

        // flushing an already-durable prefix is a no-op
        log_manager.flush_to(lsn1).unwrap();
        assert_eq!(log_manager.persistent_lsn(), lsn3);
    }
}
