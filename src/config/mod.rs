use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Process-wide WAL switch. Treated as immutable after startup.
pub static ENABLE_LOGGING: AtomicBool = AtomicBool::new(false);

pub fn logging_enabled() -> bool {
    ENABLE_LOGGING.load(Ordering::Relaxed)
}

pub fn set_logging_enabled(enabled: bool) {
    ENABLE_LOGGING.store(enabled, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacerPolicy {
    Lru,
    Clock,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    /// Number of frames owned by the buffer pool.
    pub pool_size: usize,
    /// Capacity of each page-table hash bucket.
    pub bucket_size: usize,
    pub replacer: ReplacerPolicy,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            pool_size: 1024,
            bucket_size: 50,
            replacer: ReplacerPolicy::Lru,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoggingConfig {
    /// Interval of the background log flusher.
    pub log_timeout: Duration,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_timeout: Duration::from_secs(1),
        }
    }
}
