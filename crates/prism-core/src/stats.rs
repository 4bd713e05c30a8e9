use std::sync::atomic::{AtomicU64, Ordering};

/// Per-context counters.
///
/// Updated from queue workers and read from any thread; all counters are relaxed.
#[derive(Debug, Default)]
pub struct ContextStats {
    submissions: AtomicU64,
    kernel_launches: AtomicU64,
    indirect_commands: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    draws: AtomicU64,
    presents: AtomicU64,
    failed_submissions: AtomicU64,
    heap_bytes: AtomicU64,
}

impl ContextStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_submissions(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_kernel_launches(&self) {
        self.kernel_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_indirect_commands(&self, count: u64) {
        self.indirect_commands.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_bytes_uploaded(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_downloaded(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_draws(&self, count: u64) {
        self.draws.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_presents(&self) {
        self.presents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_submissions(&self) {
        self.failed_submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes currently sub-allocated from device heaps.
    pub fn add_heap_bytes(&self, bytes: u64) {
        self.heap_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub_heap_bytes(&self, bytes: u64) {
        self.heap_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ContextStatsSnapshot {
        ContextStatsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            kernel_launches: self.kernel_launches.load(Ordering::Relaxed),
            indirect_commands: self.indirect_commands.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            draws: self.draws.load(Ordering::Relaxed),
            presents: self.presents.load(Ordering::Relaxed),
            failed_submissions: self.failed_submissions.load(Ordering::Relaxed),
            heap_bytes: self.heap_bytes.load(Ordering::Relaxed),
        }
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStatsSnapshot {
    pub submissions: u64,
    pub kernel_launches: u64,
    pub indirect_commands: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub draws: u64,
    pub presents: u64,
    pub failed_submissions: u64,
    pub heap_bytes: u64,
}

impl ContextStatsSnapshot {
    pub fn to_json(self) -> String {
        format!(
            "{{\"submissions\":{},\"kernel_launches\":{},\"indirect_commands\":{},\"bytes_uploaded\":{},\"bytes_downloaded\":{},\"draws\":{},\"presents\":{},\"failed_submissions\":{},\"heap_bytes\":{}}}",
            self.submissions,
            self.kernel_launches,
            self.indirect_commands,
            self.bytes_uploaded,
            self.bytes_downloaded,
            self.draws,
            self.presents,
            self.failed_submissions,
            self.heap_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_json_contains_counters() {
        let stats = ContextStats::new();
        stats.inc_submissions();
        stats.inc_kernel_launches();
        stats.inc_kernel_launches();
        stats.add_bytes_uploaded(64);
        stats.add_draws(3);
        stats.add_heap_bytes(512);
        stats.sub_heap_bytes(256);
        let json = stats.to_json();
        assert!(json.starts_with('{') && json.ends_with('}'));
        assert!(json.contains("\"submissions\":1"));
        assert!(json.contains("\"kernel_launches\":2"));
        assert!(json.contains("\"bytes_uploaded\":64"));
        assert!(json.contains("\"draws\":3"));
        assert!(json.contains("\"presents\":0"));
        assert!(json.contains("\"heap_bytes\":256"));
    }
}
