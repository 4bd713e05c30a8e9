use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Process-unique identifier of a buffer, image or fence.
///
/// Argument buffers and indirect command slots serialize resources as their ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl ResourceId {
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ResourceKind {
    Buffer,
    Image,
}

/// Live buffer/image counters of one context.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    buffers: AtomicU64,
    images: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveResources {
    pub buffers: u64,
    pub images: u64,
}

impl ResourceTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counter(&self, kind: ResourceKind) -> &AtomicU64 {
        match kind {
            ResourceKind::Buffer => &self.buffers,
            ResourceKind::Image => &self.images,
        }
    }

    /// Counts a new resource until the returned token is dropped.
    pub fn track(self: &Arc<Self>, kind: ResourceKind) -> TrackingToken {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
        TrackingToken {
            tracker: Arc::clone(self),
            kind,
        }
    }

    pub fn live(&self) -> LiveResources {
        LiveResources {
            buffers: self.buffers.load(Ordering::Relaxed),
            images: self.images.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct TrackingToken {
    tracker: Arc<ResourceTracker>,
    kind: ResourceKind,
}

impl Drop for TrackingToken {
    fn drop(&mut self) {
        self.tracker.counter(self.kind).fetch_sub(1, Ordering::Relaxed);
    }
}

/// Host memory attached to a buffer or image as the default source/sink of transfers.
#[derive(Debug, Default)]
pub struct HostSpan {
    data: Mutex<Option<Vec<u8>>>,
}

impl HostSpan {
    pub fn attach(&self, data: Vec<u8>) {
        *self.data.lock() = Some(data);
    }

    pub fn detach(&self) -> Option<Vec<u8>> {
        self.data.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.data.lock().is_some()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Result<R> {
        let mut guard = self.data.lock();
        let data = guard
            .as_mut()
            .ok_or_else(|| Error::invalid_argument("no host span is attached"))?;
        Ok(f(data))
    }
}

/// Resolves an optional `size` against `total` and checks `[offset, offset + size)` is in range.
pub fn checked_range(total: u64, offset: u64, size: Option<u64>) -> Result<Range<u64>> {
    let size = size.unwrap_or_else(|| total.saturating_sub(offset));
    let end = offset
        .checked_add(size)
        .filter(|end| *end <= total)
        .ok_or_else(|| {
            Error::invalid_argument(format!(
                "range {offset}+{size} is outside the {total}-byte resource"
            ))
        })?;
    if size == 0 {
        return Err(Error::invalid_argument("empty range"));
    }
    Ok(offset..end)
}
