use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use prism_core::{
    checked_range, copy_ranges, fill_range, repeat_pattern, Buffer, ContextStats, DeviceId, Error, HostSpan,
    Queue, ResourceId, Result, SharedBuffer, TrackingToken,
};
use prism_types::MemoryFlags;

use crate::memory::{BufferView, MemorySlice};
use crate::queue::host_queue;

/// Largest chunk a fill job writes at once.
const FILL_CHUNK: usize = 64 * 1024;

pub struct HostBuffer {
    id: ResourceId,
    device: DeviceId,
    flags: MemoryFlags,
    memory: MemorySlice,
    host_span: HostSpan,
    shared: Option<SharedBuffer>,
    label: Mutex<Option<String>>,
    stats: Arc<ContextStats>,
    _tracking: Option<TrackingToken>,
}

impl HostBuffer {
    pub(crate) fn new(
        device: DeviceId,
        flags: MemoryFlags,
        memory: MemorySlice,
        shared: Option<SharedBuffer>,
        stats: Arc<ContextStats>,
        tracking: Option<TrackingToken>,
    ) -> Self {
        Self {
            id: ResourceId::next(),
            device,
            flags,
            memory,
            host_span: HostSpan::default(),
            shared,
            label: Mutex::new(None),
            stats,
            _tracking: tracking,
        }
    }

    /// The buffer's memory as kernels see it.
    pub fn view(&self) -> BufferView {
        self.memory.view()
    }

    pub fn is_heap_allocated(&self) -> bool {
        self.memory.is_heap()
    }

    fn check_queue(&self, queue: &dyn Queue) -> Result<()> {
        if queue.device().id != self.device {
            return Err(Error::invalid_argument(format!(
                "{} lives on {}, queue is on {}",
                self.id,
                self.device,
                queue.device()
            )));
        }
        Ok(())
    }
}

impl Buffer for HostBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn size(&self) -> u64 {
        self.memory.len()
    }

    fn flags(&self) -> MemoryFlags {
        self.flags
    }

    fn device(&self) -> DeviceId {
        self.device
    }

    fn read(&self, queue: &dyn Queue, dst: &mut [u8], offset: u64) -> Result<()> {
        self.check_queue(queue)?;
        checked_range(self.size(), offset, Some(dst.len() as u64))?;
        host_queue(queue)?.wait_idle()?;
        self.memory.view().read(offset, dst)?;
        self.stats.add_bytes_downloaded(dst.len() as u64);
        Ok(())
    }

    fn write(&self, queue: &dyn Queue, src: &[u8], offset: u64) -> Result<()> {
        self.check_queue(queue)?;
        checked_range(self.size(), offset, Some(src.len() as u64))?;
        host_queue(queue)?.wait_idle()?;
        self.memory.view().write(offset, src)?;
        self.stats.add_bytes_uploaded(src.len() as u64);
        Ok(())
    }

    fn copy(
        &self,
        queue: &dyn Queue,
        src: &dyn Buffer,
        size: Option<u64>,
        src_offset: u64,
        dst_offset: u64,
    ) -> Result<()> {
        self.check_queue(queue)?;
        let source = src
            .as_any()
            .downcast_ref::<HostBuffer>()
            .ok_or_else(|| Error::invalid_argument(format!("copy source {} is not a host buffer", src.id())))?;
        if source.device != self.device {
            return Err(Error::invalid_argument(format!(
                "copy from {} on {} into {} on {}",
                source.id, source.device, self.id, self.device
            )));
        }
        let (src_range, dst_range) = copy_ranges(src.size(), self.size(), size, src_offset, dst_offset)?;
        let len = src_range.end - src_range.start;
        if len == 0 {
            return Ok(());
        }
        let from = source.view();
        let to = self.view();
        host_queue(queue)?.enqueue(format!("copy {} -> {}", source.id, self.id), move || {
            to.copy_from(dst_range.start, &from, src_range.start, len)
        })?;
        Ok(())
    }

    fn fill(&self, queue: &dyn Queue, pattern: &[u8], size: Option<u64>, offset: u64) -> Result<()> {
        self.check_queue(queue)?;
        let range = fill_range(self.size(), pattern, size, offset)?;
        if range.is_empty() {
            return Ok(());
        }
        let len = (range.end - range.start) as usize;
        // Every accepted pattern size divides the chunk, so chunks stay pattern-aligned.
        let chunk = repeat_pattern(pattern, FILL_CHUNK.min(len));
        let view = self.view();
        host_queue(queue)?.enqueue(format!("fill {}", self.id), move || {
            let mut at = range.start;
            while at < range.end {
                let n = chunk.len().min((range.end - at) as usize);
                view.write(at, &chunk[..n])?;
                at += n as u64;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn host_span(&self) -> &HostSpan {
        &self.host_span
    }

    fn shared(&self) -> Option<&SharedBuffer> {
        self.shared.as_ref()
    }

    fn set_debug_label(&self, label: &str) {
        *self.label.lock() = Some(label.to_owned());
    }

    fn debug_label(&self) -> Option<String> {
        self.label.lock().clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
