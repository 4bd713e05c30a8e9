use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use prism_core::{
    align_up, checked_range, copy_ranges, fill_range, repeat_pattern, Buffer, ContextStats, DeviceId, Error,
    HeapAllocation, HostSpan, Queue, ResourceId, Result, SharedBuffer, TrackingToken,
};
use prism_types::MemoryFlags;

use crate::device::GpuDevice;
use crate::queue::wgpu_queue;

/// Every buffer can be bound, copied and used as vertex or index input.
pub(crate) const BUFFER_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::UNIFORM)
    .union(wgpu::BufferUsages::VERTEX)
    .union(wgpu::BufferUsages::INDEX)
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Largest chunk a fill uploads at once.
const FILL_CHUNK: usize = 1 << 20;

/// Alignment of buffer copy offsets and sizes.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Allocates a raw buffer, turning validation and out-of-memory errors into prism errors.
pub(crate) fn create_raw_buffer(gpu: &GpuDevice, size: u64, usage: wgpu::BufferUsages, label: &str) -> Result<wgpu::Buffer> {
    gpu.scoped(label, || {
        Ok(gpu.raw.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }))
    })
}

/// Where a buffer's bytes live: a dedicated `wgpu` buffer or a range of a heap block.
pub(crate) enum BufferMemory {
    Dedicated(Arc<wgpu::Buffer>),
    Heap {
        allocation: HeapAllocation<wgpu::Buffer>,
        size: u64,
        stats: Arc<ContextStats>,
    },
}

impl BufferMemory {
    pub(crate) fn heap(allocation: HeapAllocation<wgpu::Buffer>, size: u64, stats: Arc<ContextStats>) -> Self {
        stats.add_heap_bytes(size);
        Self::Heap {
            allocation,
            size,
            stats,
        }
    }

    pub(crate) fn raw(&self) -> &wgpu::Buffer {
        match self {
            Self::Dedicated(buffer) => buffer,
            Self::Heap { allocation, .. } => allocation.storage(),
        }
    }

    pub(crate) fn raw_arc(&self) -> Arc<wgpu::Buffer> {
        match self {
            Self::Dedicated(buffer) => Arc::clone(buffer),
            Self::Heap { allocation, .. } => Arc::clone(allocation.storage()),
        }
    }

    /// Offset of the buffer's first byte within [`raw`](Self::raw).
    pub(crate) fn base(&self) -> u64 {
        match self {
            Self::Dedicated(_) => 0,
            Self::Heap { allocation, .. } => allocation.offset(),
        }
    }

    fn len(&self) -> u64 {
        match self {
            Self::Dedicated(buffer) => buffer.size(),
            Self::Heap { size, .. } => *size,
        }
    }

    fn is_heap(&self) -> bool {
        matches!(self, Self::Heap { .. })
    }
}

impl Drop for BufferMemory {
    fn drop(&mut self) {
        if let Self::Heap { size, stats, .. } = self {
            stats.sub_heap_bytes(*size);
        }
    }
}

/// `range` widened to copy alignment.
fn aligned(range: Range<u64>) -> Range<u64> {
    let start = range.start - range.start % COPY_ALIGNMENT;
    start..align_up(range.end, COPY_ALIGNMENT)
}

pub struct WgpuBuffer {
    id: ResourceId,
    gpu: Arc<GpuDevice>,
    flags: MemoryFlags,
    memory: BufferMemory,
    host_span: HostSpan,
    shared: Option<SharedBuffer>,
    label: Mutex<Option<String>>,
    _tracking: Option<TrackingToken>,
}

impl WgpuBuffer {
    pub(crate) fn new(
        gpu: Arc<GpuDevice>,
        flags: MemoryFlags,
        memory: BufferMemory,
        shared: Option<SharedBuffer>,
        tracking: Option<TrackingToken>,
    ) -> Self {
        Self {
            id: ResourceId::next(),
            gpu,
            flags,
            memory,
            host_span: HostSpan::default(),
            shared,
            label: Mutex::new(None),
            _tracking: tracking,
        }
    }

    pub(crate) fn memory(&self) -> &BufferMemory {
        &self.memory
    }

    pub fn is_heap_allocated(&self) -> bool {
        self.memory.is_heap()
    }

    fn check_queue(&self, queue: &dyn Queue) -> Result<()> {
        if queue.device().id != self.gpu.id() {
            return Err(Error::invalid_argument(format!(
                "{} lives on {}, queue is on {}",
                self.id,
                self.gpu.id(),
                queue.device()
            )));
        }
        Ok(())
    }

    /// Reads the copy-aligned range around `range` back to the host.
    fn read_aligned(&self, queue: &dyn Queue, range: Range<u64>) -> Result<(Vec<u8>, u64)> {
        let wide = aligned(range);
        let len = wide.end - wide.start;
        let staging = create_raw_buffer(
            &self.gpu,
            len,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            "prism readback",
        )?;
        let source = self.memory.raw_arc();
        let offset = self.memory.base() + wide.start;
        let staging = Arc::new(staging);
        let target = Arc::clone(&staging);
        let queue = wgpu_queue(queue)?;
        queue.submit_commands(format!("read {}", self.id), Vec::new(), Vec::new(), None, move |encoder| {
            encoder.copy_buffer_to_buffer(&source, offset, &target, 0, len);
            Ok(())
        })?;
        queue.wait_idle()?;
        Ok((self.gpu.read_mapped(&staging, len)?, wide.start))
    }

    /// Uploads `src` at `offset`, widening unaligned writes with the bytes around them.
    fn write_raw(&self, queue: &dyn Queue, src: &[u8], offset: u64) -> Result<()> {
        let range = offset..offset + src.len() as u64;
        let wide = aligned(range.clone());
        let raw = self.memory.raw();
        if wide == range {
            wgpu_queue(queue)?.wait_submitted()?;
            self.gpu.queue.write_buffer(raw, self.memory.base() + offset, src);
        } else {
            let (mut data, start) = self.read_aligned(queue, range)?;
            let at = (offset - start) as usize;
            data[at..at + src.len()].copy_from_slice(src);
            self.gpu.queue.write_buffer(raw, self.memory.base() + start, &data);
        }
        // Staged writes reach the GPU with the next submission.
        self.gpu.queue.submit(std::iter::empty());
        Ok(())
    }
}

impl Buffer for WgpuBuffer {
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
        self.gpu.id()
    }

    fn read(&self, queue: &dyn Queue, dst: &mut [u8], offset: u64) -> Result<()> {
        self.check_queue(queue)?;
        let range = checked_range(self.size(), offset, Some(dst.len() as u64))?;
        if dst.is_empty() {
            return Ok(());
        }
        let (data, start) = self.read_aligned(queue, range)?;
        let at = (offset - start) as usize;
        dst.copy_from_slice(&data[at..at + dst.len()]);
        self.gpu.stats.add_bytes_downloaded(dst.len() as u64);
        Ok(())
    }

    fn write(&self, queue: &dyn Queue, src: &[u8], offset: u64) -> Result<()> {
        self.check_queue(queue)?;
        checked_range(self.size(), offset, Some(src.len() as u64))?;
        if src.is_empty() {
            return Ok(());
        }
        self.write_raw(queue, src, offset)?;
        self.gpu.stats.add_bytes_uploaded(src.len() as u64);
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
            .downcast_ref::<WgpuBuffer>()
            .ok_or_else(|| Error::invalid_argument(format!("copy source {} is not a wgpu buffer", src.id())))?;
        if source.gpu.id() != self.gpu.id() {
            return Err(Error::invalid_argument(format!(
                "copy from {} on {} into {} on {}",
                source.id,
                source.gpu.id(),
                self.id,
                self.gpu.id()
            )));
        }
        let (src_range, dst_range) = copy_ranges(src.size(), self.size(), size, src_offset, dst_offset)?;
        let len = src_range.end - src_range.start;
        if len == 0 {
            return Ok(());
        }
        if [src_range.start, dst_range.start, len].iter().any(|v| v % COPY_ALIGNMENT != 0) {
            // The GPU copy engine needs 4-byte alignment; go through the host instead.
            let mut data = vec![0u8; len as usize];
            source.read(queue, &mut data, src_range.start)?;
            return self.write_raw(queue, &data, dst_range.start);
        }
        let from = source.memory.raw_arc();
        let from_offset = source.memory.base() + src_range.start;
        let to = self.memory.raw_arc();
        let to_offset = self.memory.base() + dst_range.start;
        wgpu_queue(queue)?.submit_commands(
            format!("copy {} -> {}", source.id, self.id),
            Vec::new(),
            Vec::new(),
            None,
            move |encoder| {
                encoder.copy_buffer_to_buffer(&from, from_offset, &to, to_offset, len);
                Ok(())
            },
        )
    }

    fn fill(&self, queue: &dyn Queue, pattern: &[u8], size: Option<u64>, offset: u64) -> Result<()> {
        self.check_queue(queue)?;
        let range = fill_range(self.size(), pattern, size, offset)?;
        if range.is_empty() {
            return Ok(());
        }
        let len = (range.end - range.start) as usize;
        if pattern.iter().all(|b| *b == 0) && aligned(range.clone()) == range {
            let raw = self.memory.raw_arc();
            let start = self.memory.base() + range.start;
            return wgpu_queue(queue)?.submit_commands(
                format!("clear {}", self.id),
                Vec::new(),
                Vec::new(),
                None,
                move |encoder| {
                    encoder.clear_buffer(&raw, start, Some(len as u64));
                    Ok(())
                },
            );
        }
        // Every accepted pattern size divides the chunk, so chunks stay pattern-aligned.
        let chunk = repeat_pattern(pattern, FILL_CHUNK.min(len));
        let mut at = range.start;
        while at < range.end {
            let n = chunk.len().min((range.end - at) as usize);
            self.write_raw(queue, &chunk[..n], at)?;
            at += n as u64;
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_keeps_aligned_ranges() {
        assert_eq!(aligned(8..16), 8..16);
        assert_eq!(aligned(5..6), 4..8);
        assert_eq!(aligned(3..13), 0..16);
    }
}
