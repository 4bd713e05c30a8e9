use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use prism_core::{
    blit_levels, ContextStats, DeviceId, Error, Fence, HostSpan, Image, ImageLayout, Queue, ResourceId, Result,
    SharedImage, TrackingToken,
};
use prism_types::MemoryFlags;

use crate::args::ImageView;
use crate::fence::host_fences;
use crate::memory::{BufferView, MemorySlice};
use crate::queue::host_queue;

/// Image stored in host memory in the tightly packed [`ImageLayout`] order.
pub struct HostImage {
    id: ResourceId,
    device: DeviceId,
    layout: Arc<ImageLayout>,
    flags: MemoryFlags,
    memory: MemorySlice,
    host_span: HostSpan,
    shared: Option<SharedImage>,
    label: Mutex<Option<String>>,
    stats: Arc<ContextStats>,
    _tracking: Option<TrackingToken>,
}

impl HostImage {
    pub(crate) fn new(
        device: DeviceId,
        layout: ImageLayout,
        flags: MemoryFlags,
        memory: MemorySlice,
        shared: Option<SharedImage>,
        stats: Arc<ContextStats>,
        tracking: Option<TrackingToken>,
    ) -> Self {
        Self {
            id: ResourceId::next(),
            device,
            layout: Arc::new(layout),
            flags,
            memory,
            host_span: HostSpan::default(),
            shared,
            label: Mutex::new(None),
            stats,
            _tracking: tracking,
        }
    }

    /// Texel access for kernels and the rasterizer.
    pub fn view(&self) -> Result<ImageView> {
        ImageView::new(self.memory.view(), Arc::clone(&self.layout))
    }

    pub(crate) fn memory(&self) -> BufferView {
        self.memory.view()
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

impl Image for HostImage {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn device(&self) -> DeviceId {
        self.device
    }

    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn flags(&self) -> MemoryFlags {
        self.flags
    }

    fn read_level(&self, queue: &dyn Queue, level: u32) -> Result<Vec<u8>> {
        self.check_queue(queue)?;
        let range = self.layout.level_range(level)?;
        host_queue(queue)?.wait_idle()?;
        let mut out = vec![0u8; range.len()];
        self.memory.view().read(range.start as u64, &mut out)?;
        self.stats.add_bytes_downloaded(out.len() as u64);
        Ok(out)
    }

    fn write_region(
        &self,
        queue: &dyn Queue,
        src: &[u8],
        offset: [u32; 3],
        extent: [u32; 3],
        mips: Range<u32>,
        layers: Range<u32>,
    ) -> Result<()> {
        self.check_queue(queue)?;
        let rows = self.layout.region_rows(offset, extent, mips, layers)?;
        let expected: usize = rows.iter().map(|r| r.len()).sum();
        if src.len() != expected {
            return Err(Error::invalid_argument(format!(
                "{} bytes for an image region of {expected} bytes",
                src.len()
            )));
        }
        host_queue(queue)?.wait_idle()?;
        let view = self.memory.view();
        let mut at = 0;
        for row in rows {
            let n = row.len();
            view.write(row.start as u64, &src[at..at + n])?;
            at += n;
        }
        self.stats.add_bytes_uploaded(expected as u64);
        Ok(())
    }

    fn blit_async(
        &self,
        queue: &dyn Queue,
        src: &Arc<dyn Image>,
        wait: &[Arc<dyn Fence>],
        signal: &[Arc<dyn Fence>],
    ) -> Result<()> {
        self.check_queue(queue)?;
        let source = src
            .as_any()
            .downcast_ref::<HostImage>()
            .ok_or_else(|| Error::invalid_argument(format!("blit source {} is not a host image", src.id())))?;
        if source.device != self.device {
            return Err(Error::invalid_argument(format!(
                "blit from {} on {} into {} on {}",
                source.id, source.device, self.id, self.device
            )));
        }
        let levels = blit_levels(&self.layout, &source.layout)?;
        // Equal extents and formats give equal level ranges for the shared levels.
        let end = self.layout.level_range(levels - 1)?.end as u64;
        let from = source.memory();
        let to = self.memory();
        let host = host_queue(queue)?;
        let wait = host_fences(wait, self.device)?;
        let signal = host_fences(signal, self.device)?;
        host.submit(
            format!("blit {} -> {}", source.id, self.id),
            wait,
            signal,
            Box::new(move || to.copy_from(0, &from, 0, end)),
            None,
        )?;
        Ok(())
    }

    fn host_span(&self) -> &HostSpan {
        &self.host_span
    }

    fn shared(&self) -> Option<&SharedImage> {
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
