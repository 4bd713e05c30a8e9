use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use prism_core::{Drawable, Error, Image, Result, Surface};
use prism_types::ImageType;

use crate::image::HostImage;

/// Called with every presented frame.
pub type PresentSink = Arc<dyn Fn(&PresentedFrame) + Send + Sync>;

/// Contents of a presented drawable, all layers of level 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentedFrame {
    pub index: u32,
    pub multi_view: bool,
    pub size: [u32; 2],
    pub data: Vec<u8>,
}

struct Slot {
    image: Arc<HostImage>,
    /// Two-layer sibling used for multi-view frames.
    multi_view: Arc<HostImage>,
}

#[derive(Default)]
struct SlotPool {
    in_use: Mutex<Vec<bool>>,
    released: Condvar,
}

impl SlotPool {
    fn release(&self, index: usize) {
        let mut in_use = self.in_use.lock();
        if let Some(slot) = in_use.get_mut(index) {
            *slot = false;
        }
        self.released.notify_one();
    }
}

/// Returns its slot to the pool when the drawable is presented or dropped.
struct SlotLease {
    pool: Arc<SlotPool>,
    index: usize,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// A swapchain of host images standing in for a window.
///
/// Presenting reads the drawable back, keeps it as the latest frame and hands it to the
/// optional sink.
pub struct OffscreenSurface {
    size: [u32; 2],
    format: ImageType,
    slots: Vec<Slot>,
    pool: Arc<SlotPool>,
    latest: Mutex<Option<PresentedFrame>>,
    sink: Option<PresentSink>,
}

impl OffscreenSurface {
    pub(crate) fn new(
        size: [u32; 2],
        format: ImageType,
        images: Vec<(Arc<HostImage>, Arc<HostImage>)>,
        sink: Option<PresentSink>,
    ) -> Self {
        let pool = Arc::new(SlotPool::default());
        *pool.in_use.lock() = vec![false; images.len()];
        let slots = images
            .into_iter()
            .map(|(image, multi_view)| Slot { image, multi_view })
            .collect();
        Self {
            size,
            format,
            slots,
            pool,
            latest: Mutex::new(None),
            sink,
        }
    }

    pub fn image_count(&self) -> usize {
        self.slots.len()
    }

    /// The most recently presented frame.
    pub fn latest_frame(&self) -> Option<PresentedFrame> {
        self.latest.lock().clone()
    }
}

impl Surface for OffscreenSurface {
    fn size(&self) -> [u32; 2] {
        self.size
    }

    fn format(&self) -> ImageType {
        self.format
    }

    fn acquire_next(&self, multi_view: bool) -> Result<Drawable> {
        if self.slots.is_empty() {
            return Err(Error::invalid_argument("surface has no images"));
        }
        let mut in_use = self.pool.in_use.lock();
        let index = loop {
            if let Some(index) = in_use.iter().position(|used| !used) {
                break index;
            }
            self.pool.released.wait(&mut in_use);
        };
        in_use[index] = true;
        drop(in_use);

        let slot = &self.slots[index];
        let image: Arc<dyn Image> = if multi_view {
            slot.multi_view.clone()
        } else {
            slot.image.clone()
        };
        tracing::trace!(index, multi_view, "acquired drawable");
        Ok(Drawable::new(image, index as u32, multi_view).with_lease(SlotLease {
            pool: Arc::clone(&self.pool),
            index,
        }))
    }

    fn present(&self, drawable: Drawable) -> Result<()> {
        let mut drawable = drawable;
        let slot = self
            .slots
            .get(drawable.index as usize)
            .ok_or_else(|| Error::invalid_argument(format!("drawable {} is not from this surface", drawable.index)))?;
        let image = if drawable.multi_view {
            &slot.multi_view
        } else {
            &slot.image
        };
        if image.id() != drawable.image.id() {
            return Err(Error::invalid_argument(format!(
                "drawable {} does not hold this surface's image",
                drawable.index
            )));
        }
        // Presenting runs on the queue worker after the frame's commands; read memory directly.
        let memory = image.memory();
        let level0 = image.layout().level_range(0)?;
        let mut data = vec![0u8; level0.len()];
        memory.read(level0.start as u64, &mut data)?;
        let frame = PresentedFrame {
            index: drawable.index,
            multi_view: drawable.multi_view,
            size: self.size,
            data,
        };
        if let Some(sink) = &self.sink {
            sink(&frame);
        }
        *self.latest.lock() = Some(frame);
        drop(drawable.take_lease());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for OffscreenSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffscreenSurface")
            .field("size", &self.size)
            .field("images", &self.slots.len())
            .finish()
    }
}
