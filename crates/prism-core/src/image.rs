use std::any::Any;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use prism_types::{ImageType, MemoryFlags, MemoryMapFlags, SharingApi};

use crate::buffer::{check_map_access, MappedRange};
use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::mip::{generate_mip_chain, ImageLayout};
use crate::queue::Queue;
use crate::resource::{HostSpan, ResourceId};
use crate::sharing::{shared_for, SharedImage, SyncDirection};

/// Parameters of `Context::create_image`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    /// `(width, height, depth, layers)`; see [`ImageLayout::new`].
    pub dims: [u32; 4],
    pub image_type: ImageType,
    /// Maximum number of mip levels, 0 = full chain.
    pub mip_limit: u32,
    pub debug_label: Option<String>,
}

impl ImageDesc {
    pub fn new(image_type: ImageType, dims: [u32; 4]) -> Self {
        Self {
            dims,
            image_type,
            mip_limit: 0,
            debug_label: None,
        }
    }

    pub fn d2(image_type: ImageType, width: u32, height: u32) -> Self {
        Self::new(image_type, [width, height, 1, 1])
    }

    pub fn with_mip_limit(mut self, mip_limit: u32) -> Self {
        self.mip_limit = mip_limit;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.debug_label = Some(label.into());
        self
    }
}

/// Checks that `src` can be blitted onto `dst` and returns the number of levels to copy.
pub fn blit_levels(dst: &ImageLayout, src: &ImageLayout) -> Result<u32> {
    if dst.image_type.format_key() != src.image_type.format_key() {
        return Err(Error::invalid_argument(format!(
            "blit between formats {:#x} and {:#x}",
            src.image_type.format_key(),
            dst.image_type.format_key()
        )));
    }
    if dst.extent != src.extent || dst.layers != src.layers {
        return Err(Error::invalid_argument(format!(
            "blit from {:?}x{} to {:?}x{}",
            src.extent, src.layers, dst.extent, dst.layers
        )));
    }
    Ok(dst.levels.min(src.levels))
}

/// Typed, possibly mipmapped and layered texel storage.
///
/// Level data is exchanged in the tightly packed layout described by [`ImageLayout`].
pub trait Image: Send + Sync {
    fn id(&self) -> ResourceId;

    fn device(&self) -> DeviceId;

    fn layout(&self) -> &ImageLayout;

    fn flags(&self) -> MemoryFlags;

    /// Reads every layer of mip `level`.
    fn read_level(&self, queue: &dyn Queue, level: u32) -> Result<Vec<u8>>;

    /// Writes a region of each level in `mips` and layer in `layers` from `src`.
    ///
    /// `offset`/`extent` apply to `mips.start`; later levels use them shifted down. `src`
    /// supplies the rows in [`ImageLayout::region_rows`] order.
    fn write_region(
        &self,
        queue: &dyn Queue,
        src: &[u8],
        offset: [u32; 3],
        extent: [u32; 3],
        mips: Range<u32>,
        layers: Range<u32>,
    ) -> Result<()>;

    /// Enqueues a whole-image copy from `src`, ordered after `wait` and signaling `signal`.
    fn blit_async(
        &self,
        queue: &dyn Queue,
        src: &Arc<dyn Image>,
        wait: &[Arc<dyn Fence>],
        signal: &[Arc<dyn Fence>],
    ) -> Result<()>;

    fn host_span(&self) -> &HostSpan;

    fn shared(&self) -> Option<&SharedImage>;

    fn set_debug_label(&self, label: &str);

    fn debug_label(&self) -> Option<String>;

    fn as_any(&self) -> &dyn Any;

    fn image_type(&self) -> ImageType {
        self.layout().image_type
    }

    /// `(width, height, depth, layers)` of level 0.
    fn dims(&self) -> [u32; 4] {
        let l = self.layout();
        [l.extent[0], l.extent[1], l.extent[2], l.layers]
    }

    fn mip_level_count(&self) -> u32 {
        self.layout().levels
    }

    fn level_dims(&self, level: u32) -> [u32; 3] {
        self.layout().level_extent(level)
    }

    fn write_level(&self, queue: &dyn Queue, level: u32, src: &[u8]) -> Result<()> {
        let layout = self.layout();
        if level >= layout.levels {
            return Err(Error::invalid_argument(format!(
                "mip level {level} of an image with {} levels",
                layout.levels
            )));
        }
        self.write_region(
            queue,
            src,
            [0; 3],
            layout.level_extent(level),
            level..level + 1,
            0..layout.layers,
        )
    }

    /// Reads level 0 into `dst`, which must be exactly one level in size.
    fn read(&self, queue: &dyn Queue, dst: &mut [u8]) -> Result<()> {
        let data = self.read_level(queue, 0)?;
        if dst.len() != data.len() {
            return Err(Error::invalid_argument(format!(
                "read of {} bytes from a level of {} bytes",
                dst.len(),
                data.len()
            )));
        }
        dst.copy_from_slice(&data);
        Ok(())
    }

    fn write(&self, queue: &dyn Queue, src: &[u8]) -> Result<()> {
        self.write_level(queue, 0, src)
    }

    /// Reads every level into one buffer in layout order.
    fn read_all(&self, queue: &dyn Queue) -> Result<Vec<u8>> {
        let layout = self.layout();
        let mut data = Vec::with_capacity(layout.total_bytes());
        for level in 0..layout.levels {
            data.extend_from_slice(&self.read_level(queue, level)?);
        }
        Ok(data)
    }

    fn write_all(&self, queue: &dyn Queue, src: &[u8]) -> Result<()> {
        let layout = self.layout();
        if src.len() != layout.total_bytes() {
            return Err(Error::invalid_argument(format!(
                "{} bytes for an image of {} bytes",
                src.len(),
                layout.total_bytes()
            )));
        }
        for level in 0..layout.levels {
            self.write_level(queue, level, &src[layout.level_range(level)?])?;
        }
        Ok(())
    }

    /// Rebuilds levels `1..` from level 0 (linear filter, nearest for depth and integer formats).
    fn generate_mip_map_chain(&self, queue: &dyn Queue) -> Result<()> {
        let layout = self.layout();
        if layout.levels <= 1 {
            return Ok(());
        }
        let mut data = vec![0u8; layout.total_bytes()];
        let level0 = self.read_level(queue, 0)?;
        data[layout.level_range(0)?].copy_from_slice(&level0);
        generate_mip_chain(layout, &mut data)?;
        for level in 1..layout.levels {
            self.write_level(queue, level, &data[layout.level_range(level)?])?;
        }
        Ok(())
    }

    /// Whole-image copy from `src`; blocks until it completed.
    fn blit(&self, queue: &dyn Queue, src: &Arc<dyn Image>) -> Result<()> {
        self.blit_async(queue, src, &[], &[])?;
        queue.finish()
    }

    /// Maps every level of the image, in layout order, into a staging copy.
    fn map(&self, queue: &dyn Queue, flags: MemoryMapFlags) -> Result<MappedRange> {
        check_map_access(self.flags(), flags)?;
        if flags.contains(MemoryMapFlags::BLOCK) {
            queue.finish()?;
        }
        let data = if flags.contains(MemoryMapFlags::WRITE_INVALIDATE) {
            vec![0u8; self.layout().total_bytes()]
        } else {
            self.read_all(queue)?
        };
        Ok(MappedRange::new(self.id(), 0, flags, data))
    }

    fn unmap(&self, queue: &dyn Queue, mapped: MappedRange) -> Result<()> {
        if mapped.resource() != self.id() {
            return Err(Error::invalid_argument(format!(
                "mapping of {} unmapped through {}",
                mapped.resource(),
                self.id()
            )));
        }
        if mapped.flags().writes() {
            self.write_all(queue, &mapped)?;
        }
        Ok(())
    }

    /// Attaches host memory holding every level; its length must equal the image size.
    fn attach_host_span(&self, data: Vec<u8>) -> Result<()> {
        if data.len() != self.layout().total_bytes() {
            return Err(Error::invalid_argument(format!(
                "host span of {} bytes for an image of {} bytes",
                data.len(),
                self.layout().total_bytes()
            )));
        }
        self.host_span().attach(data);
        Ok(())
    }

    fn read_host(&self, queue: &dyn Queue) -> Result<()> {
        if !self.host_span().is_attached() {
            return Err(Error::invalid_argument("no host span is attached"));
        }
        let data = self.read_all(queue)?;
        self.host_span().attach(data);
        Ok(())
    }

    fn write_host(&self, queue: &dyn Queue) -> Result<()> {
        let data = self
            .host_span()
            .detach()
            .ok_or_else(|| Error::invalid_argument("no host span is attached"))?;
        let result = self.write_all(queue, &data);
        self.host_span().attach(data);
        result
    }

    fn acquire_shared(&self, queue: &dyn Queue, api: SharingApi) -> Result<Arc<dyn Image>> {
        let shared = shared_for(self.shared(), api, self.id())?;
        shared.ownership.acquire()?;
        if let Err(err) = self.sync_shared(queue, api, SyncDirection::ToForeign) {
            shared.ownership.reset();
            return Err(err);
        }
        Ok(Arc::clone(&shared.image))
    }

    fn release_shared(&self, queue: &dyn Queue, api: SharingApi) -> Result<()> {
        let shared = shared_for(self.shared(), api, self.id())?;
        shared.ownership.release()?;
        self.sync_shared(queue, api, SyncDirection::FromForeign)
    }

    fn sync_shared(&self, queue: &dyn Queue, api: SharingApi, direction: SyncDirection) -> Result<()> {
        let shared = shared_for(self.shared(), api, self.id())?;
        let levels = blit_levels(self.layout(), shared.image.layout())?;
        for level in 0..levels {
            match direction {
                SyncDirection::ToForeign => {
                    let data = self.read_level(queue, level)?;
                    shared.image.write_level(shared.queue.as_ref(), level, &data)?;
                }
                SyncDirection::FromForeign => {
                    let data = shared.image.read_level(shared.queue.as_ref(), level)?;
                    self.write_level(queue, level, &data)?;
                }
            }
        }
        Ok(())
    }

    fn acquire_vulkan_image(&self, queue: &dyn Queue) -> Result<Arc<dyn Image>> {
        self.acquire_shared(queue, SharingApi::Vulkan)
    }

    fn release_vulkan_image(&self, queue: &dyn Queue) -> Result<()> {
        self.release_shared(queue, SharingApi::Vulkan)
    }

    fn sync_vulkan_image(&self, queue: &dyn Queue, direction: SyncDirection) -> Result<()> {
        self.sync_shared(queue, SharingApi::Vulkan, direction)
    }

    fn acquire_metal_image(&self, queue: &dyn Queue) -> Result<Arc<dyn Image>> {
        self.acquire_shared(queue, SharingApi::Metal)
    }

    fn release_metal_image(&self, queue: &dyn Queue) -> Result<()> {
        self.release_shared(queue, SharingApi::Metal)
    }

    fn sync_metal_image(&self, queue: &dyn Queue, direction: SyncDirection) -> Result<()> {
        self.sync_shared(queue, SharingApi::Metal, direction)
    }
}

impl fmt::Debug for dyn Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id())
            .field("type", &self.image_type())
            .field("dims", &self.dims())
            .field("levels", &self.mip_level_count())
            .field("device", &self.device())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceCaps, DeviceType};
    use prism_types::Backend;

    fn device() -> Device {
        let mut d = Device::new(DeviceId(0), Backend::Host, DeviceType::Cpu, "test");
        d.caps = DeviceCaps::IMAGE_MIPMAP | DeviceCaps::IMAGE_DEPTH;
        d
    }

    #[test]
    fn blit_requires_matching_format_and_extent() {
        let d = device();
        let a = ImageLayout::new(&d, ImageType::RGBA8_UNORM, [8, 8, 1, 1], 0).unwrap();
        let b = ImageLayout::new(&d, ImageType::RGBA8_UNORM.mipmapped(), [8, 8, 1, 1], 0).unwrap();
        assert_eq!(blit_levels(&b, &a).unwrap(), 1);
        let c = ImageLayout::new(&d, ImageType::RGBA8_UNORM, [4, 8, 1, 1], 0).unwrap();
        assert!(blit_levels(&a, &c).is_err());
        let e = ImageLayout::new(&d, ImageType::R32_FLOAT, [8, 8, 1, 1], 0).unwrap();
        assert!(blit_levels(&a, &e).is_err());
    }
}
