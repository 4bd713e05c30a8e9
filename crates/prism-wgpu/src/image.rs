use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use prism_core::{
    align_up, blit_levels, DeviceId, Error, Fence, HostSpan, Image, ImageLayout, Queue, ResourceId, Result,
    SharedImage, TrackingToken,
};
use prism_types::MemoryFlags;

use crate::buffer::create_raw_buffer;
use crate::convert::{copy_aspect, map_dimensions, map_texture_format, COPY_ROW_ALIGNMENT};
use crate::device::GpuDevice;
use crate::queue::wgpu_queue;

/// Texture usages an image of `layout` needs on `gpu`.
fn texture_usage(gpu: &GpuDevice, layout: &ImageLayout, format: wgpu::TextureFormat) -> Result<wgpu::TextureUsages> {
    let ty = layout.image_type;
    let mut usage =
        wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING;
    if ty.is_render_target() || ty.is_depth() {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if ty.is_writable() && !ty.is_depth() && !ty.is_msaa() {
        let allowed = gpu.adapter.get_texture_format_features(format).allowed_usages;
        if allowed.contains(wgpu::TextureUsages::STORAGE_BINDING) {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        } else if !ty.is_render_target() {
            return Err(Error::capability_missing(format!(
                "{} cannot write {format:?} images from kernels",
                gpu.info
            )));
        }
    }
    Ok(usage)
}

/// Texel data of one image in a `wgpu` texture.
pub struct WgpuImage {
    id: ResourceId,
    gpu: Arc<GpuDevice>,
    layout: ImageLayout,
    flags: MemoryFlags,
    texture: wgpu::Texture,
    format: wgpu::TextureFormat,
    dimension: wgpu::TextureDimension,
    view_dimension: wgpu::TextureViewDimension,
    /// Every level, for sampling.
    view: Arc<wgpu::TextureView>,
    /// Level 0 only, for storage bindings.
    storage_view: Arc<wgpu::TextureView>,
    host_span: HostSpan,
    shared: Option<SharedImage>,
    label: Mutex<Option<String>>,
    _tracking: Option<TrackingToken>,
}

impl WgpuImage {
    pub(crate) fn create(
        gpu: Arc<GpuDevice>,
        layout: ImageLayout,
        flags: MemoryFlags,
        shared: Option<SharedImage>,
        tracking: Option<TrackingToken>,
        label: Option<&str>,
    ) -> Result<Self> {
        let ty = layout.image_type;
        let format = map_texture_format(ty)?;
        let (dimension, view_dimension) = map_dimensions(ty)?;
        let usage = texture_usage(&gpu, &layout, format)?;
        let depth_or_array_layers = match dimension {
            wgpu::TextureDimension::D3 => layout.extent[2],
            _ => layout.layers,
        };
        let texture = gpu.scoped(label.unwrap_or("image"), || {
            Ok(gpu.raw.create_texture(&wgpu::TextureDescriptor {
                label,
                size: wgpu::Extent3d {
                    width: layout.extent[0],
                    height: layout.extent[1],
                    depth_or_array_layers,
                },
                mip_level_count: layout.levels,
                sample_count: ty.sample_count(),
                dimension,
                format,
                usage,
                view_formats: &[],
            }))
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(view_dimension),
            ..Default::default()
        });
        let storage_view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(view_dimension),
            mip_level_count: Some(1),
            ..Default::default()
        });
        tracing::trace!(?format, extent = ?layout.extent, levels = layout.levels, "wgpu texture created");
        Ok(Self {
            id: ResourceId::next(),
            gpu,
            layout,
            flags,
            texture,
            format,
            dimension,
            view_dimension,
            view: Arc::new(view),
            storage_view: Arc::new(storage_view),
            host_span: HostSpan::default(),
            shared,
            label: Mutex::new(label.map(str::to_owned)),
            _tracking: tracking,
        })
    }

    pub(crate) fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub(crate) fn view_dimension(&self) -> wgpu::TextureViewDimension {
        self.view_dimension
    }

    pub(crate) fn view(&self) -> Arc<wgpu::TextureView> {
        Arc::clone(&self.view)
    }

    pub(crate) fn storage_view(&self) -> Arc<wgpu::TextureView> {
        Arc::clone(&self.storage_view)
    }

    /// Level 0 as a render attachment: layer 0, or layers `0..views` for multi-view passes.
    pub(crate) fn attachment_view(&self, views: Option<u32>) -> Result<wgpu::TextureView> {
        if !self.texture.usage().contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            return Err(Error::invalid_argument(format!("{} is not a render target", self.id)));
        }
        let (dimension, layers) = match views {
            Some(count) if self.layout.layers < count => {
                return Err(Error::invalid_argument(format!(
                    "multi-view pass needs {count} layers, {} has {}",
                    self.id, self.layout.layers
                )));
            }
            Some(count) => (wgpu::TextureViewDimension::D2Array, count),
            None => (wgpu::TextureViewDimension::D2, 1),
        };
        Ok(self.texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(dimension),
            base_mip_level: 0,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(layers),
            ..Default::default()
        }))
    }

    pub(crate) fn extent(&self) -> [u32; 3] {
        self.layout.extent
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

    fn check_copyable(&self) -> Result<wgpu::TextureAspect> {
        if self.layout.image_type.is_msaa() {
            return Err(Error::capability_missing(format!(
                "multisampled image {} cannot be copied on wgpu devices",
                self.id
            )));
        }
        copy_aspect(self.format)
    }

    /// Copy extent of `extent` at one level: depth for 3D textures, `layers` otherwise.
    fn copy_size(&self, extent: [u32; 3], layers: u32) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: extent[0],
            height: extent[1],
            depth_or_array_layers: match self.dimension {
                wgpu::TextureDimension::D3 => extent[2],
                _ => layers,
            },
        }
    }
}

impl Image for WgpuImage {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn device(&self) -> DeviceId {
        self.gpu.id()
    }

    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn flags(&self) -> MemoryFlags {
        self.flags
    }

    fn read_level(&self, queue: &dyn Queue, level: u32) -> Result<Vec<u8>> {
        self.check_queue(queue)?;
        let aspect = self.check_copyable()?;
        let range = self.layout.level_range(level)?;
        let extent = self.layout.level_extent(level);
        let size = self.copy_size(extent, self.layout.layers);
        let row_bytes = extent[0] as usize * self.layout.texel_bytes;
        let padded = align_up(row_bytes as u64, COPY_ROW_ALIGNMENT);
        let slices = size.depth_or_array_layers as usize;
        let rows = extent[1] as usize;
        let staging_len = padded * (rows * slices) as u64;
        let staging = create_raw_buffer(
            &self.gpu,
            staging_len,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            "prism image readback",
        )?;
        let queue = wgpu_queue(queue)?;
        queue.submit_commands(format!("read {} level {level}", self.id), Vec::new(), Vec::new(), None, |encoder| {
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &self.texture,
                    mip_level: level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded as u32),
                        rows_per_image: Some(extent[1]),
                    },
                },
                size,
            );
            Ok(())
        })?;
        queue.wait_idle()?;
        let padded_data = self.gpu.read_mapped(&staging, staging_len)?;
        let mut out = Vec::with_capacity(range.len());
        for row in padded_data.chunks_exact(padded as usize).take(rows * slices) {
            out.extend_from_slice(&row[..row_bytes]);
        }
        self.gpu.stats.add_bytes_downloaded(out.len() as u64);
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
        let aspect = self.check_copyable()?;
        let rows = self.layout.region_rows(offset, extent, mips.clone(), layers.clone())?;
        let expected: usize = rows.iter().map(|r| r.len()).sum();
        if src.len() != expected {
            return Err(Error::invalid_argument(format!(
                "{} bytes for an image region of {expected} bytes",
                src.len()
            )));
        }
        if expected == 0 {
            return Ok(());
        }
        wgpu_queue(queue)?.wait_submitted()?;
        let mut at = 0usize;
        for level in mips.clone() {
            let shift = level - mips.start;
            let region_offset = offset.map(|o| o >> shift);
            let region_extent = prism_core::level_extent(extent, shift);
            let row_bytes = region_extent[0] as usize * self.layout.texel_bytes;
            let layer_bytes = row_bytes * region_extent[1] as usize * region_extent[2] as usize;
            for layer in layers.clone() {
                let origin = match self.dimension {
                    wgpu::TextureDimension::D3 => wgpu::Origin3d {
                        x: region_offset[0],
                        y: region_offset[1],
                        z: region_offset[2],
                    },
                    _ => wgpu::Origin3d {
                        x: region_offset[0],
                        y: region_offset[1],
                        z: layer,
                    },
                };
                self.gpu.queue.write_texture(
                    wgpu::ImageCopyTexture {
                        texture: &self.texture,
                        mip_level: level,
                        origin,
                        aspect,
                    },
                    &src[at..at + layer_bytes],
                    wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(row_bytes as u32),
                        rows_per_image: Some(region_extent[1]),
                    },
                    self.copy_size(region_extent, 1),
                );
                at += layer_bytes;
            }
        }
        self.gpu.queue.submit(std::iter::empty());
        self.gpu.stats.add_bytes_uploaded(expected as u64);
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
            .downcast_ref::<WgpuImage>()
            .ok_or_else(|| Error::invalid_argument(format!("blit source {} is not a wgpu image", src.id())))?;
        if source.gpu.id() != self.gpu.id() {
            return Err(Error::invalid_argument(format!(
                "blit from {} on {} into {} on {}",
                source.id,
                source.gpu.id(),
                self.id,
                self.gpu.id()
            )));
        }
        let levels = blit_levels(&self.layout, &source.layout)?;
        let aspect = self.check_copyable()?;
        wgpu_queue(queue)?.submit_commands(
            format!("blit {} -> {}", source.id, self.id),
            wait.to_vec(),
            signal.to_vec(),
            None,
            |encoder| {
                for level in 0..levels {
                    let size = self.copy_size(self.layout.level_extent(level), self.layout.layers);
                    encoder.copy_texture_to_texture(
                        wgpu::ImageCopyTexture {
                            texture: &source.texture,
                            mip_level: level,
                            origin: wgpu::Origin3d::ZERO,
                            aspect,
                        },
                        wgpu::ImageCopyTexture {
                            texture: &self.texture,
                            mip_level: level,
                            origin: wgpu::Origin3d::ZERO,
                            aspect,
                        },
                        size,
                    );
                }
                Ok(())
            },
        )
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
