use std::any::Any;
use std::fmt;
use std::sync::Arc;

use prism_core::{
    align_up, Buffer, Context, ContextStats, Device, DeviceCaps, DeviceHeaps, DeviceId, DeviceType, Error, Fence,
    HeapUsage, Image, ImageDesc, ImageLayout, Program, Queue, QueueType, ResourceKind, ResourceTracker, Result,
    SharingRegistry, Surface, TrackingToken,
};
use prism_types::{Backend, ContextFlags, ImageType, MemoryFlags};

use crate::buffer::HostBuffer;
use crate::fence::HostFence;
use crate::image::HostImage;
use crate::memory::{DeviceMemory, MemorySlice};
use crate::module::HostModuleRegistry;
use crate::queue::{host_queue, HostQueue};
use crate::surface::{OffscreenSurface, PresentSink};

pub const SIMD_WIDTHS: [u32; 4] = [1, 4, 8, 16];
pub const MAX_TESSELLATION_FACTOR: u32 = 64;

/// State every queue of a context shares.
pub(crate) struct HostShared {
    pub(crate) stats: Arc<ContextStats>,
    pub(crate) pool: Arc<rayon::ThreadPool>,
    pub(crate) flags: ContextFlags,
}

struct SurfaceConfig {
    size: [u32; 2],
    format: ImageType,
    images: u32,
    sink: Option<PresentSink>,
}

pub struct HostContextBuilder {
    flags: ContextFlags,
    device_count: usize,
    simd_width: u32,
    units: Option<u32>,
    registry: Arc<HostModuleRegistry>,
    surface: Option<SurfaceConfig>,
}

impl HostContextBuilder {
    pub fn flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Number of CPU devices to expose; they share the thread pool.
    pub fn device_count(mut self, count: usize) -> Self {
        self.device_count = count;
        self
    }

    /// Sub-group width; one of [`SIMD_WIDTHS`].
    pub fn simd_width(mut self, width: u32) -> Self {
        self.simd_width = width;
        self
    }

    /// Worker threads of the dispatch pool, defaulting to the available parallelism.
    pub fn units(mut self, units: u32) -> Self {
        self.units = Some(units);
        self
    }

    pub fn registry(mut self, registry: Arc<HostModuleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Gives the context an offscreen swapchain of `images` drawables.
    pub fn offscreen_surface(mut self, size: [u32; 2], format: ImageType, images: u32) -> Self {
        self.surface = Some(SurfaceConfig {
            size,
            format,
            images,
            sink: None,
        });
        self
    }

    /// Receives every frame presented to the offscreen surface.
    pub fn present_sink(mut self, sink: PresentSink) -> Self {
        if let Some(surface) = &mut self.surface {
            surface.sink = Some(sink);
        }
        self
    }

    pub fn build(self) -> Result<HostContext> {
        self.flags.validate()?;
        if !SIMD_WIDTHS.contains(&self.simd_width) {
            return Err(Error::invalid_argument(format!(
                "SIMD width {} is not one of {SIMD_WIDTHS:?}",
                self.simd_width
            )));
        }
        let units = match self.units {
            Some(0) => return Err(Error::invalid_argument("a host context needs at least one unit")),
            Some(units) => units,
            None => std::thread::available_parallelism().map_or(1, |n| n.get() as u32),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(units as usize)
            .thread_name(|i| format!("prism-host-{i}"))
            .build()
            .map_err(|err| Error::resource_exhausted(format!("building the host thread pool: {err}")))?;

        let devices: Vec<Arc<Device>> = (0..self.device_count)
            .map(|index| Arc::new(host_device(index, units, self.simd_width)))
            .collect();
        let heaps = devices.iter().map(|_| DeviceHeaps::new(DeviceMemory::new)).collect();
        let mut context = HostContext {
            flags: self.flags,
            devices,
            heaps,
            shared: Arc::new(HostShared {
                stats: Arc::new(ContextStats::new()),
                pool: Arc::new(pool),
                flags: self.flags,
            }),
            registry: self.registry,
            tracker: ResourceTracker::new(),
            sharing: SharingRegistry::new(),
            surface: None,
        };
        if let Some(config) = self.surface {
            context.surface = Some(Arc::new(context.offscreen_surface(config)?));
        }
        tracing::debug!(
            devices = context.devices.len(),
            units,
            simd_width = self.simd_width,
            "host context created"
        );
        Ok(context)
    }
}

fn host_device(index: usize, units: u32, simd_width: u32) -> Device {
    let mut device = Device::new(
        DeviceId(index as u32),
        Backend::Host,
        DeviceType::Cpu,
        format!("Host CPU {index}"),
    );
    device.vendor = "prism".into();
    device.units = units;
    device.simd_width = simd_width;
    device.simd_range = [1, 16];
    device.max_local_size = [1024, 1024, 1024];
    device.max_total_local_size = 1024;
    device.local_mem_size = 64 * 1024;
    device.global_mem_size = 4 << 30;
    device.max_mem_alloc = 1 << 30;
    device.min_alignment = 16;
    device.max_image_dim = [16384, 16384, 2048];
    device.max_mip_levels = 15;
    device.max_tessellation_factor = MAX_TESSELLATION_FACTOR;
    device.caps = DeviceCaps::all() - (DeviceCaps::COOPERATIVE_KERNEL | DeviceCaps::IMAGE_MSAA | DeviceCaps::IMAGE_MSAA_ARRAY);
    device
}

/// Context of the in-process CPU backend.
pub struct HostContext {
    flags: ContextFlags,
    devices: Vec<Arc<Device>>,
    heaps: Vec<DeviceHeaps<DeviceMemory>>,
    shared: Arc<HostShared>,
    registry: Arc<HostModuleRegistry>,
    tracker: Arc<ResourceTracker>,
    sharing: SharingRegistry,
    surface: Option<Arc<OffscreenSurface>>,
}

impl HostContext {
    pub fn builder() -> HostContextBuilder {
        HostContextBuilder {
            flags: ContextFlags::empty(),
            device_count: 1,
            simd_width: 8,
            units: None,
            registry: Arc::new(HostModuleRegistry::new()),
            surface: None,
        }
    }

    /// A single-device context with default settings.
    pub fn new(registry: Arc<HostModuleRegistry>) -> Result<Self> {
        Self::builder().registry(registry).build()
    }

    pub fn registry(&self) -> &Arc<HostModuleRegistry> {
        &self.registry
    }

    pub fn offscreen(&self) -> Option<&Arc<OffscreenSurface>> {
        self.surface.as_ref()
    }

    fn device_index(&self, device: DeviceId) -> Result<usize> {
        let index = device.0 as usize;
        if index < self.devices.len() {
            Ok(index)
        } else {
            Err(Error::invalid_argument(format!("{device} does not belong to this host context")))
        }
    }

    fn allocate(&self, device: DeviceId, size: u64, flags: MemoryFlags) -> Result<MemorySlice> {
        let heaps = &self.heaps[self.device_index(device)?];
        if self.flags.use_heap_for(flags) {
            if let Some(allocation) = heaps.for_flags(flags).allocate(size)? {
                return Ok(MemorySlice::heap(allocation, size, Arc::clone(&self.shared.stats)));
            }
        }
        MemorySlice::dedicated(size)
    }

    fn tracking(&self, kind: ResourceKind, flags: MemoryFlags) -> Option<TrackingToken> {
        self.flags.tracks(flags).then(|| self.tracker.track(kind))
    }

    fn new_image(&self, device: &Device, desc: &ImageDesc, flags: MemoryFlags) -> Result<HostImage> {
        flags.validate()?;
        let layout = ImageLayout::new(device, desc.image_type, desc.dims, desc.mip_limit)?;
        let memory = self.allocate(device.id, layout.total_bytes() as u64, flags)?;
        let shared = self.sharing.create_shared_image(desc, flags)?;
        let image = HostImage::new(
            device.id,
            layout,
            flags,
            memory,
            shared,
            Arc::clone(&self.shared.stats),
            self.tracking(ResourceKind::Image, flags),
        );
        if let Some(label) = &desc.debug_label {
            image.set_debug_label(label);
        }
        Ok(image)
    }

    fn offscreen_surface(&self, config: SurfaceConfig) -> Result<OffscreenSurface> {
        let device = self
            .devices
            .first()
            .ok_or_else(|| Error::invalid_argument("an offscreen surface needs a device"))?;
        if config.images == 0 {
            return Err(Error::invalid_argument("an offscreen surface needs at least one image"));
        }
        let [width, height] = config.size;
        let flags = MemoryFlags::READ_WRITE | MemoryFlags::HOST_READ;
        let format = config.format.render_target();
        let mut images = Vec::with_capacity(config.images as usize);
        for index in 0..config.images {
            let single = ImageDesc::d2(format, width, height).with_mip_limit(1);
            let multi_view = ImageDesc::new(format.array(), [width, height, 1, 2]).with_mip_limit(1);
            images.push((
                Arc::new(self.new_image(device, &single.with_label(format!("drawable {index}")), flags)?),
                Arc::new(self.new_image(device, &multi_view.with_label(format!("drawable {index} (multi-view)")), flags)?),
            ));
        }
        Ok(OffscreenSurface::new(config.size, format, images, config.sink))
    }
}

impl Context for HostContext {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn flags(&self) -> ContextFlags {
        self.flags
    }

    fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    fn create_queue(&self, device: &Arc<Device>, queue_type: QueueType) -> Result<Arc<dyn Queue>> {
        let index = self.device_index(device.id)?;
        Ok(Arc::new(HostQueue::new(
            Arc::clone(&self.devices[index]),
            queue_type,
            Arc::clone(&self.shared),
        )?))
    }

    fn create_buffer(&self, queue: &dyn Queue, size: u64, flags: MemoryFlags) -> Result<Arc<dyn Buffer>> {
        if size == 0 {
            return Err(Error::invalid_argument("buffer size must not be 0"));
        }
        flags.validate()?;
        host_queue(queue)?;
        let device = queue.device();
        self.device_index(device.id)?;
        let size = align_up(size, device.min_alignment);
        if size > device.max_mem_alloc {
            return Err(Error::resource_exhausted(format!(
                "{size}-byte buffer exceeds the {}-byte allocation limit",
                device.max_mem_alloc
            )));
        }
        let memory = self.allocate(device.id, size, flags)?;
        let shared = self.sharing.create_shared_buffer(size, flags)?;
        let tracking = self.tracking(ResourceKind::Buffer, flags);
        let buffer = HostBuffer::new(device.id, flags, memory, shared, Arc::clone(&self.shared.stats), tracking);
        tracing::trace!(id = %buffer.id(), size, heap = buffer.is_heap_allocated(), "host buffer created");
        Ok(Arc::new(buffer))
    }

    fn create_image(
        &self,
        queue: &dyn Queue,
        desc: ImageDesc,
        data: Option<&[u8]>,
        flags: MemoryFlags,
    ) -> Result<Arc<dyn Image>> {
        host_queue(queue)?;
        let device = queue.device();
        self.device_index(device.id)?;
        let image = self.new_image(device, &desc, flags)?;
        if let Some(data) = data {
            let layout = image.layout();
            let level0 = layout.level_range(0)?.len();
            if data.len() == layout.total_bytes() {
                image.attach_host_span(data.to_vec())?;
            }
            if !flags.contains(MemoryFlags::NO_INITIAL_COPY) {
                let (base, rest) = if data.len() == layout.total_bytes() {
                    (&data[..level0], Some(data))
                } else if data.len() == level0 {
                    (data, None)
                } else {
                    return Err(Error::invalid_argument(format!(
                        "initial data of {} bytes for an image with a {level0}-byte level 0 and {} bytes total",
                        data.len(),
                        layout.total_bytes()
                    )));
                };
                image.write_level(queue, 0, base)?;
                match rest {
                    Some(all) => {
                        for level in 1..layout.levels {
                            image.write_level(queue, level, &all[layout.level_range(level)?])?;
                        }
                    }
                    None => image.generate_mip_map_chain(queue)?,
                }
            }
        }
        tracing::trace!(id = %image.id(), ty = ?desc.image_type, dims = ?desc.dims, "host image created");
        Ok(Arc::new(image))
    }

    fn create_program_from_universal_binary(&self, bytes: &[u8]) -> Result<Arc<Program>> {
        let binary = self.parse_universal_binary(bytes)?;
        let registry = Arc::clone(&self.registry);
        Ok(Arc::new(Program::build(&self.devices, &binary, |_, entry| {
            registry.load(entry)
        })?))
    }

    fn create_fence(&self, device: &Arc<Device>) -> Result<Arc<dyn Fence>> {
        self.device_index(device.id)?;
        Ok(Arc::new(HostFence::new(device.id)))
    }

    fn surface(&self) -> Option<Arc<dyn Surface>> {
        self.surface.clone().map(|s| s as Arc<dyn Surface>)
    }

    fn stats(&self) -> &ContextStats {
        &self.shared.stats
    }

    fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    fn heap_usage(&self, device: DeviceId) -> HeapUsage {
        self.device_index(device)
            .map(|index| self.heaps[index].usage())
            .unwrap_or_default()
    }

    fn sharing(&self) -> &SharingRegistry {
        &self.sharing
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("flags", &self.flags)
            .field("devices", &self.devices.len())
            .field("surface", &self.surface.is_some())
            .finish()
    }
}
