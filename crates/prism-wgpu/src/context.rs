use std::any::Any;
use std::fmt;
use std::sync::Arc;

use prism_core::{
    align_up, Buffer, Context, ContextStats, Device, DeviceHeaps, DeviceId, Error, Fence, HeapUsage, Image, ImageDesc,
    ImageLayout, Program, Queue, QueueType, ResourceKind, ResourceTracker, Result, SharingRegistry, Surface,
    TrackingToken,
};
use prism_types::{Backend, ContextFlags, MemoryFlags};

use crate::buffer::{create_raw_buffer, BufferMemory, WgpuBuffer, BUFFER_USAGE};
use crate::device::{describe_adapter, GpuDevice};
use crate::fence::WgpuFence;
use crate::image::WgpuImage;
use crate::module::load_module;
use crate::queue::{wgpu_queue, WgpuQueue};

pub struct WgpuContextBuilder {
    flags: ContextFlags,
    backends: wgpu::Backends,
}

impl WgpuContextBuilder {
    pub fn flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Native APIs to look for adapters on; defaults to `WGPU_BACKEND` or the primary ones.
    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }

    /// Opens every adapter of the selected backends. Adapters that fail to open are skipped.
    pub fn build(self) -> Result<WgpuContext> {
        self.flags.validate()?;
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: self.backends,
            ..Default::default()
        });
        let adapters = instance.enumerate_adapters(self.backends);
        if adapters.is_empty() {
            return Err(Error::capability_missing(format!("no wgpu adapter for {:?}", self.backends)));
        }

        let stats = Arc::new(ContextStats::new());
        let mut gpus = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let info = describe_adapter(gpus.len(), &adapter);
            let name = info.name.clone();
            match GpuDevice::open(info, adapter, Arc::clone(&stats)) {
                Ok(gpu) => gpus.push(gpu),
                Err(err) => tracing::warn!(adapter = %name, %err, "skipping wgpu adapter"),
            }
        }
        if gpus.is_empty() {
            return Err(Error::capability_missing("no wgpu adapter could be opened"));
        }

        let devices = gpus.iter().map(|gpu| Arc::clone(&gpu.info)).collect();
        let heaps = gpus
            .iter()
            .map(|gpu| {
                let gpu = Arc::clone(gpu);
                DeviceHeaps::new(move |size| create_raw_buffer(&gpu, size, BUFFER_USAGE, "prism heap block"))
            })
            .collect();
        tracing::debug!(devices = gpus.len(), backends = ?self.backends, "wgpu context created");
        Ok(WgpuContext {
            flags: self.flags,
            devices,
            gpus,
            heaps,
            stats,
            tracker: ResourceTracker::new(),
            sharing: SharingRegistry::new(),
        })
    }
}

/// Context of the portable GPU backend, built on `wgpu`.
pub struct WgpuContext {
    flags: ContextFlags,
    devices: Vec<Arc<Device>>,
    gpus: Vec<Arc<GpuDevice>>,
    heaps: Vec<DeviceHeaps<wgpu::Buffer>>,
    stats: Arc<ContextStats>,
    tracker: Arc<ResourceTracker>,
    sharing: SharingRegistry,
}

impl WgpuContext {
    pub fn builder() -> WgpuContextBuilder {
        WgpuContextBuilder {
            flags: ContextFlags::empty(),
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::PRIMARY),
        }
    }

    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    fn gpu(&self, device: DeviceId) -> Result<&Arc<GpuDevice>> {
        self.gpus
            .get(device.0 as usize)
            .ok_or_else(|| Error::invalid_argument(format!("{device} does not belong to this wgpu context")))
    }

    fn tracking(&self, kind: ResourceKind, flags: MemoryFlags) -> Option<TrackingToken> {
        self.flags.tracks(flags).then(|| self.tracker.track(kind))
    }

    fn allocate(&self, gpu: &Arc<GpuDevice>, size: u64, flags: MemoryFlags) -> Result<BufferMemory> {
        if self.flags.use_heap_for(flags) {
            let heaps = &self.heaps[gpu.id().0 as usize];
            if let Some(allocation) = heaps.for_flags(flags).allocate(size)? {
                return Ok(BufferMemory::heap(allocation, size, Arc::clone(&self.stats)));
            }
        }
        let raw = create_raw_buffer(gpu, size, BUFFER_USAGE, "prism buffer")?;
        Ok(BufferMemory::Dedicated(Arc::new(raw)))
    }
}

impl Context for WgpuContext {
    fn backend(&self) -> Backend {
        self.devices.first().map_or(Backend::Vulkan, |d| d.backend)
    }

    fn flags(&self) -> ContextFlags {
        self.flags
    }

    fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    fn create_queue(&self, device: &Arc<Device>, queue_type: QueueType) -> Result<Arc<dyn Queue>> {
        let gpu = self.gpu(device.id)?;
        if gpu.is_lost() {
            return Err(gpu.lost_error());
        }
        Ok(Arc::new(WgpuQueue::new(Arc::clone(gpu), queue_type)))
    }

    fn create_buffer(&self, queue: &dyn Queue, size: u64, flags: MemoryFlags) -> Result<Arc<dyn Buffer>> {
        if size == 0 {
            return Err(Error::invalid_argument("buffer size must not be 0"));
        }
        flags.validate()?;
        let gpu = Arc::clone(wgpu_queue(queue)?.gpu());
        let device = &gpu.info;
        let size = align_up(size, device.min_alignment);
        if size > device.max_mem_alloc {
            return Err(Error::resource_exhausted(format!(
                "{size}-byte buffer exceeds the {}-byte allocation limit",
                device.max_mem_alloc
            )));
        }
        let memory = self.allocate(&gpu, size, flags)?;
        let shared = self.sharing.create_shared_buffer(size, flags)?;
        let tracking = self.tracking(ResourceKind::Buffer, flags);
        let buffer = WgpuBuffer::new(gpu, flags, memory, shared, tracking);
        tracing::trace!(id = %buffer.id(), size, heap = buffer.is_heap_allocated(), "wgpu buffer created");
        Ok(Arc::new(buffer))
    }

    fn create_image(
        &self,
        queue: &dyn Queue,
        desc: ImageDesc,
        data: Option<&[u8]>,
        flags: MemoryFlags,
    ) -> Result<Arc<dyn Image>> {
        flags.validate()?;
        let gpu = Arc::clone(wgpu_queue(queue)?.gpu());
        let layout = ImageLayout::new(&gpu.info, desc.image_type, desc.dims, desc.mip_limit)?;
        let shared = self.sharing.create_shared_image(&desc, flags)?;
        let tracking = self.tracking(ResourceKind::Image, flags);
        let image = WgpuImage::create(gpu, layout, flags, shared, tracking, desc.debug_label.as_deref())?;
        if let Some(data) = data {
            let layout = image.layout();
            let level0 = layout.level_range(0)?.len();
            let full = data.len() == layout.total_bytes();
            if !full && data.len() != level0 {
                return Err(Error::invalid_argument(format!(
                    "initial data of {} bytes for an image with a {level0}-byte level 0 and {} bytes total",
                    data.len(),
                    layout.total_bytes()
                )));
            }
            if full {
                image.attach_host_span(data.to_vec())?;
            }
            if !flags.contains(MemoryFlags::NO_INITIAL_COPY) {
                image.write_level(queue, 0, &data[..level0])?;
                if full {
                    for level in 1..layout.levels {
                        image.write_level(queue, level, &data[layout.level_range(level)?])?;
                    }
                } else {
                    image.generate_mip_map_chain(queue)?;
                }
            }
        }
        tracing::trace!(id = %image.id(), ty = ?desc.image_type, dims = ?desc.dims, "wgpu image created");
        Ok(Arc::new(image))
    }

    fn create_program_from_universal_binary(&self, bytes: &[u8]) -> Result<Arc<Program>> {
        let binary = self.parse_universal_binary(bytes)?;
        Ok(Arc::new(Program::build(&self.devices, &binary, |device, entry| {
            load_module(self.gpu(device.id)?, entry)
        })?))
    }

    fn create_fence(&self, device: &Arc<Device>) -> Result<Arc<dyn Fence>> {
        let gpu = self.gpu(device.id)?;
        Ok(Arc::new(WgpuFence::new(Arc::clone(gpu))))
    }

    fn surface(&self) -> Option<Arc<dyn Surface>> {
        None
    }

    fn stats(&self) -> &ContextStats {
        &self.stats
    }

    fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    fn heap_usage(&self, device: DeviceId) -> HeapUsage {
        self.heaps
            .get(device.0 as usize)
            .map(DeviceHeaps::usage)
            .unwrap_or_default()
    }

    fn sharing(&self) -> &SharingRegistry {
        &self.sharing
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for WgpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuContext")
            .field("flags", &self.flags)
            .field("devices", &self.devices)
            .finish()
    }
}
