use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use prism_binary::UniversalBinary;
use prism_types::{Backend, ContextFlags, MemoryFlags, SharingApi};

use crate::argument_buffer::{argument_buffer_layout, ArgumentBuffer};
use crate::buffer::Buffer;
use crate::device::{select_device, Device, DeviceId, DeviceSelector};
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::heap::HeapUsage;
use crate::image::{Image, ImageDesc};
use crate::indirect::{IndirectCommandPipeline, IndirectDesc};
use crate::pass::{Pass, PassDesc};
use crate::pipeline::{GraphicsPipeline, PipelineDesc};
use crate::program::{Function, Program};
use crate::queue::{Queue, QueueType};
use crate::renderer::Renderer;
use crate::resource::{LiveResources, ResourceTracker};
use crate::sharing::SharingRegistry;
use crate::stats::ContextStats;
use crate::surface::{Drawable, Surface};

/// Central factory and registry of one backend.
///
/// Factory methods are internally synchronized and may be called from any thread.
pub trait Context: Send + Sync {
    fn backend(&self) -> Backend;

    fn flags(&self) -> ContextFlags;

    /// Discovered devices in a stable order. May be empty.
    fn devices(&self) -> &[Arc<Device>];

    fn create_queue(&self, device: &Arc<Device>, queue_type: QueueType) -> Result<Arc<dyn Queue>>;

    /// Allocates `size` bytes, rounded up to the device alignment.
    fn create_buffer(&self, queue: &dyn Queue, size: u64, flags: MemoryFlags) -> Result<Arc<dyn Buffer>>;

    fn create_image(
        &self,
        queue: &dyn Queue,
        desc: ImageDesc,
        data: Option<&[u8]>,
        flags: MemoryFlags,
    ) -> Result<Arc<dyn Image>>;

    fn create_program_from_universal_binary(&self, bytes: &[u8]) -> Result<Arc<Program>>;

    fn create_fence(&self, device: &Arc<Device>) -> Result<Arc<dyn Fence>>;

    /// Presentation surface, when the context owns one.
    fn surface(&self) -> Option<Arc<dyn Surface>>;

    fn stats(&self) -> &ContextStats;

    fn tracker(&self) -> &Arc<ResourceTracker>;

    fn heap_usage(&self, device: DeviceId) -> HeapUsage;

    fn sharing(&self) -> &SharingRegistry;

    fn as_any(&self) -> &dyn Any;

    fn get_device(&self, selector: DeviceSelector) -> Option<Arc<Device>> {
        select_device(self.devices(), selector)
    }

    /// Allocates a buffer holding `data`. The data is attached as the buffer's host span and
    /// uploaded unless `NO_INITIAL_COPY` is set.
    fn create_buffer_with_data(&self, queue: &dyn Queue, data: Vec<u8>, flags: MemoryFlags) -> Result<Arc<dyn Buffer>> {
        let buffer = self.create_buffer(queue, data.len() as u64, flags)?;
        let mut data = data;
        data.resize(buffer.size() as usize, 0);
        buffer.attach_host_span(data)?;
        if !flags.contains(MemoryFlags::NO_INITIAL_COPY) {
            buffer.write_host(queue)?;
        }
        Ok(buffer)
    }

    fn create_program_from_universal_binary_path(&self, path: &Path) -> Result<Arc<Program>> {
        let bytes = std::fs::read(path)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "loading universal binary");
        self.create_program_from_universal_binary(&bytes)
    }

    /// Parses `bytes`; shared by the backends' program loaders.
    fn parse_universal_binary(&self, bytes: &[u8]) -> Result<UniversalBinary> {
        Ok(UniversalBinary::parse(bytes)?)
    }

    /// Allocates storage for argument `arg_index` of `function` sized from its layout.
    fn create_argument_buffer(
        &self,
        queue: &dyn Queue,
        function: &Function,
        arg_index: usize,
        extra_flags: MemoryFlags,
        zero_init: bool,
    ) -> Result<Arc<ArgumentBuffer>> {
        let (layout, size) = argument_buffer_layout(function, queue.device(), arg_index)?;
        let storage = self.create_buffer(queue, size, MemoryFlags::READ | MemoryFlags::HOST_WRITE | extra_flags)?;
        if zero_init {
            storage.zero(queue)?;
        }
        Ok(Arc::new(ArgumentBuffer::new(function, arg_index, layout, storage)))
    }

    fn create_pass(&self, desc: PassDesc) -> Result<Arc<Pass>> {
        Ok(Arc::new(Pass::new(desc)?))
    }

    /// Builds a pipeline for `devices`, resolving screen-sized state against the surface.
    fn create_pipeline(
        &self,
        desc: PipelineDesc,
        devices: &[Arc<Device>],
        multi_view: bool,
    ) -> Result<Arc<GraphicsPipeline>> {
        let devices = if devices.is_empty() { self.devices() } else { devices };
        Ok(Arc::new(GraphicsPipeline::new(desc, devices, self.screen_size(), multi_view)?))
    }

    fn create_indirect_command_pipeline(&self, desc: IndirectDesc) -> Result<IndirectCommandPipeline> {
        IndirectCommandPipeline::new(desc, self.devices())
    }

    fn create_renderer(
        &self,
        queue: Arc<dyn Queue>,
        pass: Arc<Pass>,
        pipeline: Arc<GraphicsPipeline>,
        multi_view: bool,
    ) -> Result<Renderer> {
        Renderer::new(queue, pass, pipeline, self.surface(), multi_view)
    }

    /// Next drawable of the context's surface.
    fn acquire_next_drawable(&self, multi_view: bool) -> Result<Drawable> {
        let surface = self
            .surface()
            .ok_or_else(|| Error::invalid_argument("context has no surface"))?;
        surface.acquire_next(multi_view)
    }

    /// Surface size, `[0, 0]` without a surface.
    fn screen_size(&self) -> [u32; 2] {
        self.surface().map_or([0, 0], |s| s.size())
    }

    fn live_resources(&self) -> LiveResources {
        self.tracker().live()
    }

    /// Registers the context and queue that host siblings of `api`-shared resources.
    fn register_sharing_context(&self, api: SharingApi, context: Arc<dyn Context>, queue: Arc<dyn Queue>) {
        self.sharing().register(api, context, queue);
    }
}
